#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(not(target_arch = "wasm32"))]
use uuid::Uuid;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = ["self", "crypto"])]
    fn randomUUID() -> String;
}

/// Length of the ids the record store hands out.
pub const RECORD_ID_LEN: usize = 15;

const RECORD_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub fn get_uuid() -> String {
    #[cfg(target_arch = "wasm32")]
    {
        randomUUID()
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        Uuid::new_v4().to_string()
    }
}

/// A record id in the store's format: 15 characters from `[a-z0-9]`, drawn from a fresh v4 uuid.
pub fn get_record_id() -> String {
    let hex: String = get_uuid().chars().filter(|c| *c != '-').collect();
    let mut entropy = u128::from_str_radix(&hex, 16).unwrap_or_default();
    let base = RECORD_ID_ALPHABET.len() as u128;

    let mut id = String::with_capacity(RECORD_ID_LEN);
    for _ in 0..RECORD_ID_LEN {
        id.push(RECORD_ID_ALPHABET[(entropy % base) as usize] as char);
        entropy /= base;
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_uuid() {
        let uuid1 = get_uuid();
        let uuid2 = get_uuid();

        assert_ne!(uuid1, uuid2);
        assert_eq!(uuid1.len(), 36);
        assert!(uuid1.chars().filter(|&c| c == '-').count() == 4);
    }

    #[test]
    fn test_get_record_id() {
        let id1 = get_record_id();
        let id2 = get_record_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.len(), RECORD_ID_LEN);
        assert!(
            id1.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }
}
