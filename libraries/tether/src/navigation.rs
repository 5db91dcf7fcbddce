//! Current path and query parameters, mirrored from browser history.
//!
//! Path and query always travel together as one [`Route`]: whatever wrote last (a `navigate`/`set_query` call or a
//! back/forward notification) determines both.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::data_model::Observable;
use crate::source::Subscription;

/// The host's history API.
pub trait History {
    /// The current URL, path plus query string (`/tokens?account=abc`).
    fn location(&self) -> String;
    fn push(&self, url: &str);
    fn replace(&self, url: &str);
    /// The callback fires after the user went back or forward.
    fn on_pop(&self, callback: Rc<dyn Fn()>) -> Subscription;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub query: BTreeMap<String, String>,
}

impl Route {
    pub fn new(path: &str, query: BTreeMap<String, String>) -> Self {
        Self {
            path: path.to_string(),
            query,
        }
    }

    /// Accepts a relative URL or an absolute one; scheme, host and fragment are dropped.
    pub fn parse(url: &str) -> Self {
        let url = match url.split_once("://") {
            Some((_scheme, rest)) => rest.find('/').map(|slash| &rest[slash..]).unwrap_or("/"),
            None => url,
        };
        let url = url.split_once('#').map(|(before, _)| before).unwrap_or(url);
        let (path, query) = url.split_once('?').unwrap_or((url, ""));

        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (decode_component(key), decode_component(value))
            })
            .collect();

        Self {
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query,
        }
    }

    pub fn to_url(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.path)
    }
}

fn encode_component(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

fn decode_component(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            b'%' => {
                let hex = text
                    .get(i + 1..i + 3)
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match hex {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 3;
                    }
                    None => {
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            byte => {
                decoded.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

pub struct Navigation {
    route: Observable<Route>,
    history: Rc<dyn History>,
    subscription: Option<Subscription>,
}

impl Navigation {
    /// Parses the current location, then follows back/forward notifications until stopped.
    pub fn start(history: Rc<dyn History>) -> Self {
        let route = Observable::new(Route::parse(&history.location()));

        let target = route.clone();
        let source = Rc::downgrade(&history);
        let subscription = history.on_pop(Rc::new(move || {
            let Some(history) = source.upgrade() else {
                return;
            };
            let next = Route::parse(&history.location());
            log::debug!("History moved to {}", next.to_url());
            target.set(next);
        }));

        Self {
            route,
            history,
            subscription: Some(subscription),
        }
    }

    pub fn route(&self) -> Observable<Route> {
        self.route.clone()
    }

    pub fn current(&self) -> Route {
        self.route.get()
    }

    pub fn path(&self) -> String {
        self.route.with(|route| route.path.clone())
    }

    /// Pushes a new history entry. The query is replaced wholesale; `None` clears it.
    pub fn navigate(&self, path: &str, query: Option<BTreeMap<String, String>>) {
        let next = Route::new(path, query.unwrap_or_default());
        self.history.push(&next.to_url());
        self.route.set(next);
    }

    /// Changes one query parameter in place, without a new history entry.
    pub fn set_query(&self, key: &str, value: &str) {
        let mut next = self.route.get();
        next.query.insert(key.to_string(), value.to_string());
        self.history.replace(&next.to_url());
        self.route.set(next);
    }

    pub fn remove_query(&self, key: &str) {
        let mut next = self.route.get();
        if next.query.remove(key).is_none() {
            return;
        }
        self.history.replace(&next.to_url());
        self.route.set(next);
    }

    pub fn get_query(&self, key: &str) -> Option<String> {
        self.route.with(|route| route.query.get(key).cloned())
    }

    pub fn get_query_or(&self, key: &str, default: &str) -> String {
        self.get_query(key).unwrap_or_else(|| default.to_string())
    }

    /// Stops following back/forward. Explicit navigation keeps working.
    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.release();
            log::debug!("Navigation stopped");
        }
    }
}
