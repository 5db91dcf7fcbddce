//! The proxy's collections, as the record store serves them.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tether::Record;

/// A record type with a home collection in the store.
pub trait Resource: Record + Serialize + DeserializeOwned {
    const COLLECTION: &'static str;
}

/// Fields every record carries. Timestamps are kept as the store formats them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Base {
    pub id: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
}

impl Base {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        tether::filter::parse_timestamp(&self.created)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        tether::filter::parse_timestamp(&self.updated)
    }
}

macro_rules! resource {
    ($record:ty, $collection:literal) => {
        impl Record for $record {
            fn id(&self) -> &str {
                &self.base.id
            }
        }

        impl Resource for $record {
            const COLLECTION: &'static str = $collection;
        }
    };
}

/// An upstream account the proxy signs in with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "tadoID")]
    pub tado_id: String,
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub homes: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientType {
    PasswordGrant,
    DeviceCode,
}

/// An OAuth client registered with the proxy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "redirectURI", default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ClientType,
}

/// A pending device-code authorization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Code {
    #[serde(flatten)]
    pub base: Base,
    pub client: String,
    #[serde(default)]
    pub token: String,
    pub device_code: String,
    pub user_code: String,
    #[serde(rename = "verificationURI")]
    pub verification_uri: String,
    pub expires: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Home {
    #[serde(flatten)]
    pub base: Base,
    #[serde(rename = "tadoID")]
    pub tado_id: String,
    pub name: String,
}

/// One proxied call, as logged by the proxy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(flatten)]
    pub base: Base,
    #[serde(default)]
    pub token: String,
    pub method: String,
    pub url: String,
    pub status: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Valid,
    Invalid,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Valid => "valid",
            TokenStatus::Invalid => "invalid",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    #[serde(flatten)]
    pub base: Base,
    pub account: String,
    pub client: String,
    pub status: TokenStatus,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires: String,
    #[serde(default)]
    pub used: String,
}

resource!(Account, "accounts");
resource!(Client, "clients");
resource!(Code, "codes");
resource!(Home, "homes");
resource!(Request, "requests");
resource!(Token, "tokens");

/// The signed-in console user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    pub id: String,
    pub email: String,
}
