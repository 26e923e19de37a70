use std::sync::Mutex;

use serde::Serialize;

use crate::error::{Error, Result};

/// Environment variable carrying the session bearer token. Token acquisition
/// itself (the OAuth dance) lives outside this process; tokens are cached for
/// the session only and never persisted.
pub const TOKEN_ENV: &str = "GASCP_ACCESS_TOKEN";

pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Result<String>;
}

/// Session-scoped token source: an explicit token wins, otherwise the
/// environment is consulted once and the answer cached.
pub struct SessionAuth {
    cached: Mutex<Option<Option<String>>>,
}

impl SessionAuth {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            cached: Mutex::new(Some(if token.is_empty() { None } else { Some(token) })),
        }
    }

    pub fn status(&self) -> AuthStatus {
        match self.access_token() {
            Ok(_) => AuthStatus {
                authenticated: true,
                source: "session".to_string(),
            },
            Err(_) => AuthStatus {
                authenticated: false,
                source: "none".to_string(),
            },
        }
    }
}

impl Default for SessionAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenProvider for SessionAuth {
    fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().expect("auth cache poisoned");
        let entry = cached.get_or_insert_with(|| {
            std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty())
        });
        entry.clone().ok_or(Error::Authentication)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub authenticated: bool,
    pub source: String,
}
