use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque correlation key linking an anonymous visitor to their orders.
///
/// This is not a credential: anyone holding the value can list the orders
/// created with it. It only saves a returning visitor from needing an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessToken(String);

impl AccessToken {
    /// Generates a fresh random token shaped like a v4 UUID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts any non-blank value previously issued to a client.
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > 128 {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccessToken {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        AccessToken::parse(raw).ok_or_else(|| "access token must be 1 to 128 characters".to_string())
    }
}

impl From<AccessToken> for String {
    fn from(token: AccessToken) -> Self {
        token.0
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
