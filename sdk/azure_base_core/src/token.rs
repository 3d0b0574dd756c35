//! The normalized access-token record produced by every token source.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The informational relative lifetime reported by a token endpoint.
///
/// Azure AD normally returns a number of seconds, but the field is carried
/// verbatim when a server sends a non-numeric string; `expires_at` is the
/// authoritative expiry either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpiresIn {
    Seconds(u64),
    Raw(String),
}

impl ExpiresIn {
    /// The numeric value, when the server sent one (directly or as a
    /// numeric string).
    pub fn as_seconds(&self) -> Option<u64> {
        match self {
            Self::Seconds(s) => Some(*s),
            Self::Raw(s) => s.trim().parse().ok(),
        }
    }
}

/// An acquired access token together with its expiry metadata.
///
/// The token string is held as a secret: `Debug` redacts it and it is never
/// logged by this crate family.
#[derive(Clone)]
pub struct AccessTokenRecord {
    access_token: SecretString,
    token_type: String,
    scope: Option<String>,
    expires_at: u64,
    expires_in: Option<ExpiresIn>,
}

impl AccessTokenRecord {
    /// Create a record from the opaque token and its absolute expiry
    /// (seconds since epoch). Fails on an empty token.
    pub fn new(access_token: impl Into<String>, expires_at: u64) -> Result<Self> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(Error::InvalidTokenFormat {
                token: access_token,
            });
        }
        Ok(Self {
            access_token: SecretString::from(access_token),
            token_type: "Bearer".to_string(),
            scope: None,
            expires_at,
            expires_in: None,
        })
    }

    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_expires_in(mut self, expires_in: ExpiresIn) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// The raw token value.
    pub fn secret(&self) -> &str {
        self.access_token.expose_secret()
    }

    /// Token type, typically `"Bearer"`.
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Absolute expiry, seconds since epoch. Authoritative.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Relative lifetime as reported by the server, informational only.
    pub fn expires_in(&self) -> Option<&ExpiresIn> {
        self.expires_in.as_ref()
    }

    /// Time left before expiry as seen from `now` (seconds since epoch).
    pub fn remaining_lifetime(&self, now: u64) -> Duration {
        Duration::from_secs(self.expires_at.saturating_sub(now))
    }

    /// True when the token expires within `slack` of `now`.
    pub fn expires_within(&self, now: u64, slack: Duration) -> bool {
        self.remaining_lifetime(now) <= slack
    }
}

impl std::fmt::Debug for AccessTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenRecord")
            .field("access_token", &"****")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_token() {
        assert!(matches!(
            AccessTokenRecord::new("", 0),
            Err(Error::InvalidTokenFormat { .. })
        ));
    }

    #[test]
    fn defaults_to_bearer() {
        let record = AccessTokenRecord::new("AT", 100).unwrap();
        assert_eq!(record.token_type(), "Bearer");
        assert_eq!(record.expires_at(), 100);
        assert!(record.scope().is_none());
    }

    #[test]
    fn expires_within_uses_slack() {
        let now = unix_now();
        let record = AccessTokenRecord::new("AT", now + 100).unwrap();
        assert!(!record.expires_within(now, Duration::from_secs(50)));
        assert!(record.expires_within(now, Duration::from_secs(100)));
        assert!(record.expires_within(now + 200, Duration::from_secs(0)));
    }

    #[test]
    fn expires_in_preserves_non_numeric_strings() {
        let record = AccessTokenRecord::new("AT", 100)
            .unwrap()
            .with_expires_in(ExpiresIn::Raw("soon".into()));
        assert_eq!(
            record.expires_in(),
            Some(&ExpiresIn::Raw("soon".to_string()))
        );
        assert_eq!(record.expires_in().unwrap().as_seconds(), None);
    }

    #[test]
    fn expires_in_parses_numeric_strings() {
        assert_eq!(ExpiresIn::Raw("3600".into()).as_seconds(), Some(3600));
        assert_eq!(ExpiresIn::Seconds(60).as_seconds(), Some(60));
    }

    #[test]
    fn debug_redacts_token() {
        let record = AccessTokenRecord::new("very-secret", 1).unwrap();
        let debug = format!("{record:?}");
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn untagged_expires_in_deserializes_both_shapes() {
        let n: ExpiresIn = serde_json::from_str("3599").unwrap();
        let s: ExpiresIn = serde_json::from_str("\"3599\"").unwrap();
        assert_eq!(n, ExpiresIn::Seconds(3599));
        assert_eq!(s, ExpiresIn::Raw("3599".into()));
    }
}
