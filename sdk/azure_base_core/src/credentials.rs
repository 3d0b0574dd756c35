//! Static (non-token) credential values.
//!
//! These are immutable once constructed; `update` returns a new value rather
//! than mutating in place. Constructors validate their input and return a
//! `CredentialError` on empty or malformed values.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{CredentialErrorKind, Error, Result};

/// A service API key, sent in a configurable header by the API-key policy.
#[derive(Clone)]
pub struct ApiKeyCredential {
    key: SecretString,
}

impl ApiKeyCredential {
    /// Create an API-key credential. Fails on an empty key.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::credential(CredentialErrorKind::InvalidKey));
        }
        Ok(Self {
            key: SecretString::from(key),
        })
    }

    /// Return a new credential with the replacement key.
    pub fn update(&self, key: impl Into<String>) -> Result<Self> {
        Self::new(key)
    }

    /// The raw key value.
    pub fn key(&self) -> &str {
        self.key.expose_secret()
    }
}

impl std::fmt::Debug for ApiKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKeyCredential(****)")
    }
}

/// A shared-access-signature credential.
///
/// The stored signature never carries a leading `?`; constructors strip it
/// along with surrounding whitespace so `"?sv=..."` and `"sv=..."` are the
/// same credential.
#[derive(Clone)]
pub struct SasCredential {
    signature: SecretString,
}

impl SasCredential {
    /// Create a SAS credential. Fails when the normalized signature is empty.
    pub fn new(signature: impl Into<String>) -> Result<Self> {
        let signature = signature.into();
        let trimmed = signature.trim().trim_start_matches('?').trim();
        if trimmed.is_empty() {
            return Err(Error::credential(CredentialErrorKind::InvalidSignature));
        }
        Ok(Self {
            signature: SecretString::from(trimmed.to_string()),
        })
    }

    /// Return a new credential with the replacement signature.
    pub fn update(&self, signature: impl Into<String>) -> Result<Self> {
        Self::new(signature)
    }

    /// The normalized signature, without a leading `?`.
    pub fn signature(&self) -> &str {
        self.signature.expose_secret()
    }
}

impl PartialEq for SasCredential {
    fn eq(&self, other: &Self) -> bool {
        self.signature() == other.signature()
    }
}

impl Eq for SasCredential {}

impl std::fmt::Debug for SasCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SasCredential(****)")
    }
}

/// An account name paired with a base64-encoded key, as used by Azure
/// Storage Shared Key authorization.
#[derive(Clone)]
pub struct NamedKeyCredential {
    name: String,
    key: SecretString,
}

impl NamedKeyCredential {
    /// Create a named-key credential.
    ///
    /// Fails when either field is empty or the key is not valid base64.
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let key = key.into();
        if name.is_empty() || key.is_empty() {
            return Err(Error::credential(CredentialErrorKind::InvalidNamedKey));
        }
        if BASE64.decode(&key).is_err() {
            return Err(Error::credential(CredentialErrorKind::InvalidNamedKey));
        }
        Ok(Self {
            name,
            key: SecretString::from(key),
        })
    }

    /// Return a new credential with the replacement name and key.
    pub fn update(&self, name: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        Self::new(name, key)
    }

    /// The account name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The base64-encoded key.
    pub fn key(&self) -> &str {
        self.key.expose_secret()
    }

    /// The decoded raw key bytes.
    pub fn key_bytes(&self) -> Vec<u8> {
        // Validated at construction.
        BASE64.decode(self.key.expose_secret()).unwrap_or_default()
    }
}

impl std::fmt::Debug for NamedKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedKeyCredential")
            .field("name", &self.name)
            .field("key", &"****")
            .finish()
    }
}
