//! Token sources: stateless strategies that perform one token acquisition.

pub mod client_assertion;
pub mod managed_identity;
pub mod workload_identity;

pub use client_assertion::ClientAssertionSource;
pub use managed_identity::{ManagedIdentityProvider, ManagedIdentitySource};
pub use workload_identity::WorkloadIdentitySource;

use azure_base_core::error::Result;
use azure_base_core::token::AccessTokenRecord;

/// The closed set of acquisition strategies a credential agent can own.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// Federated assertion exchanged through the OAuth2 JWT-bearer grant.
    ClientAssertion(ClientAssertionSource),
    /// IMDS or App Service managed identity.
    ManagedIdentity(ManagedIdentitySource),
    /// AKS projected service-account token exchanged through OAuth2.
    WorkloadIdentity(WorkloadIdentitySource),
}

impl TokenSource {
    /// Perform one acquisition. Never retries at this layer, except the
    /// IMDS provider's internal bounded 429/503 handling.
    pub async fn fetch(&self, http: &reqwest::Client) -> Result<AccessTokenRecord> {
        match self {
            Self::ClientAssertion(source) => source.fetch(http).await,
            Self::ManagedIdentity(source) => source.fetch(http).await,
            Self::WorkloadIdentity(source) => source.fetch(http).await,
        }
    }

    /// Stable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientAssertion(_) => "client_assertion",
            Self::ManagedIdentity(_) => "managed_identity",
            Self::WorkloadIdentity(_) => "workload_identity",
        }
    }
}
