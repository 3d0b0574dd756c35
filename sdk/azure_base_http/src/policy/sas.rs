//! Shared-access-signature authentication: the signature rides on the query
//! string rather than a header.

use async_trait::async_trait;

use azure_base_core::credentials::SasCredential;
use azure_base_core::error::Result;

use super::Policy;
use crate::request::Request;

/// Appends a SAS signature to each request URL's query string.
#[derive(Debug)]
pub struct SasTokenPolicy {
    sas: SasCredential,
}

impl SasTokenPolicy {
    /// Configure from a raw signature string. Leading `?` and surrounding
    /// whitespace are stripped.
    pub fn new(signature: impl Into<String>) -> Result<Self> {
        Ok(Self {
            sas: SasCredential::new(signature)?,
        })
    }

    pub fn from_credential(sas: SasCredential) -> Self {
        Self { sas }
    }
}

#[async_trait]
impl Policy for SasTokenPolicy {
    async fn on_request(&self, request: &mut Request) -> Result<()> {
        request.append_raw_query(self.sas.signature());
        Ok(())
    }
}
