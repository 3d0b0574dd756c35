//! Azure cloud selection and authority hosts.

use serde::{Deserialize, Serialize};

/// The national or sovereign cloud a credential authenticates against.
///
/// `Custom` carries a full authority base URL, used for private clouds and
/// for pointing tests at a local server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cloud {
    #[default]
    Public,
    Government,
    China,
    Germany,
    #[serde(untagged)]
    Custom(String),
}

impl Cloud {
    /// The login authority base URL for this cloud.
    pub fn authority_host(&self) -> &str {
        match self {
            Self::Public => "https://login.microsoftonline.com",
            Self::Government => "https://login.microsoftonline.us",
            Self::China => "https://login.chinacloudapi.cn",
            Self::Germany => "https://login.microsoftonline.de",
            Self::Custom(base) => base,
        }
    }

    /// The OAuth2 v2.0 token endpoint for a tenant in this cloud.
    pub fn token_endpoint(&self, tenant_id: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host().trim_end_matches('/'),
            tenant_id
        )
    }

    /// Parse a cloud selector name; anything else is treated as a custom
    /// authority base URL.
    pub fn from_name(name: &str) -> Self {
        match name {
            "public" => Self::Public,
            "government" => Self::Government,
            "china" => Self::China,
            "germany" => Self::Germany,
            other => Self::Custom(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_hosts_are_fixed() {
        assert_eq!(
            Cloud::Public.authority_host(),
            "https://login.microsoftonline.com"
        );
        assert_eq!(
            Cloud::Government.authority_host(),
            "https://login.microsoftonline.us"
        );
        assert_eq!(
            Cloud::China.authority_host(),
            "https://login.chinacloudapi.cn"
        );
        assert_eq!(
            Cloud::Germany.authority_host(),
            "https://login.microsoftonline.de"
        );
    }

    #[test]
    fn token_endpoint_includes_tenant() {
        assert_eq!(
            Cloud::Public.token_endpoint("test-tenant"),
            "https://login.microsoftonline.com/test-tenant/oauth2/v2.0/token"
        );
    }

    #[test]
    fn custom_base_url_is_used_verbatim() {
        let cloud = Cloud::Custom("http://127.0.0.1:8080/".into());
        assert_eq!(
            cloud.token_endpoint("t"),
            "http://127.0.0.1:8080/t/oauth2/v2.0/token"
        );
    }

    #[test]
    fn from_name_falls_back_to_custom() {
        assert_eq!(Cloud::from_name("public"), Cloud::Public);
        assert_eq!(Cloud::from_name("china"), Cloud::China);
        assert_eq!(
            Cloud::from_name("https://login.example.test"),
            Cloud::Custom("https://login.example.test".into())
        );
    }

    #[test]
    fn default_is_public() {
        assert_eq!(Cloud::default(), Cloud::Public);
    }
}
