//! Payloads of project aggregate events.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::domain::{
    ApiAuthMethodType, OidcApplicationType, OidcAuthMethodType, OidcGrantType, OidcResponseType,
    OidcTokenType, OidcVersion,
};

/// Payload of `project.application.added`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationAdded {
    /// Application id.
    pub app_id: String,
    /// Display name.
    pub name: String,
}

/// Payload of `project.application.changed`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationChanged {
    /// Application id.
    pub app_id: String,
    /// New display name, if it changed.
    #[serde(default)]
    pub name: Option<String>,
}

/// Payload of events that only reference an application:
/// `deactivated`, `reactivated` and `removed`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRef {
    /// Application id.
    pub app_id: String,
}

/// Payload of `project.application.config.api.added`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfigAdded {
    /// Application id.
    pub app_id: String,
    /// OAuth client id.
    pub client_id: String,
    /// Encrypted client secret, opaque to the projection.
    #[serde(default)]
    pub client_secret: Option<serde_json::Value>,
    /// Client authentication method.
    #[serde(default)]
    pub auth_method_type: ApiAuthMethodType,
}

/// Payload of `project.application.config.api.changed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfigChanged {
    /// Application id.
    pub app_id: String,
    /// New encrypted client secret.
    #[serde(default)]
    pub client_secret: Option<serde_json::Value>,
    /// New client authentication method.
    #[serde(default)]
    pub auth_method_type: Option<ApiAuthMethodType>,
}

/// Payload of the `secret.changed` events of API and OIDC configurations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSecretChanged {
    /// Application id.
    pub app_id: String,
    /// New encrypted client secret.
    #[serde(default, alias = "client_secret")]
    pub client_secret: Option<serde_json::Value>,
}

/// Payload of `project.application.config.oidc.added`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfigAdded {
    /// Application id.
    pub app_id: String,
    /// Configuration version.
    #[serde(default)]
    pub oidc_version: OidcVersion,
    /// OAuth client id.
    pub client_id: String,
    /// Encrypted client secret.
    #[serde(default)]
    pub client_secret: Option<serde_json::Value>,
    /// Allowed redirect URIs.
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Allowed response types.
    #[serde(default)]
    pub response_types: Vec<OidcResponseType>,
    /// Allowed grant types.
    #[serde(default)]
    pub grant_types: Vec<OidcGrantType>,
    /// Client application type.
    #[serde(default)]
    pub application_type: OidcApplicationType,
    /// Client authentication method.
    #[serde(default)]
    pub auth_method_type: OidcAuthMethodType,
    /// Allowed post-logout redirect URIs.
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,
    /// Relaxed redirect URI validation.
    #[serde(default)]
    pub dev_mode: bool,
    /// Access token format.
    #[serde(default)]
    pub access_token_type: OidcTokenType,
    /// Put roles into the access token.
    #[serde(default)]
    pub access_token_role_assertion: bool,
    /// Put roles into the id token.
    #[serde(default)]
    pub id_token_role_assertion: bool,
    /// Put userinfo claims into the id token.
    #[serde(default)]
    pub id_token_userinfo_assertion: bool,
    /// Tolerated clock skew.
    #[serde(default, deserialize_with = "nanos")]
    pub clock_skew: Duration,
    /// Additional allowed CORS origins.
    #[serde(default)]
    pub additional_origins: Vec<String>,
    /// Skip the success page after native app login.
    #[serde(default)]
    pub skip_native_app_success_page: bool,
}

/// Payload of `project.application.config.oidc.changed`. Every field is
/// optional; only the ones present changed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfigChanged {
    /// Application id.
    pub app_id: String,
    #[serde(default)]
    pub oidc_version: Option<OidcVersion>,
    #[serde(default)]
    pub redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    pub response_types: Option<Vec<OidcResponseType>>,
    #[serde(default)]
    pub grant_types: Option<Vec<OidcGrantType>>,
    #[serde(default)]
    pub application_type: Option<OidcApplicationType>,
    #[serde(default)]
    pub auth_method_type: Option<OidcAuthMethodType>,
    #[serde(default)]
    pub post_logout_redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    pub dev_mode: Option<bool>,
    #[serde(default)]
    pub access_token_type: Option<OidcTokenType>,
    #[serde(default)]
    pub access_token_role_assertion: Option<bool>,
    #[serde(default)]
    pub id_token_role_assertion: Option<bool>,
    #[serde(default)]
    pub id_token_userinfo_assertion: Option<bool>,
    #[serde(default, deserialize_with = "optional_nanos")]
    pub clock_skew: Option<Duration>,
    #[serde(default)]
    pub additional_origins: Option<Vec<String>>,
    #[serde(default)]
    pub skip_native_app_success_page: Option<bool>,
}

// Durations travel as integer nanoseconds.
fn nanos<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_nanos)
}

fn optional_nanos<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_skew_is_nanoseconds() {
        let added: OidcConfigAdded =
            serde_json::from_str(r#"{"appId": "a", "clientId": "c", "clockSkew": 1000}"#).unwrap();
        assert_eq!(added.clock_skew, Duration::from_micros(1));

        let changed: OidcConfigChanged =
            serde_json::from_str(r#"{"appId": "a", "clockSkew": 2000}"#).unwrap();
        assert_eq!(changed.clock_skew, Some(Duration::from_micros(2)));

        let untouched: OidcConfigChanged = serde_json::from_str(r#"{"appId": "a"}"#).unwrap();
        assert_eq!(untouched.clock_skew, None);
    }

    #[test]
    fn secret_accepts_snake_case_key() {
        let changed: ClientSecretChanged =
            serde_json::from_str(r#"{"appId": "a", "client_secret": {"keyId": "k"}}"#).unwrap();

        assert_eq!(
            changed.client_secret,
            Some(serde_json::json!({"keyId": "k"}))
        );
    }
}
