//! Declarative capability advertisement and issuer discovery.
//!
//! Neither endpoint holds protocol state: provider metadata is a pure function of the
//! configuration and the discovery endpoint answers a WebFinger style issuer lookup.
use url::Url;

use crate::code_grant::ProviderConfig;

/// The fixed service identifier of the issuer discovery protocol.
pub const SWD_ISSUER: &str = "http://openid.net/specs/connect/1.0/issuer";

/// The provider configuration document served at the well-known location.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProviderMetadata {
    /// The issuer identity, base of all endpoint urls.
    pub issuer: String,

    /// Url of the authorization endpoint.
    pub authorization_endpoint: String,

    /// Url of the token endpoint.
    pub token_endpoint: String,

    /// Url of the userinfo endpoint.
    pub userinfo_endpoint: String,

    /// Url of the dynamic registration endpoint.
    pub registration_endpoint: String,

    /// Client authentication methods usable at the token endpoint.
    pub token_endpoint_auth_methods_supported: Vec<String>,

    /// The scopes this provider understands.
    pub scopes_supported: Vec<String>,

    /// Every supported combination of response types.
    pub response_types_supported: Vec<String>,

    /// Subject identifier types on offer.
    pub subject_types_supported: Vec<String>,

    /// Supported grant types at the token endpoint.
    pub grant_types_supported: Vec<String>,

    /// Claim representations the provider can produce.
    pub claim_types_supported: Vec<String>,

    /// The claim names the standard scopes resolve to.
    pub claims_supported: Vec<String>,

    /// Whether the `claims` request parameter is understood.
    pub claims_parameter_supported: bool,

    /// Whether inline request objects are understood.
    pub request_parameter_supported: bool,

    /// Whether `request_uri` references are understood.
    pub request_uri_parameter_supported: bool,

    /// Signature algorithms accepted for ID tokens.
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// Signature algorithms accepted for userinfo responses.
    pub userinfo_signing_alg_values_supported: Vec<String>,

    /// Signature algorithms accepted on request objects.
    pub request_object_signing_alg_values_supported: Vec<String>,

    /// Key management algorithms accepted for encrypted responses.
    pub id_token_encryption_alg_values_supported: Vec<String>,

    /// Content encryptions accepted for encrypted responses.
    pub id_token_encryption_enc_values_supported: Vec<String>,

    /// Where the provider's public keys are published, when they are.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
}

/// A WebFinger style discovery response.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DiscoveryResponse {
    /// The issuer locations serving the queried principal.
    pub locations: Vec<String>,
}

impl ProviderMetadata {
    /// Advertise the capabilities of a provider with the given configuration.
    pub fn from_config(config: &ProviderConfig, jwks_uri: Option<Url>) -> Self {
        let endpoint = |path: &str| {
            let mut url = config.issuer.clone();
            url.set_path(path);
            url.to_string()
        };

        let signing = vec![
            "RS256".to_string(),
            "ES256".to_string(),
            "HS256".to_string(),
            "HS384".to_string(),
            "HS512".to_string(),
        ];

        ProviderMetadata {
            issuer: config.issuer.to_string(),
            authorization_endpoint: endpoint("authorization"),
            token_endpoint: endpoint("token"),
            userinfo_endpoint: endpoint("userinfo"),
            registration_endpoint: endpoint("registration"),
            token_endpoint_auth_methods_supported: vec![
                "client_secret_post".to_string(),
                "client_secret_basic".to_string(),
            ],
            scopes_supported: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "address".to_string(),
                "phone".to_string(),
            ],
            response_types_supported: vec![
                "code".to_string(),
                "token".to_string(),
                "id_token".to_string(),
                "code token".to_string(),
                "code id_token".to_string(),
                "token id_token".to_string(),
                "code token id_token".to_string(),
                "none".to_string(),
            ],
            subject_types_supported: vec!["public".to_string(), "pairwise".to_string()],
            grant_types_supported: vec![
                "authorization_code".to_string(),
                "implicit".to_string(),
                "refresh_token".to_string(),
            ],
            claim_types_supported: vec!["normal".to_string()],
            claims_supported: vec![
                "sub".to_string(),
                "name".to_string(),
                "given_name".to_string(),
                "family_name".to_string(),
                "email".to_string(),
                "email_verified".to_string(),
                "address".to_string(),
                "phone_number".to_string(),
                "phone_number_verified".to_string(),
            ],
            claims_parameter_supported: true,
            request_parameter_supported: true,
            request_uri_parameter_supported: true,
            id_token_signing_alg_values_supported: signing.clone(),
            userinfo_signing_alg_values_supported: signing.clone(),
            request_object_signing_alg_values_supported: signing,
            id_token_encryption_alg_values_supported: vec![
                "dir".to_string(),
                "RSA1_5".to_string(),
                "RSA-OAEP".to_string(),
                "A128KW".to_string(),
            ],
            id_token_encryption_enc_values_supported: vec![
                "A128CBC".to_string(),
                "A256CBC".to_string(),
                "A128GCM".to_string(),
                "A256GCM".to_string(),
            ],
            jwks_uri: jwks_uri.map(|url| url.to_string()),
        }
    }
}

/// Answer an issuer discovery query.
///
/// Only the fixed issuer service is understood; anything else is the caller's bad request.
pub fn discover(config: &ProviderConfig, service: &str) -> Option<DiscoveryResponse> {
    if service != SWD_ISSUER {
        return None;
    }

    Some(DiscoveryResponse {
        locations: vec![config.issuer.to_string()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig::new("https://provider.example/".parse().unwrap(), b"seed")
    }

    #[test]
    fn metadata_points_at_the_issuer() {
        let metadata = ProviderMetadata::from_config(&config(), None);
        assert_eq!(metadata.issuer, "https://provider.example/");
        assert_eq!(metadata.authorization_endpoint, "https://provider.example/authorization");
        assert!(metadata
            .response_types_supported
            .contains(&"code token id_token".to_string()));

        let json = serde_json::to_string(&metadata).unwrap();
        assert!(!json.contains("jwks_uri"));
    }

    #[test]
    fn discovery_answers_the_issuer_service_only() {
        let response = discover(&config(), SWD_ISSUER).expect("The issuer service is supported");
        assert_eq!(response.locations, vec!["https://provider.example/".to_string()]);

        assert!(discover(&config(), "urn:some:other:service").is_none());
    }
}
