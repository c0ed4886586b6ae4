//! Dynamic client registration.
//!
//! Validates a registration request, resolves the sector identifier for pairwise clients,
//! allocates the client id and secret and persists the record. Reading a registration back
//! requires the registration access token minted here.
use chrono::{Duration, Utc};
use url::Url;

use crate::code_grant::error::{AccessTokenError, AccessTokenErrorType};
use crate::code_grant::{HttpFetch, ProviderConfig};
use crate::primitives::generator::{random_id, ClientSecretPolicy};
use crate::primitives::jose::{ContentEncryption, EncryptionAlg, SigningAlg};
use crate::primitives::registrar::{
    verify_host_binding, RedirectRecord, Registrar, Registration, SubjectType,
};

/// The body of a registration request, deserialized from json.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RegistrationRequest {
    /// The redirect uris the client wants to register. Required, never empty.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Human readable name of the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// Explicit sector grouping document for pairwise subjects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector_identifier_uri: Option<String>,

    /// Requested subject identifier handling, `public` or `pairwise`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<String>,

    /// Where the client documents its data usage policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_url: Option<String>,

    /// The logo displayed to end-users during authorization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,

    /// Requested ID token signature algorithm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_signed_response_alg: Option<String>,

    /// Requested ID token key management algorithm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_encrypted_response_alg: Option<String>,

    /// Requested ID token content encryption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_encrypted_response_enc: Option<String>,

    /// Requested userinfo signature algorithm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_signed_response_alg: Option<String>,

    /// Requested userinfo key management algorithm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_encrypted_response_alg: Option<String>,

    /// Requested userinfo content encryption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_encrypted_response_enc: Option<String>,

    /// Signature algorithm of the client's request objects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_object_signing_alg: Option<String>,

    /// The client's keys, published inline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks: Option<serde_json::Value>,

    /// The client's keys, published by reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
}

/// The public view of a registration, also the body of the registration response.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegistrationResponse {
    /// The allocated client identifier.
    pub client_id: String,

    /// The secret shared with the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// The bearer token for reading this registration back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_access_token: Option<String>,

    /// Where the registration can be read back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_client_uri: Option<String>,

    /// Unix timestamp of client id issuance.
    pub client_id_issued_at: i64,

    /// Unix timestamp after which the secret is no longer valid.
    pub client_secret_expires_at: i64,

    /// The registered redirect uris, in their combined form.
    pub redirect_uris: Vec<String>,

    /// The subject identifier handling in effect.
    pub subject_type: String,

    /// Echo of the registered policy document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_url: Option<String>,

    /// Echo of the registered logo.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

/// Required functionality to respond to registration requests.
pub trait Endpoint {
    /// The client database; mutable so that allocate-check-insert is one exclusive sequence.
    fn registrar(&mut self) -> &mut dyn Registrar;

    /// Bounded fetching of sector identifier documents and jwks references.
    fn http(&self) -> &dyn HttpFetch;

    /// The ambient provider configuration.
    fn config(&self) -> &ProviderConfig;
}

/// Failures of the registration endpoint.
#[derive(Debug)]
pub enum Error {
    /// Answer with the contained error body (`400`).
    Invalid(AccessTokenError),

    /// The bearer token did not authorize the requested registration (`401`).
    Unauthorized,

    /// An underlying primitive failed.
    Primitive,
}

type Result<T> = std::result::Result<T, Error>;

/// Register a new client.
pub fn register(endpoint: &mut dyn Endpoint, request: &RegistrationRequest) -> Result<RegistrationResponse> {
    if request.redirect_uris.is_empty() {
        return Err(Error::parameter("Missing redirect_uris"));
    }

    // 1. No registered uri may carry a fragment.
    let mut records = Vec::new();
    for uri in &request.redirect_uris {
        let parsed: Url = uri
            .parse()
            .map_err(|_| Error::parameter("Malformed redirect_uri"))?;
        if parsed.fragment().is_some() {
            return Err(Error::parameter("redirect_uri contains fragment"));
        }
        records.push(RedirectRecord::new(&parsed));
    }

    let subject_type = match request.subject_type.as_deref() {
        None => endpoint.config().preferred_subject_type,
        Some("public") => SubjectType::Public,
        Some("pairwise") => SubjectType::Pairwise,
        Some(_) => return Err(Error::parameter("Unknown subject_type")),
    };

    // 2./3. Resolve the sector: an explicit document wins, otherwise multiple redirect uris
    // must share one host and the host becomes the implicit sector.
    let mut si_redirects = None;
    let sector_id = if let Some(si_url) = &request.sector_identifier_uri {
        let si_parsed: Url = si_url
            .parse()
            .map_err(|_| Error::parameter("Malformed sector_identifier_uri"))?;
        let body = endpoint.http().fetch(&si_parsed).map_err(|err| {
            error!("sector_identifier_uri fetch failed: {}", err);
            Error::parameter("Couldn't open sector_identifier_uri")
        })?;
        let listed: Vec<String> = serde_json::from_str(&body)
            .map_err(|_| Error::parameter("Error deserializing sector_identifier_uri content"))?;

        for uri in &request.redirect_uris {
            if !listed.contains(uri) {
                return Err(Error::parameter("redirect_uri missing from sector_identifiers"));
            }
        }

        si_redirects = Some(listed);
        Some(si_url.clone())
    } else {
        let mut host: Option<&str> = None;
        for record in &records {
            let this = record.base.host_str().unwrap_or_default();
            match host {
                None => host = Some(this),
                Some(host) if host == this => (),
                Some(_) => {
                    return Err(Error::parameter("'sector_identifier_uri' must be registered"))
                }
            }
        }
        match subject_type {
            SubjectType::Pairwise => host.map(str::to_string),
            SubjectType::Public => None,
        }
    };

    // 4. Presentation urls must live on a registered redirect origin.
    let policy_url = bound_url(&request.policy_url, &records, "policy_url")?;
    let logo_url = bound_url(&request.logo_url, &records, "logo_url")?;

    // The client's keys, inline or fetched by reference.
    let jwks = match (&request.jwks, &request.jwks_uri) {
        (Some(jwks), _) => Some(jwks.clone()),
        (None, Some(jwks_uri)) => {
            let jwks_parsed: Url = jwks_uri
                .parse()
                .map_err(|_| Error::parameter("Malformed jwks_uri"))?;
            let body = endpoint
                .http()
                .fetch(&jwks_parsed)
                .map_err(|_| Error::parameter("Couldn't open jwks_uri"))?;
            Some(
                serde_json::from_str(&body)
                    .map_err(|_| Error::parameter("Error deserializing jwks_uri content"))?,
            )
        }
        (None, None) => None,
    };

    // 5. Allocate an id that is free, then derive the secret from it.
    let mut client_id = random_id(12);
    while endpoint.registrar().contains(&client_id) {
        client_id = random_id(12);
    }
    let secret_policy = ClientSecretPolicy::new(&endpoint.config().seed);
    let client_secret = secret_policy.derive(&client_id);
    let registration_access_token = random_id(32);

    let now = Utc::now();
    let registration = Registration {
        client_id: client_id.clone(),
        client_secret,
        registration_access_token,
        redirect_uris: records,
        sector_id,
        si_redirects,
        subject_type,
        id_token_signed_response_alg: parse_signing(&request.id_token_signed_response_alg)?,
        id_token_encrypted_response_alg: parse_encryption(&request.id_token_encrypted_response_alg)?,
        id_token_encrypted_response_enc: parse_content(&request.id_token_encrypted_response_enc)?,
        userinfo_signed_response_alg: parse_signing(&request.userinfo_signed_response_alg)?,
        userinfo_encrypted_response_alg: parse_encryption(&request.userinfo_encrypted_response_alg)?,
        userinfo_encrypted_response_enc: parse_content(&request.userinfo_encrypted_response_enc)?,
        request_object_signing_alg: parse_signing(&request.request_object_signing_alg)?,
        policy_url,
        logo_url,
        jwks,
        issued_at: now,
        secret_expires_at: now + Duration::seconds(86400),
    };

    let response = public_view(&registration, endpoint.config());

    // 6. Persist; the registrar holds the keys for later signature lookups.
    endpoint
        .registrar()
        .register(registration)
        .map_err(|_| Error::Primitive)?;
    info!("Registered client {}", client_id);

    Ok(response)
}

/// Read a registration back, authorized by its registration access token.
///
/// The client id in the query must match the one the token was minted for.
pub fn read_registration(
    endpoint: &mut dyn Endpoint, bearer: &str, client_id: &str,
) -> Result<RegistrationResponse> {
    let config = endpoint.config().clone();
    let registrar = endpoint.registrar();

    let owner = match registrar.client_of_registration_token(bearer) {
        Some(owner) => owner.to_string(),
        None => return Err(Error::Unauthorized),
    };

    if owner != client_id {
        return Err(Error::Unauthorized);
    }

    let registration = registrar.lookup(&owner).ok_or(Error::Primitive)?;
    Ok(public_view(registration, &config))
}

fn public_view(registration: &Registration, config: &ProviderConfig) -> RegistrationResponse {
    let mut registration_client_uri = config.issuer.clone();
    registration_client_uri.set_path("registration");
    registration_client_uri.set_query(Some(&format!("client_id={}", registration.client_id)));

    RegistrationResponse {
        client_id: registration.client_id.clone(),
        client_secret: Some(registration.client_secret.clone()),
        registration_access_token: Some(registration.registration_access_token.clone()),
        registration_client_uri: Some(registration_client_uri.to_string()),
        client_id_issued_at: registration.issued_at.timestamp(),
        client_secret_expires_at: registration.secret_expires_at.timestamp(),
        redirect_uris: registration
            .redirect_uris
            .iter()
            .map(RedirectRecord::display_uri)
            .collect(),
        subject_type: match registration.subject_type {
            SubjectType::Public => "public".to_string(),
            SubjectType::Pairwise => "pairwise".to_string(),
        },
        policy_url: registration.policy_url.as_ref().map(Url::to_string),
        logo_url: registration.logo_url.as_ref().map(Url::to_string),
    }
}

fn bound_url(
    requested: &Option<String>, records: &[RedirectRecord], name: &'static str,
) -> Result<Option<Url>> {
    let raw = match requested {
        Some(raw) => raw,
        None => return Ok(None),
    };
    let url: Url = raw
        .parse()
        .map_err(|_| Error::parameter_owned(format!("Malformed {}", name)))?;
    if !verify_host_binding(&url, records) {
        return Err(Error::parameter_owned(format!("{} pointed to illegal URL", name)));
    }
    Ok(Some(url))
}

fn parse_signing(raw: &Option<String>) -> Result<Option<SigningAlg>> {
    match raw {
        None => Ok(None),
        Some(name) => SigningAlg::from_name(name)
            .map(Some)
            .ok_or_else(|| Error::parameter("Unsupported signing algorithm")),
    }
}

fn parse_encryption(raw: &Option<String>) -> Result<Option<EncryptionAlg>> {
    match raw {
        None => Ok(None),
        Some(name) => EncryptionAlg::from_name(name)
            .map(Some)
            .ok_or_else(|| Error::parameter("Unsupported encryption algorithm")),
    }
}

fn parse_content(raw: &Option<String>) -> Result<Option<ContentEncryption>> {
    match raw {
        None => Ok(None),
        Some(name) => ContentEncryption::from_name(name)
            .map(Some)
            .ok_or_else(|| Error::parameter("Unsupported content encryption")),
    }
}

impl Error {
    fn parameter(descr: &'static str) -> Self {
        let mut error = AccessTokenError::new(AccessTokenErrorType::InvalidConfigurationParameter);
        error.explain(descr);
        Error::Invalid(error)
    }

    fn parameter_owned(descr: String) -> Self {
        let mut error = AccessTokenError::new(AccessTokenErrorType::InvalidConfigurationParameter);
        error.explain(descr);
        Error::Invalid(error)
    }

    /// Get a handle to the description the client will receive.
    pub fn description(&mut self) -> Option<&mut AccessTokenError> {
        match self {
            Error::Invalid(description) => Some(description),
            Error::Unauthorized => None,
            Error::Primitive => None,
        }
    }
}
