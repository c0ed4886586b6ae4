//! Registrars administer a database of known clients.
//!
//! The registrar governs the redirect uris a client may be contacted under, the algorithm
//! preferences it registered for its response artifacts, and its authentication secret. When
//! an authorization request turns up, it is the registrars duty to resolve the requested
//! redirect uri against the registered records; nothing may be sent to a uri that did not
//! match.
use super::Time;
use super::jose::{ArtifactKind, ContentEncryption, EncryptionAlg, SigningAlg};

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use argon2::{self, Config};
use once_cell::sync::Lazy;
use rand::{thread_rng, RngCore};
use url::{Position, Url};

/// A registered redirect uri together with its registered query parameters.
///
/// The base is matched exactly or as a prefix of the candidate uri. Every registered query
/// parameter must reappear in the candidate with at least one matching value; query
/// parameters of the candidate that were never registered are ignored.
#[derive(Clone, Debug, PartialEq)]
pub struct RedirectRecord {
    /// The registered uri without its query component.
    pub base: Url,

    /// Query parameters that must be present on any matching candidate.
    pub query: Vec<(String, Vec<String>)>,
}

/// Subject identifier handling registered for the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubjectType {
    /// The same subject identifier for every client.
    Public,
    /// Subject identifiers scoped to the client's sector, unlinkable across sectors.
    Pairwise,
}

/// Everything the provider stores about one registered client.
#[derive(Clone, Debug)]
pub struct Registration {
    /// The allocated client identifier.
    pub client_id: String,

    /// The secret shared with the client.
    ///
    /// Kept in the record because the symmetric algorithm families (`HS*` signing, `dir`
    /// encryption) use it as key material; authentication checks go through the encoded form
    /// held by the registrar instead.
    pub client_secret: String,

    /// Bearer token authorizing the client to read its own registration.
    pub registration_access_token: String,

    /// The redirect uris the client may be contacted under.
    pub redirect_uris: Vec<RedirectRecord>,

    /// The sector grouping key, for pairwise subject identifiers.
    pub sector_id: Option<String>,

    /// The uris listed by the sector identifier document, when one was fetched.
    pub si_redirects: Option<Vec<String>>,

    /// How subject identifiers are computed for this client.
    pub subject_type: SubjectType,

    /// Requested signature algorithm for ID tokens. Defaults to `RS256` when absent.
    pub id_token_signed_response_alg: Option<SigningAlg>,

    /// Key management algorithm for encrypted ID tokens. Absent means unencrypted.
    pub id_token_encrypted_response_alg: Option<EncryptionAlg>,

    /// Content encryption for encrypted ID tokens. Defaults to `A128CBC` when absent.
    pub id_token_encrypted_response_enc: Option<ContentEncryption>,

    /// Requested signature algorithm for userinfo responses. Absent means plain JSON.
    pub userinfo_signed_response_alg: Option<SigningAlg>,

    /// Key management algorithm for encrypted userinfo responses.
    pub userinfo_encrypted_response_alg: Option<EncryptionAlg>,

    /// Content encryption for encrypted userinfo responses.
    pub userinfo_encrypted_response_enc: Option<ContentEncryption>,

    /// Signature algorithm the client uses on its request objects.
    pub request_object_signing_alg: Option<SigningAlg>,

    /// Where the client documents its data usage policy.
    pub policy_url: Option<Url>,

    /// The logo displayed to end-users during authorization.
    pub logo_url: Option<Url>,

    /// The keys the client published at registration, as a JWKS document.
    pub jwks: Option<serde_json::Value>,

    /// When the client id was issued (Utc).
    pub issued_at: Time,

    /// When the client secret expires (Utc).
    pub secret_expires_at: Time,
}

/// A pair of client id and the redirect uri the request asked for, if any.
///
/// A registrar which allows multiple uris per client uses the optional uri to choose the
/// correct record. A client with a single registered uri may omit the parameter entirely.
#[derive(Clone, Debug)]
pub struct ClientUrl<'a> {
    /// The identifier indicated by the request.
    pub client_id: Cow<'a, str>,

    /// The parsed uri, if the request carried one.
    pub redirect_uri: Option<Cow<'a, Url>>,
}

/// A client and its resolved redirection endpoint.
#[derive(Clone, Debug)]
pub struct BoundRedirect<'a> {
    /// The identifier of the client, moved from the request.
    pub client_id: Cow<'a, str>,

    /// The redirect uri every further response for this request will be sent to.
    pub redirect_uri: Cow<'a, Url>,
}

/// Handled failures of a registrar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrarError {
    /// The client id does not belong to any registered client.
    UnknownClient,

    /// The requested redirect uri carried a fragment or matched no registered record.
    RedirectUri,

    /// The request omitted the redirect uri and no unambiguous default exists.
    Parameter,

    /// The client could not be authenticated.
    Unauthorized,

    /// Something went wrong with this primitive that has no security reason.
    PrimitiveError,
}

/// Registrars provide the protocol view onto the client database.
pub trait Registrar {
    /// Determine the redirect uri for the request, or refuse it.
    ///
    /// Resolution never trusts the requested uri before it matched a registered record, see
    /// [`RedirectRecord`] for the matching rules.
    ///
    /// [`RedirectRecord`]: struct.RedirectRecord.html
    fn resolve<'a>(&self, bound: ClientUrl<'a>) -> Result<BoundRedirect<'a>, RegistrarError>;

    /// The full registration record of a client.
    fn lookup(&self, client_id: &str) -> Option<&Registration>;

    /// Whether a client id is already taken.
    fn contains(&self, client_id: &str) -> bool;

    /// Try to login as client with some authentication.
    fn check(&self, client_id: &str, passphrase: Option<&[u8]>) -> Result<(), RegistrarError>;

    /// Insert or update a registration record.
    fn register(&mut self, registration: Registration) -> Result<(), RegistrarError>;

    /// Resolve a registration access token to the client id it was minted for.
    fn client_of_registration_token(&self, token: &str) -> Option<&str>;
}

/// True iff the uri's scheme and host match some registered redirect uri.
///
/// Gates `policy_url` and `logo_url`: a client must not decorate the login screen with
/// content hosted outside the origins it registered redirects for.
pub fn verify_host_binding(url: &Url, records: &[RedirectRecord]) -> bool {
    records
        .iter()
        .any(|record| record.base.scheme() == url.scheme() && record.base.host_str() == url.host_str())
}

impl RedirectRecord {
    /// Split a registered uri into its base and registered query parameters.
    pub fn new(uri: &Url) -> Self {
        let base: Url = uri[..Position::BeforeQuery]
            .parse()
            .expect("a uri without its query component remains a uri");

        let mut query: Vec<(String, Vec<String>)> = Vec::new();
        for (key, value) in uri.query_pairs() {
            match query.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, values)) => values.push(value.into_owned()),
                None => query.push((key.into_owned(), vec![value.into_owned()])),
            }
        }

        RedirectRecord {
            base,
            query,
        }
    }

    /// Whether the candidate uri is covered by this record.
    pub fn matches(&self, candidate: &Url) -> bool {
        if candidate.fragment().is_some() {
            return false;
        }

        let candidate_base = &candidate[..Position::BeforeQuery];
        if candidate_base != self.base.as_str() && !candidate.as_str().starts_with(self.base.as_str()) {
            return false;
        }

        let candidate_query: Vec<(Cow<str>, Cow<str>)> = candidate.query_pairs().collect();
        self.query.iter().all(|(key, values)| {
            let present: Vec<&str> = candidate_query
                .iter()
                .filter(|(candidate_key, _)| candidate_key == key)
                .map(|(_, value)| value.as_ref())
                .collect();
            if present.is_empty() {
                return false;
            }
            values.is_empty() || values.iter().any(|value| present.contains(&value.as_str()))
        })
    }

    /// The registered uri in its combined form, query included.
    pub fn display_uri(&self) -> String {
        if self.query.is_empty() {
            return self.base.to_string();
        }
        let mut uri = self.base.clone();
        {
            let mut pairs = uri.query_pairs_mut();
            for (key, values) in &self.query {
                for value in values {
                    pairs.append_pair(key, value);
                }
            }
        }
        uri.to_string()
    }
}

impl Registration {
    /// The signature algorithm registered for an artifact, if any.
    pub fn signing_alg(&self, kind: ArtifactKind) -> Option<SigningAlg> {
        match kind {
            ArtifactKind::IdToken => self.id_token_signed_response_alg,
            ArtifactKind::Userinfo => self.userinfo_signed_response_alg,
            ArtifactKind::RequestObject => self.request_object_signing_alg,
        }
    }

    /// The encryption parameters registered for an artifact.
    ///
    /// `None` means the artifact leaves the provider unencrypted. The content encryption
    /// defaults to `A128CBC` when the client declared an algorithm without an encoding.
    pub fn encryption(&self, kind: ArtifactKind) -> Option<(EncryptionAlg, ContentEncryption)> {
        let (alg, enc) = match kind {
            ArtifactKind::IdToken => (
                self.id_token_encrypted_response_alg,
                self.id_token_encrypted_response_enc,
            ),
            ArtifactKind::Userinfo => (
                self.userinfo_encrypted_response_alg,
                self.userinfo_encrypted_response_enc,
            ),
            ArtifactKind::RequestObject => (None, None),
        };
        alg.map(|alg| (alg, enc.unwrap_or_default()))
    }
}

/// Determines how client secrets are stored and checked.
///
/// The provided library implementation is based on `Argon2`.
pub trait PasswordPolicy: Send + Sync {
    /// Transform the passphrase so it can be stored by the registrar.
    fn store(&self, client_id: &str, passphrase: &[u8]) -> Vec<u8>;

    /// Check if the stored data corresponds to that of the client id and passphrase.
    fn check(&self, client_id: &str, passphrase: &[u8], stored: &[u8]) -> Result<(), RegistrarError>;
}

/// Store passwords using `Argon2` to derive the stored value.
#[derive(Clone, Debug, Default)]
pub struct Argon2 {}

impl PasswordPolicy for Argon2 {
    fn store(&self, client_id: &str, passphrase: &[u8]) -> Vec<u8> {
        let mut config = Config::default();
        config.ad = client_id.as_bytes();
        config.secret = &[];

        let mut salt = vec![0; 32];
        thread_rng()
            .try_fill_bytes(salt.as_mut_slice())
            .expect("Failed to generate password salt");

        let encoded = argon2::hash_encoded(passphrase, &salt, &config);
        encoded.unwrap().as_bytes().to_vec()
    }

    fn check(&self, client_id: &str, passphrase: &[u8], stored: &[u8]) -> Result<(), RegistrarError> {
        let hash = String::from_utf8(stored.to_vec());
        let valid = match hash {
            Ok(hash) => argon2::verify_encoded_ext(&hash, passphrase, &[], client_id.as_bytes())
                .map_err(|_| RegistrarError::Unauthorized),
            _ => Err(RegistrarError::Unauthorized),
        };

        match valid {
            Ok(true) => Ok(()),
            _ => Err(RegistrarError::Unauthorized),
        }
    }
}

static DEFAULT_PASSWORD_POLICY: Lazy<Argon2> = Lazy::new(Argon2::default);

/// A very simple, in-memory hash map of client ids to registration records.
#[derive(Default)]
pub struct ClientMap {
    clients: HashMap<String, Registration>,
    passdata: HashMap<String, Vec<u8>>,
    registration_tokens: HashMap<String, String>,
    password_policy: Option<Box<dyn PasswordPolicy>>,
}

impl ClientMap {
    /// Create an empty map without any clients in it.
    pub fn new() -> ClientMap {
        ClientMap::default()
    }

    /// Change how secrets are encoded while stored.
    pub fn set_password_policy<P: PasswordPolicy + 'static>(&mut self, new_policy: P) {
        self.password_policy = Some(Box::new(new_policy))
    }

    // This is not an instance method because it needs to borrow the box but register needs &mut
    fn current_policy(policy: &Option<Box<dyn PasswordPolicy>>) -> &dyn PasswordPolicy {
        policy
            .as_ref()
            .map(|boxed| &**boxed)
            .unwrap_or(&*DEFAULT_PASSWORD_POLICY)
    }
}

impl Registrar for ClientMap {
    fn resolve<'a>(&self, bound: ClientUrl<'a>) -> Result<BoundRedirect<'a>, RegistrarError> {
        let client = match self.clients.get(bound.client_id.as_ref()) {
            None => return Err(RegistrarError::UnknownClient),
            Some(stored) => stored,
        };

        match bound.redirect_uri {
            None => {
                // A single registered uri is an unambiguous default.
                if client.redirect_uris.len() != 1 {
                    return Err(RegistrarError::Parameter);
                }
                Ok(BoundRedirect {
                    client_id: bound.client_id,
                    redirect_uri: Cow::Owned(client.redirect_uris[0].base.clone()),
                })
            }
            Some(url) => {
                if url.fragment().is_some() {
                    info!("Rejected redirect uri with fragment for {}", client.client_id);
                    return Err(RegistrarError::RedirectUri);
                }
                if !client.redirect_uris.iter().any(|record| record.matches(&url)) {
                    info!("Redirect uri matched no registered record for {}", client.client_id);
                    return Err(RegistrarError::RedirectUri);
                }
                Ok(BoundRedirect {
                    client_id: bound.client_id,
                    redirect_uri: url,
                })
            }
        }
    }

    fn lookup(&self, client_id: &str) -> Option<&Registration> {
        self.clients.get(client_id)
    }

    fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    fn check(&self, client_id: &str, passphrase: Option<&[u8]>) -> Result<(), RegistrarError> {
        let policy = Self::current_policy(&self.password_policy);

        let stored = self
            .passdata
            .get(client_id)
            .ok_or(RegistrarError::UnknownClient)?;

        match passphrase {
            Some(provided) => policy.check(client_id, provided, stored),
            None => Err(RegistrarError::Unauthorized),
        }
    }

    fn register(&mut self, registration: Registration) -> Result<(), RegistrarError> {
        let policy = Self::current_policy(&self.password_policy);
        let encoded = policy.store(&registration.client_id, registration.client_secret.as_bytes());

        self.passdata.insert(registration.client_id.clone(), encoded);
        self.registration_tokens.insert(
            registration.registration_access_token.clone(),
            registration.client_id.clone(),
        );
        self.clients.insert(registration.client_id.clone(), registration);
        Ok(())
    }

    fn client_of_registration_token(&self, token: &str) -> Option<&str> {
        self.registration_tokens.get(token).map(String::as_str)
    }
}

impl fmt::Display for RegistrarError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegistrarError::UnknownClient => fmt.write_str("unknown client"),
            RegistrarError::RedirectUri => fmt.write_str("redirect uri matched no registered record"),
            RegistrarError::Parameter => {
                fmt.write_str("missing redirect_uri and more than one or none registered")
            }
            RegistrarError::Unauthorized => fmt.write_str("client authentication failed"),
            RegistrarError::PrimitiveError => fmt.write_str("registrar failed internally"),
        }
    }
}

impl std::error::Error for RegistrarError {}

#[cfg(test)]
pub mod tests {
    use super::*;
    use chrono::Utc;

    /// A registration record with every optional member empty.
    pub fn bare_registration(client_id: &str, redirect_uri: &str) -> Registration {
        Registration {
            client_id: client_id.to_string(),
            client_secret: "cf0f1a9a6e6d4a7b".to_string(),
            registration_access_token: format!("rat-{}", client_id),
            redirect_uris: vec![RedirectRecord::new(&redirect_uri.parse().unwrap())],
            sector_id: None,
            si_redirects: None,
            subject_type: SubjectType::Public,
            id_token_signed_response_alg: None,
            id_token_encrypted_response_alg: None,
            id_token_encrypted_response_enc: None,
            userinfo_signed_response_alg: None,
            userinfo_encrypted_response_alg: None,
            userinfo_encrypted_response_enc: None,
            request_object_signing_alg: None,
            policy_url: None,
            logo_url: None,
            jwks: None,
            issued_at: Utc::now(),
            secret_expires_at: Utc::now() + chrono::Duration::days(1),
        }
    }

    fn resolve_str(map: &ClientMap, client_id: &str, uri: Option<&str>) -> Result<String, RegistrarError> {
        let parsed = uri.map(|uri| uri.parse::<Url>().unwrap());
        map.resolve(ClientUrl {
            client_id: Cow::Borrowed(client_id),
            redirect_uri: parsed.as_ref().map(Cow::Borrowed),
        })
        .map(|bound| bound.redirect_uri.to_string())
    }

    #[test]
    fn exact_and_prefix_matching() {
        let mut map = ClientMap::new();
        map.register(bare_registration("Client", "https://client.example/cb"))
            .unwrap();

        assert!(resolve_str(&map, "Client", Some("https://client.example/cb")).is_ok());
        assert!(resolve_str(&map, "Client", Some("https://client.example/cb/deeper")).is_ok());
        assert_eq!(
            resolve_str(&map, "Client", Some("https://other.example/cb")),
            Err(RegistrarError::RedirectUri)
        );
        assert_eq!(
            resolve_str(&map, "Unknown", Some("https://client.example/cb")),
            Err(RegistrarError::UnknownClient)
        );
    }

    #[test]
    fn fragments_never_match() {
        let mut map = ClientMap::new();
        map.register(bare_registration("Client", "https://client.example/cb"))
            .unwrap();

        assert_eq!(
            resolve_str(&map, "Client", Some("https://client.example/cb#fragment")),
            Err(RegistrarError::RedirectUri)
        );
    }

    #[test]
    fn registered_query_parameters_required() {
        let mut map = ClientMap::new();
        map.register(bare_registration("Client", "https://client.example/cb?tenant=a&tenant=b"))
            .unwrap();

        // At least one registered value must reappear, extra parameters are ignored.
        assert!(resolve_str(&map, "Client", Some("https://client.example/cb?tenant=a&extra=1")).is_ok());
        assert!(resolve_str(&map, "Client", Some("https://client.example/cb?tenant=b")).is_ok());
        assert_eq!(
            resolve_str(&map, "Client", Some("https://client.example/cb?tenant=c")),
            Err(RegistrarError::RedirectUri)
        );
        assert_eq!(
            resolve_str(&map, "Client", Some("https://client.example/cb")),
            Err(RegistrarError::RedirectUri)
        );
    }

    #[test]
    fn missing_uri_defaults_only_when_unambiguous() {
        let mut map = ClientMap::new();
        map.register(bare_registration("Single", "https://client.example/cb"))
            .unwrap();

        let mut two = bare_registration("Double", "https://client.example/cb");
        two.redirect_uris
            .push(RedirectRecord::new(&"https://client.example/other".parse().unwrap()));
        map.register(two).unwrap();

        assert_eq!(
            resolve_str(&map, "Single", None).unwrap(),
            "https://client.example/cb"
        );
        assert_eq!(resolve_str(&map, "Double", None), Err(RegistrarError::Parameter));
    }

    #[test]
    fn host_binding() {
        let records = vec![RedirectRecord::new(&"https://client.example/cb".parse().unwrap())];

        assert!(verify_host_binding(
            &"https://client.example/policy.html".parse().unwrap(),
            &records
        ));
        assert!(!verify_host_binding(
            &"https://cdn.example/logo.png".parse().unwrap(),
            &records
        ));
        assert!(!verify_host_binding(
            &"http://client.example/policy.html".parse().unwrap(),
            &records
        ));
    }

    #[test]
    fn secret_checks() {
        let mut map = ClientMap::new();
        let registration = bare_registration("Client", "https://client.example/cb");
        let secret = registration.client_secret.clone();
        map.register(registration).unwrap();

        map.check("Client", Some(secret.as_bytes()))
            .expect("Authentication with the right secret failed");
        assert_eq!(
            map.check("Client", Some(b"wrong secret")),
            Err(RegistrarError::Unauthorized)
        );
        assert_eq!(map.check("Client", None), Err(RegistrarError::Unauthorized));
        assert_eq!(
            map.check("Missing", Some(secret.as_bytes())),
            Err(RegistrarError::UnknownClient)
        );
    }

    #[test]
    fn registration_token_resolution() {
        let mut map = ClientMap::new();
        map.register(bare_registration("Client", "https://client.example/cb"))
            .unwrap();

        assert_eq!(map.client_of_registration_token("rat-Client"), Some("Client"));
        assert_eq!(map.client_of_registration_token("other"), None);
    }
}
