//! Resolves access tokens into end-user attribute responses.
//!
//! The claim set served for a token is derived, never stored: the union of the claim names
//! its scope implies and the claims an embedded request object asked for explicitly, the
//! latter winning on conflicts. Values come from an external user-info collaborator, the
//! response is sealed exactly like an ID token.
use std::borrow::Cow;
use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::code_grant::error::{AccessTokenError, AccessTokenErrorType};
use crate::code_grant::id_token::{IdTokenPipeline, SealedUserInfo};
use crate::primitives::grant::{ClaimEntry, Grant};
use crate::primitives::jose::Jose;
use crate::primitives::registrar::Registrar;
use crate::primitives::scope::claims_for;
use crate::primitives::sessions::{GrantStore, TokenKind};

/// The merged set of requested claims, by name.
///
/// An entry of `None` requests the claim in its default manner, `Some` carries the markers of
/// the request object (`essential`, pinned values).
pub type RequestedClaims = HashMap<String, Option<ClaimEntry>>;

/// Supplies attribute values for end-users.
///
/// The provider behind this trait owns the actual user store. It receives the locally known
/// subject and the merged claim names and returns whatever attribute values it holds; claim
/// names it knows nothing about are simply absent from the result.
pub trait UserInfoProvider {
    /// Fetch the values of the named claims for one subject.
    fn fetch(&self, subject: &str, claims: &RequestedClaims) -> std::result::Result<Map<String, Value>, ()>;
}

impl<'s, P: UserInfoProvider + ?Sized> UserInfoProvider for &'s P {
    fn fetch(&self, subject: &str, claims: &RequestedClaims) -> std::result::Result<Map<String, Value>, ()> {
        (**self).fetch(subject, claims)
    }
}

/// Trait based retrieval of parameters necessary for userinfo request handling.
pub trait Request {
    /// False if the request was received but malformed.
    fn valid(&self) -> bool;

    /// The bearer access token, from the Authorization header or the form body.
    fn access_token(&self) -> Option<Cow<str>>;
}

/// Required functionality to respond to userinfo requests.
pub trait Endpoint {
    /// The store holding the grants behind issued tokens.
    fn sessions(&mut self) -> &mut dyn GrantStore;

    /// The client database, for response sealing preferences.
    fn registrar(&self) -> &dyn Registrar;

    /// The collaborator holding end-user attributes.
    fn user_info(&self) -> &dyn UserInfoProvider;

    /// The JOSE backend sealing the response.
    fn jose(&self) -> &dyn Jose;

    /// The provider identity, for `iss` and pairwise subjects.
    fn issuer(&self) -> &str;

    /// The seed entering pairwise subject derivation.
    fn pairwise_seed(&self) -> &[u8];
}

/// Defines the failure modes of a userinfo request.
pub enum Error {
    /// The request or token did not check out, answer with the contained error body.
    Invalid(AccessTokenError),

    /// An underlying primitive or collaborator failed.
    Primitive,
}

type Result<T> = std::result::Result<T, Error>;

/// The claim names the grant's scope and embedded request resolve to for userinfo.
///
/// Scope tokens are mapped through the fixed standard table; explicit entries of the request
/// object override the scope-derived defaults for the same claim.
pub fn requested_userinfo_claims(grant: &Grant) -> RequestedClaims {
    let mut claims: RequestedClaims = HashMap::new();

    for token in grant.scope.iter() {
        if let Some(names) = claims_for(token) {
            for name in names {
                claims.entry((*name).to_string()).or_insert(None);
            }
        }
    }

    if let Some(explicit) = grant.oidc_request.as_ref().and_then(|req| req.userinfo_claims()) {
        for (name, entry) in explicit {
            claims.insert(name.clone(), entry.clone());
        }
    }

    claims
}

/// The user info to embed into an ID token, when the request object asked for any.
///
/// Returns `None` when the embedded request named no `claims.id_token` entries, in which case
/// the ID token carries only the standard claims.
pub fn user_info_for_id_token(
    provider: &dyn UserInfoProvider, grant: &Grant,
) -> std::result::Result<Option<Map<String, Value>>, ()> {
    let requested = match grant.oidc_request.as_ref().and_then(|req| req.claims.as_ref()) {
        Some(claims) => match &claims.id_token {
            Some(entries) if !entries.is_empty() => entries.clone(),
            _ => return Ok(None),
        },
        None => return Ok(None),
    };

    provider.fetch(&grant.owner_id, &requested).map(Some)
}

/// Answer a userinfo request for a bearer access token.
pub fn userinfo(endpoint: &mut dyn Endpoint, request: &dyn Request) -> Result<SealedUserInfo> {
    if !request.valid() {
        return Err(Error::invalid(AccessTokenErrorType::InvalidRequest));
    }

    let token = request
        .access_token()
        .ok_or_else(|| Error::invalid(AccessTokenErrorType::InvalidRequest))?;
    let token = token.as_ref();

    // Only access tokens open the userinfo endpoint, codes and refresh tokens do not.
    match endpoint.sessions().token_kind(token).map_err(|_| Error::Primitive)? {
        Some(TokenKind::Access) => (),
        _ => {
            let mut error = AccessTokenError::new(AccessTokenErrorType::FailedAuthentication);
            error.explain("Wrong type of token");
            return Err(Error::Invalid(error));
        }
    }

    if endpoint.sessions().is_revoked(token).map_err(|_| Error::Primitive)? {
        let mut error = AccessTokenError::new(AccessTokenErrorType::AccessDenied);
        error.explain("Token is revoked");
        return Err(Error::Invalid(error));
    }

    let grant = endpoint
        .sessions()
        .lookup(token)
        .map_err(|_| Error::Primitive)?
        .ok_or_else(|| Error::invalid(AccessTokenErrorType::InvalidRequest))?;

    let registration = match endpoint.registrar().lookup(&grant.client_id) {
        Some(registration) => registration.clone(),
        None => return Err(Error::Primitive),
    };

    let claims = requested_userinfo_claims(&grant);
    debug!("Userinfo claims for {}: {:?}", grant.owner_id, claims.keys());

    let mut info = endpoint
        .user_info()
        .fetch(&grant.owner_id, &claims)
        .map_err(|()| Error::Primitive)?;

    let pipeline = IdTokenPipeline::new(endpoint.jose(), endpoint.issuer(), endpoint.pairwise_seed());
    info.insert(
        "sub".to_string(),
        Value::from(pipeline.subject(&grant, &registration)),
    );

    pipeline
        .seal_userinfo(&info, &registration)
        .map_err(|_| Error::Primitive)
}

impl Error {
    fn invalid(kind: AccessTokenErrorType) -> Self {
        Error::Invalid(AccessTokenError::new(kind))
    }

    /// Get a handle to the description the client will receive.
    pub fn description(&mut self) -> Option<&mut AccessTokenError> {
        match self {
            Error::Invalid(description) => Some(description),
            Error::Primitive => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::generator::RandomGenerator;
    use crate::primitives::grant::{ClaimsRequest, OidcRequest};
    use crate::primitives::jose::SecretJose;
    use crate::primitives::registrar::tests::bare_registration;
    use crate::primitives::registrar::ClientMap;
    use crate::primitives::sessions::SessionMap;
    use chrono::Utc;

    struct StaticUserInfo;

    impl UserInfoProvider for StaticUserInfo {
        fn fetch(&self, subject: &str, claims: &RequestedClaims) -> std::result::Result<Map<String, Value>, ()> {
            let mut known = Map::new();
            known.insert("name".to_string(), Value::from(format!("Name of {}", subject)));
            known.insert("email".to_string(), Value::from("owner@example.com"));

            Ok(known
                .into_iter()
                .filter(|(name, _)| claims.contains_key(name))
                .collect())
        }
    }

    struct Setup {
        sessions: SessionMap<RandomGenerator>,
        registrar: ClientMap,
        jose: SecretJose,
    }

    impl Endpoint for Setup {
        fn sessions(&mut self) -> &mut dyn GrantStore {
            &mut self.sessions
        }

        fn registrar(&self) -> &dyn Registrar {
            &self.registrar
        }

        fn user_info(&self) -> &dyn UserInfoProvider {
            &StaticUserInfo
        }

        fn jose(&self) -> &dyn Jose {
            &self.jose
        }

        fn issuer(&self) -> &str {
            "https://provider.example/"
        }

        fn pairwise_seed(&self) -> &[u8] {
            b"seed"
        }
    }

    struct BearerRequest(Option<String>);

    impl Request for BearerRequest {
        fn valid(&self) -> bool {
            true
        }

        fn access_token(&self) -> Option<Cow<str>> {
            self.0.as_deref().map(Cow::Borrowed)
        }
    }

    fn grant(scope: &str, request: Option<OidcRequest>) -> Grant {
        Grant {
            owner_id: "Owner".to_string(),
            client_id: "Client".to_string(),
            scope: scope.parse().unwrap(),
            nonce: None,
            redirect_uri: "https://client.example/cb".parse().unwrap(),
            permissions: vec![],
            oidc_request: request,
            issued_at: Utc::now(),
            until: Utc::now(),
        }
    }

    fn setup() -> Setup {
        let mut registrar = ClientMap::new();
        registrar
            .register(bare_registration("Client", "https://client.example/cb"))
            .unwrap();
        Setup {
            sessions: SessionMap::new(RandomGenerator::new(16)),
            registrar,
            jose: SecretJose::ephemeral(),
        }
    }

    #[test]
    fn scope_and_request_object_claims_merge() {
        let explicit: RequestedClaims = vec![(
            "email".to_string(),
            Some(ClaimEntry {
                essential: Some(true),
                value: None,
                values: None,
            }),
        )]
        .into_iter()
        .collect();

        let request = OidcRequest {
            max_age: None,
            claims: Some(ClaimsRequest {
                userinfo: Some(explicit),
                id_token: None,
            }),
        };

        let merged = requested_userinfo_claims(&grant("openid profile", Some(request)));

        // Scope-derived names are present, the explicit entry keeps its markers.
        assert!(merged.contains_key("name"));
        assert!(merged.contains_key("sub"));
        assert_eq!(merged["email"].as_ref().unwrap().essential, Some(true));
    }

    #[test]
    fn access_token_resolves_to_user_info() {
        let mut setup = setup();
        let created = setup.sessions.create(grant("openid profile email", None)).unwrap();
        let bundle = setup.sessions.promote(&created.code, false).unwrap();

        let response = userinfo(&mut setup, &BearerRequest(Some(bundle.access_token)));
        match response {
            Ok(SealedUserInfo::Json(body)) => {
                let body: Map<String, Value> = serde_json::from_str(&body).unwrap();
                assert_eq!(body["sub"], "Owner");
                assert_eq!(body["email"], "owner@example.com");
            }
            _ => panic!("Expected a plain json response"),
        }
    }

    #[test]
    fn wrong_token_kind_is_failed_authentication() {
        let mut setup = setup();
        let created = setup.sessions.create(grant("openid", None)).unwrap();

        // Presenting the code instead of an access token.
        let mut response = match userinfo(&mut setup, &BearerRequest(Some(created.code))) {
            Err(error) => error,
            Ok(_) => panic!("Code must not open the userinfo endpoint"),
        };
        let description = response.description().expect("Expected a protocol error");
        assert_eq!(description.kind(), AccessTokenErrorType::FailedAuthentication);
    }

    #[test]
    fn revoked_token_is_access_denied() {
        let mut setup = setup();
        let created = setup.sessions.create(grant("openid", None)).unwrap();
        let bundle = setup.sessions.promote(&created.code, false).unwrap();
        setup.sessions.revoke(&bundle.access_token).unwrap();

        let mut response = match userinfo(&mut setup, &BearerRequest(Some(bundle.access_token))) {
            Err(error) => error,
            Ok(_) => panic!("Revoked token must not resolve"),
        };
        let description = response.description().expect("Expected a protocol error");
        assert_eq!(description.kind(), AccessTokenErrorType::AccessDenied);
    }
}
