//! Provides the handling for Access Token and Refresh Token Requests.
//!
//! Both grants share one endpoint, discriminated by the presence of a `refresh_token`
//! parameter. Client authentication always happens before any grant lookup.
use std::borrow::Cow;

use chrono::Utc;

use crate::code_grant::error::{AccessTokenError, AccessTokenErrorType};
use crate::code_grant::id_token::IdTokenPipeline;
use crate::code_grant::userinfo::{user_info_for_id_token, UserInfoProvider};
use crate::code_grant::ProviderConfig;
use crate::primitives::jose::Jose;
use crate::primitives::registrar::Registrar;
use crate::primitives::sessions::{GrantStore, StoreError, TokenBundle};

/// Token Response
#[derive(Deserialize, Serialize)]
pub struct TokenResponse {
    /// The access token issued by the authorization server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// The refresh token, which can be used to obtain new access tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// The type of the token issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// The lifetime in seconds of the access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,

    /// The scope, which limits the permissions on the access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// The ID token, when the grant's scope included `openid`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Trait based retrieval of parameters necessary for token request handling.
pub trait Request {
    /// Received request might not be encoded correctly. This method gives implementors the
    /// chance to signal that a request was received but its encoding was generally malformed.
    fn valid(&self) -> bool;

    /// The authorization code grant for which an access token is wanted.
    fn code(&self) -> Option<Cow<str>>;

    /// The refresh token, making this a refresh request.
    fn refresh_token(&self) -> Option<Cow<str>>;

    /// User:password of a basic authorization header.
    fn authorization(&self) -> Option<(Cow<str>, Cow<[u8]>)>;

    /// The client_id, optional parameter for public clients.
    fn client_id(&self) -> Option<Cow<str>>;

    /// Valid requests have the redirect url used to request the authorization code grant.
    fn redirect_uri(&self) -> Option<Cow<str>>;

    /// Valid requests have this set to `authorization_code` or `refresh_token`.
    fn grant_type(&self) -> Option<Cow<str>>;

    /// Retrieve an additional parameter used in an extension.
    fn extension(&self, key: &str) -> Option<Cow<str>>;

    /// Credentials in body should only be enabled if use of HTTP Basic is not possible.
    ///
    /// Allows the request body to contain the `client_secret` as a form parameter. This is
    /// NOT RECOMMENDED and need not be supported. The parameters MUST NOT appear in the
    /// request URI itself.
    fn allow_credentials_in_body(&self) -> bool {
        false
    }
}

/// Validates the credentials a token request presented.
///
/// Deployments with their own client authentication scheme (assertions, mutual TLS) replace
/// this collaborator; the provided [`SecretAuthenticator`] checks the shared secret against
/// the registrar.
///
/// [`SecretAuthenticator`]: struct.SecretAuthenticator.html
pub trait ClientAuthenticator {
    /// Authenticate the requesting client, returning its client id.
    fn authenticate(
        &self, request: &dyn Request, registrar: &dyn Registrar,
    ) -> std::result::Result<String, ()>;
}

/// Client authentication against the secret held by the registrar.
///
/// Accepts HTTP Basic credentials and, if the request opts in, credentials in the body.
/// Offering more than one set of credentials is a security issue and refused outright.
#[derive(Clone, Debug, Default)]
pub struct SecretAuthenticator;

enum Credentials<'a> {
    /// No credentials were offered.
    None,
    /// One set of credentials was offered.
    Authenticated {
        client_id: &'a str,
        passphrase: &'a [u8],
    },
    /// No password but name was offered.
    Unauthenticated { client_id: &'a str },
    /// Multiple possible credentials were offered.
    ///
    /// Only one attempt must be made per request.
    Duplicate,
}

impl ClientAuthenticator for SecretAuthenticator {
    fn authenticate(
        &self, request: &dyn Request, registrar: &dyn Registrar,
    ) -> std::result::Result<String, ()> {
        let authorization = request.authorization();
        let client_id = request.client_id();
        let client_secret = request.extension("client_secret");

        let mut credentials = Credentials::None;
        if let Some((client_id, auth)) = &authorization {
            credentials.authenticate(client_id.as_ref(), auth.as_ref());
        }

        if let Some(client_id) = &client_id {
            match &client_secret {
                Some(auth) if request.allow_credentials_in_body() => {
                    credentials.authenticate(client_id.as_ref(), auth.as_ref().as_bytes())
                }
                // Ignore the parameter if not allowed.
                Some(_) | None => credentials.unauthenticated(client_id.as_ref()),
            }
        }

        let (client_id, passphrase) = credentials.into_client().ok_or(())?;
        registrar.check(client_id, passphrase).map_err(|_| ())?;
        Ok(client_id.to_string())
    }
}

impl<'a> Credentials<'a> {
    fn authenticate(&mut self, client_id: &'a str, passphrase: &'a [u8]) {
        self.add(Credentials::Authenticated {
            client_id,
            passphrase,
        })
    }

    fn unauthenticated(&mut self, client_id: &'a str) {
        self.add(Credentials::Unauthenticated { client_id })
    }

    fn into_client(self) -> Option<(&'a str, Option<&'a [u8]>)> {
        match self {
            Credentials::Authenticated {
                client_id,
                passphrase,
            } => Some((client_id, Some(passphrase))),
            Credentials::Unauthenticated { client_id } => Some((client_id, None)),
            _ => None,
        }
    }

    fn add(&mut self, new: Self) {
        let old = std::mem::replace(self, Credentials::None);
        let next = match old {
            Credentials::None => new,
            _ => Credentials::Duplicate,
        };
        *self = next;
    }
}

/// Required functionality to respond to token requests.
pub trait Endpoint {
    /// The client database, also consulted for authentication.
    fn registrar(&self) -> &dyn Registrar;

    /// The store owning the grant lifecycle.
    fn sessions(&mut self) -> &mut dyn GrantStore;

    /// The collaborator validating client credentials.
    fn client_authenticator(&self) -> &dyn ClientAuthenticator;

    /// The collaborator holding end-user attributes, for inline ID token claims.
    fn user_info(&self) -> &dyn UserInfoProvider;

    /// The JOSE backend sealing ID tokens.
    fn jose(&self) -> &dyn Jose;

    /// The ambient provider configuration.
    fn config(&self) -> &ProviderConfig;
}

/// Defines actions for the response to a token request.
pub enum Error {
    /// The request was invalid, answer with the contained error body (`400`).
    Invalid(AccessTokenError),

    /// The client did not properly authenticate itself (`401` and `WWW-Authenticate`).
    Unauthorized(AccessTokenError, String),

    /// An underlying primitive operation did not complete successfully.
    Primitive,
}

type Result<T> = std::result::Result<T, Error>;

/// The issued tokens together with the associated scope, ready for serialization.
pub struct BearerToken {
    bundle: TokenBundle,
    id_token: Option<String>,
}

/// Try to redeem an authorization code or refresh token.
pub fn access_token(handler: &mut dyn Endpoint, request: &dyn Request) -> Result<BearerToken> {
    if !request.valid() {
        return Err(Error::invalid());
    }

    // Client authentication comes first, nothing is looked up for anonymous callers.
    let client_id = handler
        .client_authenticator()
        .authenticate(request, handler.registrar())
        .map_err(|()| Error::unauthorized("basic"))?;

    if request.refresh_token().is_some() {
        refresh_grant(handler, request, &client_id)
    } else {
        code_grant(handler, request, &client_id)
    }
}

fn code_grant(handler: &mut dyn Endpoint, request: &dyn Request, client_id: &str) -> Result<BearerToken> {
    match request.grant_type() {
        Some(ref cow) if cow == "authorization_code" => (),
        None => return Err(Error::invalid()),
        Some(_) => return Err(Error::invalid_with(AccessTokenErrorType::UnsupportedGrantType)),
    };

    let code = request.code().ok_or_else(Error::invalid)?;
    let code = code.as_ref();

    match handler.sessions().is_revoked(code) {
        Ok(false) => (),
        Ok(true) => return Err(Error::denied("Token is revoked")),
        Err(_) => return Err(Error::invalid_with(AccessTokenErrorType::InvalidGrant)),
    }

    let saved = handler
        .sessions()
        .lookup(code)
        .map_err(|_| Error::Primitive)?
        .ok_or_else(|| Error::invalid_with(AccessTokenErrorType::InvalidGrant))?;

    if saved.client_id != client_id {
        // ... or was issued to another client (Section 5.2).
        return Err(Error::invalid_with(AccessTokenErrorType::InvalidGrant));
    }

    // If a redirect_uri is echoed it must be the one used at authorization, exactly.
    if let Some(redirect_uri) = request.redirect_uri() {
        let redirect_uri: url::Url = redirect_uri
            .as_ref()
            .parse()
            .map_err(|_| Error::invalid())?;
        if redirect_uri != saved.redirect_uri {
            return Err(Error::invalid_with(AccessTokenErrorType::InvalidGrant));
        }
    }

    if saved.until < Utc::now() {
        return Err(Error::invalid_with(AccessTokenErrorType::InvalidGrant));
    }

    // Refresh tokens are not issued by default at this step, they must be asked for by
    // deployment policy; the refresh path below keeps accepting existing ones regardless.
    let bundle = match handler.sessions().promote(code, false) {
        Ok(bundle) => bundle,
        Err(StoreError::AlreadyRevoked) => return Err(Error::denied("Token is revoked")),
        Err(StoreError::InvalidGrant) => {
            return Err(Error::invalid_with(AccessTokenErrorType::InvalidGrant))
        }
        Err(StoreError::Primitive) => {
            // Whatever was derived for this code so far must not survive a half-issued state.
            let _ = handler.sessions().revoke(code);
            return Err(Error::denied("Token issuance failed"));
        }
    };

    let id_token = match attach_id_token(handler, code, &bundle) {
        Ok(id_token) => id_token,
        Err(_) => {
            let _ = handler.sessions().revoke(code);
            return Err(Error::denied("Token issuance failed"));
        }
    };

    Ok(BearerToken { bundle, id_token })
}

fn refresh_grant(
    handler: &mut dyn Endpoint, request: &dyn Request, client_id: &str,
) -> Result<BearerToken> {
    match request.grant_type() {
        Some(ref cow) if cow == "refresh_token" => (),
        None => return Err(Error::invalid()),
        Some(_) => return Err(Error::invalid_with(AccessTokenErrorType::UnsupportedGrantType)),
    };

    let refresh_token = request.refresh_token().ok_or_else(Error::invalid)?;
    let refresh_token = refresh_token.as_ref();

    // ... MUST ensure that the refresh token was issued to the authenticated client.
    match handler.sessions().lookup(refresh_token) {
        Ok(Some(grant)) if grant.client_id == client_id => (),
        Ok(_) => return Err(Error::invalid_with(AccessTokenErrorType::InvalidGrant)),
        Err(_) => return Err(Error::Primitive),
    }

    let bundle = match handler.sessions().refresh(refresh_token) {
        Ok(bundle) => bundle,
        Err(_) => return Err(Error::invalid_with(AccessTokenErrorType::InvalidGrant)),
    };

    // The response repeats the refresh token it was minted under.
    let mut bundle = bundle;
    bundle.refresh_token = Some(refresh_token.to_string());

    let id_token = attach_id_token(handler, refresh_token, &bundle).map_err(|_| Error::Primitive)?;

    Ok(BearerToken { bundle, id_token })
}

/// Build, seal and record a fresh ID token when the grant's scope includes `openid`.
fn attach_id_token(
    handler: &mut dyn Endpoint, key: &str, bundle: &TokenBundle,
) -> std::result::Result<Option<String>, ()> {
    if !bundle.scope.contains("openid") {
        return Ok(None);
    }

    let grant = handler.sessions().lookup(key).map_err(|_| ())?.ok_or(())?;

    let registration = match handler.registrar().lookup(&grant.client_id) {
        Some(registration) => registration.clone(),
        None => return Err(()),
    };

    let user_info = user_info_for_id_token(handler.user_info(), &grant)?;

    let config = handler.config();
    let pipeline = IdTokenPipeline::new(handler.jose(), config.issuer.as_str(), &config.seed);
    let id_token = pipeline
        .sign_and_maybe_encrypt(&grant, &registration, None, None, user_info.as_ref())
        .map_err(|_| ())?;

    handler
        .sessions()
        .record_id_token(key, id_token.clone())
        .map_err(|_| ())?;
    Ok(Some(id_token))
}

impl Error {
    fn invalid() -> Self {
        Error::Invalid(AccessTokenError::default())
    }

    fn invalid_with(with_type: AccessTokenErrorType) -> Self {
        Error::Invalid(AccessTokenError::new(with_type))
    }

    fn denied(descr: &'static str) -> Self {
        let mut error = AccessTokenError::new(AccessTokenErrorType::AccessDenied);
        error.explain(descr);
        Error::Invalid(error)
    }

    fn unauthorized(authtype: &str) -> Error {
        Error::Unauthorized(
            AccessTokenError::new(AccessTokenErrorType::UnauthorizedClient),
            authtype.to_string(),
        )
    }

    /// Get a handle to the description the client will receive.
    ///
    /// Some types of this error don't return any description which is represented by a `None`
    /// result.
    pub fn description(&mut self) -> Option<&mut AccessTokenError> {
        match self {
            Error::Invalid(description) => Some(description),
            Error::Unauthorized(description, _) => Some(description),
            Error::Primitive => None,
        }
    }
}

impl BearerToken {
    /// Convert the token into a json string, viable for being sent over a network with
    /// `application/json` encoding.
    pub fn to_json(&self) -> String {
        let remaining = self.bundle.until.signed_duration_since(Utc::now());
        let token_response = TokenResponse {
            access_token: Some(self.bundle.access_token.clone()),
            refresh_token: self.bundle.refresh_token.clone(),
            token_type: Some("bearer".to_owned()),
            expires_in: Some(remaining.num_seconds()),
            scope: Some(self.bundle.scope.to_string()),
            id_token: self.id_token.clone(),
            error: None,
        };

        serde_json::to_string(&token_response).expect("token response is serializable")
    }
}
