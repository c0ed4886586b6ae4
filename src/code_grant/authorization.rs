//! Provides the handling for Authorization Requests.
//!
//! The flow is a state machine: parse, resolve the redirect uri, resolve an embedded request
//! object, establish the end-user identity, compute permissions, then construct the response
//! the requested response types ask for. Failures before the redirect uri is trusted are
//! answered directly as json, everything later travels back to the client via redirect.
use std::borrow::Cow;
use std::collections::HashSet;
use std::result::Result as StdResult;

use chrono::Utc;
use url::{form_urlencoded, Url};

use crate::code_grant::error::{AuthorizationError, AuthorizationErrorType, ErrorResponse};
use crate::code_grant::id_token::IdTokenPipeline;
use crate::code_grant::userinfo::{user_info_for_id_token, UserInfoProvider};
use crate::code_grant::{HttpFetch, ProviderConfig};
use crate::primitives::grant::{Grant, OidcRequest};
use crate::primitives::jose::{Jose, SigningKey};
use crate::primitives::registrar::{ClientUrl, Registrar, RegistrarError};
use crate::primitives::scope::Scope;
use crate::primitives::sessions::GrantStore;

/// Interface required from a request to determine the handling in the backend.
pub trait Request {
    /// Received request might not be encoded correctly. This method gives implementors the
    /// chance to signal that a request was received but its encoding was generally malformed.
    /// If this is the case, then no other attribute will be queried.
    fn valid(&self) -> bool;

    /// Identity of the client requesting authorization.
    fn client_id(&self) -> Option<Cow<str>>;

    /// The uri the response should be redirected to.
    fn redirect_uri(&self) -> Option<Cow<str>>;

    /// The requested response types, space separated and order preserving.
    fn response_type(&self) -> Option<Cow<str>>;

    /// Optionally specifies the requested scope.
    fn scope(&self) -> Option<Cow<str>>;

    /// Optional parameter the client can use to identify the redirected user-agent.
    fn state(&self) -> Option<Cow<str>>;

    /// The nonce binding an issued ID token to this request.
    fn nonce(&self) -> Option<Cow<str>>;

    /// Requested interaction constraints, space separated (`none`, `login`).
    fn prompt(&self) -> Option<Cow<str>>;

    /// Maximum age of an existing authentication, in seconds.
    fn max_age(&self) -> Option<Cow<str>>;

    /// Reference to an embedded request object to fetch.
    fn request_uri(&self) -> Option<Cow<str>>;

    /// An inline embedded request object.
    fn request_object(&self) -> Option<Cow<str>>;

    /// Retrieve an additional parameter used in an extension.
    fn extension(&self, key: &str) -> Option<Cow<str>>;
}

/// An identity asserted by the external authentication subsystem.
#[derive(Clone, Debug)]
pub struct Identity {
    /// The locally unique identifier of the end-user.
    pub user_id: String,
}

/// The contract towards the end-user authentication subsystem.
///
/// Cookie issuance, login forms and "who is this browser" resolution live entirely behind
/// this trait; the provider only consumes the resulting identity.
pub trait Authenticator {
    /// The identity already asserted by the session cookie, bounded by freshness.
    ///
    /// Implementations answer `None` for missing, tampered or too old assertions.
    fn authenticated_as(&mut self, cookie: Option<&str>, max_age: Option<u64>) -> Option<Identity>;

    /// Mint the single-sign-on cookie attached after a successful authorization.
    fn issue_sso_cookie(&mut self, user: &str, cookie_name: &str, ttl: chrono::Duration) -> String;
}

/// Computes the permission set granted to a client on behalf of an owner.
pub trait Authorizer {
    /// The permissions to persist on the grant.
    fn permissions(&mut self, user: &str, client_id: &str) -> StdResult<Vec<String>, ()>;
}

/// Required functionality to respond to authorization requests.
pub trait Endpoint {
    /// The client database.
    fn registrar(&self) -> &dyn Registrar;

    /// The store owning the grant lifecycle.
    fn sessions(&mut self) -> &mut dyn GrantStore;

    /// The external authentication subsystem.
    fn authenticator(&mut self) -> &mut dyn Authenticator;

    /// The authorization policy computing permission sets.
    fn authorizer(&mut self) -> &mut dyn Authorizer;

    /// The collaborator holding end-user attributes, for inline ID token claims.
    fn user_info(&self) -> &dyn UserInfoProvider;

    /// The JOSE backend sealing ID tokens.
    fn jose(&self) -> &dyn Jose;

    /// Bounded fetching of `request_uri` references.
    fn http(&self) -> &dyn HttpFetch;

    /// The ambient provider configuration.
    fn config(&self) -> &ProviderConfig;
}

/// Successful outcomes of the authorization endpoint.
pub enum Success {
    /// Every requested response type was satisfied, redirect the user-agent.
    Issued {
        /// The fully constructed redirect, artifacts placed per response type.
        url: Url,

        /// The single-sign-on cookie to set alongside the redirect.
        sso_cookie: String,
    },

    /// The end-user must be (re-)authenticated before the request can continue.
    ///
    /// The caller hands this to its login machinery and replays the request afterwards.
    Challenge(AuthenticationChallenge),
}

/// What the login machinery needs to know when taking over.
#[derive(Clone, Debug, Default)]
pub struct AuthenticationChallenge {
    /// The specific subject the request requires, if the embedded request named one.
    pub required_subject: Option<String>,

    /// The policy document of the requesting client, for display during login.
    pub policy_url: Option<String>,

    /// The logo of the requesting client, for display during login.
    pub logo_url: Option<String>,
}

/// Defines the correct treatment of authorization failures.
///
/// Not all errors are signalled to the requesting party: before the redirect uri has been
/// matched against the registration, nothing may be redirected and the error is answered
/// directly, to keep the endpoint from being turned into an open redirector.
#[derive(Clone)]
pub enum Error {
    /// Answer with a `400` json body, the redirect uri is not trusted (yet).
    Invalid(ErrorResponse),

    /// Redirect to the given url with the error in the query or fragment.
    Redirect(ErrorUrl),

    /// Something happened in one of the primitives.
    PrimitiveError,
}

/// Placement of response parameters on the redirect uri.
///
/// A response carrying only a code (or nothing) uses the query so that ordinary server side
/// clients can read it; every response placing a token uses the fragment, which does not
/// travel in `Referer` headers or server logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Parameters appended to the query component.
    Query,
    /// Parameters encoded into the fragment component.
    Fragment,
}

/// Encapsulates a redirect to a valid redirect_uri with an error response.
#[derive(Clone)]
pub struct ErrorUrl {
    base_uri: Url,
    placement: Placement,
    state: Option<String>,
    error: AuthorizationError,
}

type Result<T> = StdResult<T, Error>;

#[derive(Clone, Debug)]
struct Parsed {
    client_id: String,
    redirect_uri: Option<Url>,
    response_type: Vec<String>,
    raw_scope: Option<String>,
    state: Option<String>,
    nonce: Option<String>,
    prompt: HashSet<String>,
    max_age: Option<u64>,
    request_uri: Option<Url>,
    request_object: Option<String>,
}

/// Where the embedded request object comes from.
pub enum RequestObjectSource {
    /// Fetch the object from the given uri.
    Reference(Url),
    /// The object travelled inline in the request.
    Inline(String),
}

/// Everything the issuing step needs, assembled by the state machine.
pub struct IssueData {
    /// The bound client.
    pub client_id: String,
    /// The trusted redirect uri.
    pub redirect_uri: Url,
    /// The requested response types, order preserving.
    pub response_type: Vec<String>,
    /// The granted scope.
    pub scope: Scope,
    /// State echoed back to the client.
    pub state: Option<String>,
    /// Nonce echoed into the ID token.
    pub nonce: Option<String>,
    /// The resolved embedded request object.
    pub oidc_request: Option<OidcRequest>,
    /// The authenticated end-user.
    pub user: String,
    /// The permission set the policy computed.
    pub permissions: Vec<String>,
}

/// The ongoing authorization request, advanced by feeding it the collaborator answers.
pub struct Authorization {
    state: AuthorizationState,
}

enum AuthorizationState {
    /// State after the request has been parsed, waiting on the registrar.
    Binding { parsed: Parsed },
    /// The redirect uri is trusted, an embedded request object remains to be resolved.
    Resolving {
        parsed: Parsed,
        redirect_uri: Url,
        scope: Scope,
    },
    /// Waiting on the identity asserted by the session cookie.
    Authenticating {
        parsed: Parsed,
        redirect_uri: Url,
        scope: Scope,
        oidc: Option<OidcRequest>,
    },
    /// Identity established, waiting on the permission set.
    Authorizing {
        parsed: Parsed,
        redirect_uri: Url,
        scope: Scope,
        oidc: Option<OidcRequest>,
        user: String,
    },
    /// Terminal: the login machinery has to take over.
    Challenging { parsed: Parsed, oidc: Option<OidcRequest> },
    /// Terminal: all checks passed, the response can be constructed.
    Issuing { data: IssueData },
    /// State after an error occurred.
    Err(Error),
}

/// Input injected by the executor into the state machine.
pub enum Input {
    /// The registrar resolved (or refused) the redirect uri.
    Bound(StdResult<Url, RegistrarError>),
    /// The embedded request object was resolved, or its retrieval failed.
    Resolved(StdResult<OidcRequest, ResolveFailure>),
    /// The authentication subsystem answered the cookie query.
    Authenticated(Option<Identity>),
    /// The authorization policy computed the permission set.
    Authorized(Vec<String>),
    /// Advance without input as far as possible, or just retrieve the output again.
    None,
}

/// Why an embedded request object could not be resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveFailure {
    /// The `request_uri` could not be fetched.
    Fetch,
    /// The document did not parse or verify as a request object.
    Parse,
}

/// A request by the state machine to the executor.
///
/// Each variant is fulfilled by certain variants of the next input as an argument to
/// [`Authorization::next`]. The output of most states is simply repeated if `Input::None` is
/// provided instead.
///
/// [`Authorization::next`]: struct.Authorization.html#method.next
pub enum Output<'machine> {
    /// Ask the registrar to bind the client and check its redirect uri.
    Bind {
        /// The to-be-bound client.
        client_id: &'machine str,
        /// The redirect uri to check, if any was requested.
        redirect_uri: Option<&'machine Url>,
    },
    /// Resolve the embedded request object.
    Resolve {
        /// The client whose keys verify the object.
        client_id: &'machine str,
        /// Where the object comes from.
        source: RequestObjectSource,
    },
    /// Query the authentication subsystem for the current identity.
    Authenticate {
        /// Freshness bound on an existing authentication.
        max_age: Option<u64>,
    },
    /// Terminal: delegate to the external login machinery.
    Challenge {
        /// The client the challenge is on behalf of.
        client_id: &'machine str,
        /// A subject the request insists on, if any.
        required_subject: Option<String>,
    },
    /// Ask the authorization policy for the permission set.
    Authorize {
        /// The authenticated end-user.
        user: &'machine str,
        /// The client to authorize.
        client_id: &'machine str,
    },
    /// Terminal: construct the response from the assembled data.
    Issue(&'machine IssueData),
    /// The state machine finished in an error.
    ///
    /// The error will be repeated on *any* following input.
    Err(Error),
}

impl Input {
    /// Take the input, leaving `None` in place.
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Input::None)
    }
}

impl Authorization {
    /// Create the state machine and validate the request.
    pub fn new(request: &dyn Request) -> Self {
        Authorization {
            state: Self::validate(request).unwrap_or_else(AuthorizationState::Err),
        }
    }

    fn take(&mut self) -> AuthorizationState {
        std::mem::replace(&mut self.state, AuthorizationState::Err(Error::PrimitiveError))
    }

    /// Go to the next state.
    pub fn next(&mut self, input: Input) -> Output<'_> {
        self.state = match (self.take(), input) {
            (current, Input::None) => current,
            (AuthorizationState::Binding { parsed }, Input::Bound(bound)) => {
                bound_client(parsed, bound).unwrap_or_else(AuthorizationState::Err)
            }
            (
                AuthorizationState::Resolving {
                    parsed,
                    redirect_uri,
                    scope,
                },
                Input::Resolved(resolved),
            ) => resolved_request(parsed, redirect_uri, scope, resolved)
                .unwrap_or_else(AuthorizationState::Err),
            (
                AuthorizationState::Authenticating {
                    parsed,
                    redirect_uri,
                    scope,
                    oidc,
                },
                Input::Authenticated(identity),
            ) => authenticated(parsed, redirect_uri, scope, oidc, identity)
                .unwrap_or_else(AuthorizationState::Err),
            (
                AuthorizationState::Authorizing {
                    parsed,
                    redirect_uri,
                    scope,
                    oidc,
                    user,
                },
                Input::Authorized(permissions),
            ) => AuthorizationState::Issuing {
                data: IssueData {
                    client_id: parsed.client_id,
                    redirect_uri,
                    response_type: parsed.response_type,
                    scope,
                    state: parsed.state,
                    nonce: parsed.nonce,
                    oidc_request: oidc,
                    user,
                    permissions,
                },
            },
            (AuthorizationState::Err(err), _) => AuthorizationState::Err(err),
            (_, _) => AuthorizationState::Err(Error::PrimitiveError),
        };

        self.output()
    }

    fn output(&self) -> Output<'_> {
        match &self.state {
            AuthorizationState::Err(err) => Output::Err(err.clone()),
            AuthorizationState::Binding { parsed } => Output::Bind {
                client_id: &parsed.client_id,
                redirect_uri: parsed.redirect_uri.as_ref(),
            },
            AuthorizationState::Resolving { parsed, .. } => Output::Resolve {
                client_id: &parsed.client_id,
                source: match (&parsed.request_uri, &parsed.request_object) {
                    (Some(uri), _) => RequestObjectSource::Reference(uri.clone()),
                    (None, Some(inline)) => RequestObjectSource::Inline(inline.clone()),
                    (None, None) => unreachable!("Resolving is only entered with a request object"),
                },
            },
            AuthorizationState::Authenticating { parsed, oidc, .. } => Output::Authenticate {
                max_age: oidc.as_ref().and_then(|oidc| oidc.max_age).or(parsed.max_age),
            },
            AuthorizationState::Authorizing { parsed, user, .. } => Output::Authorize {
                user,
                client_id: &parsed.client_id,
            },
            AuthorizationState::Challenging { parsed, oidc } => Output::Challenge {
                client_id: &parsed.client_id,
                required_subject: oidc
                    .as_ref()
                    .and_then(|oidc| oidc.required_subject())
                    .map(str::to_string),
            },
            AuthorizationState::Issuing { data } => Output::Issue(data),
        }
    }

    fn validate(request: &dyn Request) -> Result<AuthorizationState> {
        if !request.valid() {
            return Err(Error::json("invalid_request", Some("No parsable authorization request")));
        }

        let client_id = request
            .client_id()
            .ok_or_else(|| Error::json("invalid_request", Some("Missing required attribute client_id")))?;

        let response_type = request.response_type().ok_or_else(|| {
            Error::json("invalid_request", Some("Missing required attribute response_type"))
        })?;
        let response_type: Vec<String> = response_type
            .split(' ')
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect();
        if response_type.is_empty() {
            return Err(Error::json("invalid_request", Some("Empty response_type")));
        }

        let redirect_uri = match request.redirect_uri() {
            None => None,
            Some(uri) => Some(
                uri.parse::<Url>()
                    .map_err(|_| Error::json("invalid_request", Some("Malformed redirect_uri")))?,
            ),
        };

        let max_age = match request.max_age() {
            None => None,
            Some(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| Error::json("invalid_request", Some("Malformed max_age")))?,
            ),
        };

        let request_uri = match request.request_uri() {
            None => None,
            Some(raw) => Some(
                raw.parse::<Url>()
                    .map_err(|_| Error::json("invalid_request", Some("Malformed request_uri")))?,
            ),
        };

        let prompt = request
            .prompt()
            .map(|prompt| prompt.split(' ').map(str::to_string).collect())
            .unwrap_or_default();

        Ok(AuthorizationState::Binding {
            parsed: Parsed {
                client_id: client_id.into_owned(),
                redirect_uri,
                response_type,
                raw_scope: request.scope().map(Cow::into_owned),
                state: request.state().map(Cow::into_owned),
                nonce: request.nonce().map(Cow::into_owned),
                prompt,
                max_age,
                request_uri,
                request_object: request.request_object().map(Cow::into_owned),
            },
        })
    }
}

fn placement_of(response_type: &[String]) -> Placement {
    match response_type {
        [single] if single == "code" || single == "token" || single == "none" => Placement::Query,
        _ => Placement::Fragment,
    }
}

fn empty_scope() -> Scope {
    "".parse().expect("the empty scope parses")
}

fn bound_client(parsed: Parsed, bound: StdResult<Url, RegistrarError>) -> Result<AuthorizationState> {
    let redirect_uri = match bound {
        Ok(url) => url,
        // The redirect uri can not be trusted, these always answer directly.
        Err(err) => return Err(Error::json("invalid_request", Some(err.to_string().as_str()))),
    };

    // `none` must not be combined with anything else.
    if parsed.response_type.iter().any(|token| token == "none") && parsed.response_type.len() > 1 {
        return Err(Error::redirect(
            &parsed,
            redirect_uri,
            AuthorizationErrorType::InvalidRequest,
        ));
    }

    let scope: Scope = match &parsed.raw_scope {
        None => empty_scope(),
        Some(raw) => match raw.parse() {
            Ok(scope) => scope,
            Err(_) => {
                return Err(Error::redirect(
                    &parsed,
                    redirect_uri,
                    AuthorizationErrorType::InvalidScope,
                ))
            }
        },
    };

    if parsed.request_uri.is_some() || parsed.request_object.is_some() {
        Ok(AuthorizationState::Resolving {
            parsed,
            redirect_uri,
            scope,
        })
    } else {
        Ok(AuthorizationState::Authenticating {
            parsed,
            redirect_uri,
            scope,
            oidc: None,
        })
    }
}

fn resolved_request(
    parsed: Parsed, redirect_uri: Url, scope: Scope,
    resolved: StdResult<OidcRequest, ResolveFailure>,
) -> Result<AuthorizationState> {
    let oidc = match resolved {
        Ok(oidc) => oidc,
        Err(ResolveFailure::Fetch) => {
            return Err(Error::redirect(
                &parsed,
                redirect_uri,
                AuthorizationErrorType::InvalidRequestUri,
            ))
        }
        Err(ResolveFailure::Parse) => {
            return Err(Error::redirect(
                &parsed,
                redirect_uri,
                AuthorizationErrorType::InvalidOpenidRequestObject,
            ))
        }
    };

    Ok(AuthorizationState::Authenticating {
        parsed,
        redirect_uri,
        scope,
        oidc: Some(oidc),
    })
}

fn authenticated(
    parsed: Parsed, redirect_uri: Url, scope: Scope, oidc: Option<OidcRequest>,
    identity: Option<Identity>,
) -> Result<AuthorizationState> {
    let prompt_none = parsed.prompt.contains("none");
    let required = oidc.as_ref().and_then(|oidc| oidc.required_subject());

    let login_required = |parsed: &Parsed, redirect_uri| {
        Error::redirect(parsed, redirect_uri, AuthorizationErrorType::LoginRequired)
    };

    let identity = match identity {
        None if prompt_none => return Err(login_required(&parsed, redirect_uri)),
        None => return Ok(AuthorizationState::Challenging { parsed, oidc }),
        Some(identity) => identity,
    };

    if parsed.prompt.contains("login") {
        // The client demands re-authentication regardless of the live session.
        return Ok(AuthorizationState::Challenging { parsed, oidc });
    }

    if required.map_or(false, |required| required != identity.user_id) {
        debug!("Request requires a different subject than {}", identity.user_id);
        if prompt_none {
            return Err(login_required(&parsed, redirect_uri));
        }
        return Ok(AuthorizationState::Challenging { parsed, oidc });
    }

    Ok(AuthorizationState::Authorizing {
        parsed,
        redirect_uri,
        scope,
        oidc,
        user: identity.user_id,
    })
}

/// Drive an authorization request against the endpoint until it settles.
///
/// The executor owns every collaborator call; the state machine owns every protocol decision.
pub fn authorization_flow(
    endpoint: &mut dyn Endpoint, request: &dyn Request, cookie: Option<&str>,
) -> Result<Success> {
    let mut authorization = Authorization::new(request);
    let mut input = Input::None;

    loop {
        match authorization.next(input.take()) {
            Output::Err(error) => return Err(error),
            Output::Bind {
                client_id,
                redirect_uri,
            } => {
                let bound = endpoint
                    .registrar()
                    .resolve(ClientUrl {
                        client_id: Cow::Borrowed(client_id),
                        redirect_uri: redirect_uri.map(Cow::Borrowed),
                    })
                    .map(|bound| bound.redirect_uri.into_owned());
                input = Input::Bound(bound);
            }
            Output::Resolve { client_id, source } => {
                input = Input::Resolved(resolve_request_object(endpoint, client_id, source));
            }
            Output::Authenticate { max_age } => {
                let identity = endpoint.authenticator().authenticated_as(cookie, max_age);
                input = Input::Authenticated(identity);
            }
            Output::Challenge {
                client_id,
                required_subject,
            } => {
                let mut challenge = AuthenticationChallenge {
                    required_subject,
                    ..AuthenticationChallenge::default()
                };
                if let Some(registration) = endpoint.registrar().lookup(client_id) {
                    challenge.policy_url = registration.policy_url.as_ref().map(Url::to_string);
                    challenge.logo_url = registration.logo_url.as_ref().map(Url::to_string);
                }
                return Ok(Success::Challenge(challenge));
            }
            Output::Authorize { user, client_id } => {
                let permissions = endpoint
                    .authorizer()
                    .permissions(user, client_id)
                    .map_err(|()| Error::PrimitiveError)?;
                input = Input::Authorized(permissions);
            }
            Output::Issue(data) => {
                let url = issue(endpoint, data)?;
                let config = endpoint.config();
                let (cookie_name, ttl) = (config.cookie_name.clone(), config.sso_ttl);
                let sso_cookie = endpoint
                    .authenticator()
                    .issue_sso_cookie(&data.user, &cookie_name, ttl);
                info!("Issued authorization for {} to {}", data.user, data.client_id);
                return Ok(Success::Issued { url, sso_cookie });
            }
        }
    }
}

fn resolve_request_object(
    endpoint: &mut dyn Endpoint, client_id: &str, source: RequestObjectSource,
) -> StdResult<OidcRequest, ResolveFailure> {
    let raw = match source {
        RequestObjectSource::Inline(inline) => inline,
        RequestObjectSource::Reference(uri) => {
            debug!("Fetching request object from {}", uri);
            endpoint.http().fetch(&uri).map_err(|err| {
                error!("Request object fetch failed: {}", err);
                ResolveFailure::Fetch
            })?
        }
    };

    // The object is verified against the secret the client registered; an unsigned object
    // (`alg: none`) passes through verification untouched.
    let key = match endpoint.registrar().lookup(client_id) {
        Some(registration) => SigningKey::ClientSecret(&registration.client_secret),
        None => SigningKey::Provider,
    };

    let payload = endpoint
        .jose()
        .open(raw.trim(), key)
        .map_err(|_| ResolveFailure::Parse)?;
    serde_json::from_slice(&payload).map_err(|_| ResolveFailure::Parse)
}

fn issue(endpoint: &mut dyn Endpoint, data: &IssueData) -> Result<Url> {
    let grant = Grant {
        owner_id: data.user.clone(),
        client_id: data.client_id.clone(),
        scope: data.scope.clone(),
        nonce: data.nonce.clone(),
        redirect_uri: data.redirect_uri.clone(),
        permissions: data.permissions.clone(),
        oidc_request: data.oidc_request.clone(),
        issued_at: Utc::now(),
        until: Utc::now(),
    };

    let wants_id_token = data.response_type.iter().any(|token| token == "id_token");
    if wants_id_token && data.nonce.is_none() {
        // Use of the nonce is REQUIRED for all requests where an ID token is returned
        // directly from the authorization endpoint.
        return Err(Error::json("invalid_request", Some("Missing nonce value")));
    }

    let created = endpoint
        .sessions()
        .create(grant)
        .map_err(|_| Error::PrimitiveError)?;

    let mut params: Vec<(String, String)> = Vec::new();
    if let Some(state) = &data.state {
        params.push(("state".to_string(), state.clone()));
    }

    let none_only = data.response_type.len() == 1 && data.response_type[0] == "none";
    if !none_only {
        let mut remaining: HashSet<&str> =
            data.response_type.iter().map(String::as_str).collect();

        if let Some(raw_scope) = non_empty_scope(&data.scope) {
            params.push(("scope".to_string(), raw_scope));
        }

        let code = if remaining.remove("code") {
            params.push(("code".to_string(), created.code.clone()));
            Some(created.code.clone())
        } else {
            endpoint
                .sessions()
                .clear_code(&created.sid)
                .map_err(|_| Error::PrimitiveError)?;
            None
        };

        let access_token = if remaining.remove("token") {
            let bundle = endpoint
                .sessions()
                .promote(&created.sid, false)
                .map_err(|_| Error::PrimitiveError)?;
            let expires_in = bundle.until.signed_duration_since(Utc::now()).num_seconds();
            params.push(("access_token".to_string(), bundle.access_token.clone()));
            params.push(("token_type".to_string(), "bearer".to_string()));
            params.push(("expires_in".to_string(), expires_in.to_string()));
            Some(bundle.access_token)
        } else {
            None
        };

        if remaining.remove("id_token") {
            let grant = endpoint
                .sessions()
                .lookup(&created.sid)
                .map_err(|_| Error::PrimitiveError)?
                .ok_or(Error::PrimitiveError)?;

            let registration = match endpoint.registrar().lookup(&data.client_id) {
                Some(registration) => registration.clone(),
                None => return Err(Error::PrimitiveError),
            };

            let user_info = user_info_for_id_token(endpoint.user_info(), &grant)
                .map_err(|()| Error::PrimitiveError)?;

            let config = endpoint.config();
            let pipeline = IdTokenPipeline::new(endpoint.jose(), config.issuer.as_str(), &config.seed);
            let id_token = pipeline
                .sign_and_maybe_encrypt(
                    &grant,
                    &registration,
                    code.as_deref(),
                    access_token.as_deref(),
                    user_info.as_ref(),
                )
                .map_err(|_| Error::PrimitiveError)?;

            endpoint
                .sessions()
                .record_id_token(&created.sid, id_token.clone())
                .map_err(|_| Error::PrimitiveError)?;
            params.push(("id_token".to_string(), id_token));
        }

        remaining.remove("none");
        if !remaining.is_empty() {
            // An unknown response type is fatal, the request is not retried without it.
            return Err(Error::redirect_with(
                data.redirect_uri.clone(),
                placement_of(&data.response_type),
                data.state.clone(),
                AuthorizationErrorType::UnsupportedResponseType,
            ));
        }
    }

    Ok(attach_params(
        data.redirect_uri.clone(),
        placement_of(&data.response_type),
        params,
    ))
}

fn non_empty_scope(scope: &Scope) -> Option<String> {
    let raw = scope.to_string();
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

fn attach_params(mut url: Url, placement: Placement, params: Vec<(String, String)>) -> Url {
    if params.is_empty() {
        return url;
    }
    match placement {
        Placement::Query => {
            url.query_pairs_mut().extend_pairs(params).finish();
        }
        Placement::Fragment => {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params)
                .finish();
            url.set_fragment(Some(&encoded));
        }
    }
    url
}

impl ErrorUrl {
    /// Construct a new error, already fixing the state parameter if it exists.
    pub fn new(
        url: Url, placement: Placement, state: Option<&str>, error: AuthorizationError,
    ) -> ErrorUrl {
        ErrorUrl {
            base_uri: url,
            placement,
            state: state.map(str::to_string),
            error,
        }
    }

    /// Get a handle to the description the client will receive.
    pub fn description(&mut self) -> &mut AuthorizationError {
        &mut self.error
    }

    /// Finalize the error url by saving its parameters in the redirect uri.
    pub fn finish(self) -> Url {
        let mut params: Vec<(String, String)> = self
            .error
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.into_owned()))
            .collect();
        if let Some(state) = self.state {
            params.push(("state".to_string(), state));
        }
        attach_params(self.base_uri, self.placement, params)
    }
}

impl From<ErrorUrl> for Url {
    fn from(error: ErrorUrl) -> Url {
        error.finish()
    }
}

impl Error {
    fn json(error: &str, description: Option<&str>) -> Self {
        Error::Invalid(ErrorResponse {
            error: error.to_string(),
            error_description: description.map(str::to_string),
        })
    }

    fn redirect(parsed: &Parsed, redirect_uri: Url, kind: AuthorizationErrorType) -> Self {
        Error::redirect_with(
            redirect_uri,
            placement_of(&parsed.response_type),
            parsed.state.clone(),
            kind,
        )
    }

    fn redirect_with(
        redirect_uri: Url, placement: Placement, state: Option<String>, kind: AuthorizationErrorType,
    ) -> Self {
        let error = AuthorizationError::new(kind);
        Error::Redirect(ErrorUrl::new(redirect_uri, placement, state.as_deref(), error))
    }

    /// Get a handle to the description the client will receive.
    ///
    /// Some types of this error don't return any description which is represented by a `None`
    /// result.
    pub fn description(&mut self) -> Option<&mut AuthorizationError> {
        match self {
            Error::Invalid(_) => None,
            Error::Redirect(inner) => Some(inner.description()),
            Error::PrimitiveError => None,
        }
    }
}
