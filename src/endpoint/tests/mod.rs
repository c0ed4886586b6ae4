use super::*;

use std::borrow::Cow;
use std::collections::HashMap;

use url::Url;

use crate::code_grant::access_token::SecretAuthenticator;
use crate::code_grant::authorization::{Authenticator, Authorizer, Identity};
use crate::code_grant::userinfo::{RequestedClaims, UserInfoProvider};
use crate::code_grant::{FetchError, HttpFetch, ProviderConfig};
use crate::primitives::generator::RandomGenerator;
use crate::primitives::jose::{Jose, SecretJose, SigningAlg};
use crate::primitives::registrar::tests::bare_registration;
use crate::primitives::registrar::{ClientMap, Registrar};
use crate::primitives::sessions::{GrantStore, SessionMap};

use serde_json::{Map, Value};

/// Open and simple implementation of `WebRequest`.
#[derive(Clone, Debug, Default)]
struct CraftedRequest {
    /// The key-value pairs in the url query component.
    pub query: Option<HashMap<String, Vec<String>>>,

    /// The key-value pairs of a `x-www-form-urlencoded` body.
    pub urlbody: Option<HashMap<String, Vec<String>>>,

    /// Provided authorization header.
    pub auth: Option<String>,

    /// The session cookie the user-agent sent.
    pub cookie: Option<String>,

    /// The raw json body, for registration.
    pub body: Option<String>,
}

/// Open and simple implementation of `WebResponse`.
#[derive(Debug, Default)]
struct CraftedResponse {
    /// HTTP status code.
    pub status: Status,

    /// A location header, for example for redirects.
    pub location: Option<Url>,

    /// Indicates how the client should have authenticated.
    ///
    /// Only set with `Unauthorized` status.
    pub www_authenticate: Option<String>,

    /// Cookies attached to the response.
    pub cookies: Vec<(String, String)>,

    /// Whether `Cache-Control: no-store` was requested.
    pub no_store: bool,

    /// Encoded body of the response.
    ///
    /// One variant for each possible encoding type.
    pub body: Option<Body>,
}

/// An enum containing the necessary HTTP status codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
enum Status {
    /// Http status code 200.
    Ok,

    /// Http status code 302.
    Redirect,

    /// Http status code 400.
    BadRequest,

    /// Http status code 401.
    Unauthorized,
}

/// Models the necessary body contents.
///
/// Real HTTP protocols should set a content type header for each of the body variants.
#[derive(Clone, Debug)]
enum Body {
    /// A pure text body.
    Text(String),

    /// A json encoded body, `application/json`.
    Json(String),

    /// A sealed token body, `application/jwt`.
    Jwt(String),
}

#[derive(Debug)]
enum CraftedError {
    Crafted,
    OAuth(OAuthError),
}

impl WebRequest for CraftedRequest {
    type Response = CraftedResponse;
    type Error = CraftedError;

    fn query(&mut self) -> Result<Cow<dyn QueryParameter + 'static>, Self::Error> {
        self.query
            .as_ref()
            .map(|hm| Cow::Borrowed(hm as &dyn QueryParameter))
            .ok_or(CraftedError::Crafted)
    }

    fn urlbody(&mut self) -> Result<Cow<dyn QueryParameter + 'static>, Self::Error> {
        self.urlbody
            .as_ref()
            .map(|hm| Cow::Borrowed(hm as &dyn QueryParameter))
            .ok_or(CraftedError::Crafted)
    }

    fn authheader(&mut self) -> Result<Option<Cow<str>>, Self::Error> {
        Ok(self.auth.as_ref().map(|header| header.as_str().into()))
    }

    fn cookie(&mut self) -> Result<Option<Cow<str>>, Self::Error> {
        Ok(self.cookie.as_ref().map(|cookie| cookie.as_str().into()))
    }

    fn raw_body(&mut self) -> Result<Option<Cow<str>>, Self::Error> {
        Ok(self.body.as_ref().map(|body| body.as_str().into()))
    }
}

impl WebResponse for CraftedResponse {
    type Error = CraftedError;

    fn ok(&mut self) -> Result<(), Self::Error> {
        self.status = Status::Ok;
        self.location = None;
        self.www_authenticate = None;
        Ok(())
    }

    fn redirect(&mut self, url: Url) -> Result<(), Self::Error> {
        self.status = Status::Redirect;
        self.location = Some(url);
        self.www_authenticate = None;
        Ok(())
    }

    fn client_error(&mut self) -> Result<(), Self::Error> {
        self.status = Status::BadRequest;
        self.location = None;
        self.www_authenticate = None;
        Ok(())
    }

    fn unauthorized(&mut self, header_value: &str) -> Result<(), Self::Error> {
        self.status = Status::Unauthorized;
        self.location = None;
        self.www_authenticate = Some(header_value.to_owned());
        Ok(())
    }

    fn body_text(&mut self, text: &str) -> Result<(), Self::Error> {
        self.body = Some(Body::Text(text.to_owned()));
        Ok(())
    }

    fn body_json(&mut self, data: &str) -> Result<(), Self::Error> {
        self.body = Some(Body::Json(data.to_owned()));
        Ok(())
    }

    fn body_jwt(&mut self, data: &str) -> Result<(), Self::Error> {
        self.body = Some(Body::Jwt(data.to_owned()));
        Ok(())
    }

    fn set_cookie(&mut self, name: &str, value: &str) -> Result<(), Self::Error> {
        self.cookies.push((name.to_owned(), value.to_owned()));
        Ok(())
    }

    fn no_store(&mut self) -> Result<(), Self::Error> {
        self.no_store = true;
        Ok(())
    }
}

/// An authenticator whose answer is configured by the test.
#[derive(Default)]
struct TestAuthenticator {
    /// The identity every cookie resolves to, `None` leaves the browser anonymous.
    identity: Option<String>,
}

impl Authenticator for TestAuthenticator {
    fn authenticated_as(&mut self, cookie: Option<&str>, _max_age: Option<u64>) -> Option<Identity> {
        cookie?;
        self.identity.clone().map(|user_id| Identity { user_id })
    }

    fn issue_sso_cookie(&mut self, user: &str, _name: &str, _ttl: chrono::Duration) -> String {
        format!("sso-for-{}", user)
    }
}

/// Grants every user the same static permission.
struct AllowAll;

impl Authorizer for AllowAll {
    fn permissions(&mut self, _: &str, _: &str) -> Result<Vec<String>, ()> {
        Ok(vec!["standard".to_string()])
    }
}

/// Serves attribute values from a fixed table.
struct StaticUserInfo;

impl UserInfoProvider for StaticUserInfo {
    fn fetch(&self, subject: &str, claims: &RequestedClaims) -> Result<Map<String, Value>, ()> {
        let mut known = Map::new();
        known.insert("name".to_string(), Value::from(format!("Name of {}", subject)));
        known.insert("email".to_string(), Value::from("owner@example.com"));
        known.insert("email_verified".to_string(), Value::from(true));

        Ok(known
            .into_iter()
            .filter(|(name, _)| claims.contains_key(name))
            .collect())
    }
}

/// Serves documents from an in-memory table, everything else is unreachable.
#[derive(Default)]
struct StaticHttp {
    documents: HashMap<String, String>,
}

impl HttpFetch for StaticHttp {
    fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        self.documents
            .get(url.as_str())
            .cloned()
            .ok_or(FetchError::Connection)
    }
}

struct TestEndpoint {
    registrar: ClientMap,
    sessions: SessionMap<RandomGenerator>,
    authenticator: TestAuthenticator,
    authorizer: AllowAll,
    client_authenticator: SecretAuthenticator,
    user_info: StaticUserInfo,
    jose: SecretJose,
    http: StaticHttp,
    config: ProviderConfig,
}

impl Endpoint<CraftedRequest> for TestEndpoint {
    type Error = CraftedError;

    fn registrar(&self) -> Option<&dyn Registrar> {
        Some(&self.registrar)
    }

    fn registrar_mut(&mut self) -> Option<&mut dyn Registrar> {
        Some(&mut self.registrar)
    }

    fn sessions_mut(&mut self) -> Option<&mut dyn GrantStore> {
        Some(&mut self.sessions)
    }

    fn authenticator_mut(&mut self) -> Option<&mut dyn Authenticator> {
        Some(&mut self.authenticator)
    }

    fn authorizer_mut(&mut self) -> Option<&mut dyn Authorizer> {
        Some(&mut self.authorizer)
    }

    fn client_authenticator(&self) -> Option<&dyn ClientAuthenticator> {
        Some(&self.client_authenticator)
    }

    fn user_info(&self) -> Option<&dyn UserInfoProvider> {
        Some(&self.user_info)
    }

    fn jose(&self) -> Option<&dyn Jose> {
        Some(&self.jose)
    }

    fn http(&self) -> Option<&dyn HttpFetch> {
        Some(&self.http)
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn authentication_page(
        &mut self, _: &mut CraftedRequest, challenge: &AuthenticationChallenge,
    ) -> Result<CraftedResponse, Self::Error> {
        let mut response = CraftedResponse::default();
        response.ok()?;
        response.body_text(&format!(
            "login page, required subject: {:?}",
            challenge.required_subject
        ))?;
        Ok(response)
    }

    fn response(
        &mut self, _: &mut CraftedRequest, _: Template,
    ) -> Result<CraftedResponse, Self::Error> {
        Ok(CraftedResponse::default())
    }

    fn error(&mut self, err: OAuthError) -> Self::Error {
        CraftedError::OAuth(err)
    }

    fn web_error(&mut self, err: CraftedError) -> Self::Error {
        err
    }
}

impl TestEndpoint {
    /// A provider with one registered confidential client, symmetric ID token signing.
    fn new() -> Self {
        let mut registrar = ClientMap::new();
        let mut registration = bare_registration(EXAMPLE_CLIENT_ID, EXAMPLE_REDIRECT_URI);
        registration.id_token_signed_response_alg = Some(SigningAlg::Hs256);
        registrar.register(registration).unwrap();

        TestEndpoint {
            registrar,
            sessions: SessionMap::new(RandomGenerator::new(16)),
            authenticator: TestAuthenticator {
                identity: Some(EXAMPLE_OWNER_ID.to_string()),
            },
            authorizer: AllowAll,
            client_authenticator: SecretAuthenticator::default(),
            user_info: StaticUserInfo,
            jose: SecretJose::ephemeral(),
            http: StaticHttp::default(),
            config: ProviderConfig::new("https://provider.example/".parse().unwrap(), b"test seed"),
        }
    }

    fn anonymous(mut self) -> Self {
        self.authenticator.identity = None;
        self
    }
}

trait ToSingleValueQuery {
    fn to_single_value_query(self) -> HashMap<String, Vec<String>>;
}

impl<'r, I, K, V> ToSingleValueQuery for I
where
    I: Iterator<Item = &'r (K, V)>,
    K: AsRef<str> + 'r,
    V: AsRef<str> + 'r,
{
    fn to_single_value_query(self) -> HashMap<String, Vec<String>> {
        self.map(|&(ref k, ref v)| (k.as_ref().to_string(), vec![v.as_ref().to_string()]))
            .collect()
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Ok
    }
}

pub mod defaults {
    pub const EXAMPLE_CLIENT_ID: &str = "ConnectClient";
    pub const EXAMPLE_OWNER_ID: &str = "Owner";
    pub const EXAMPLE_PASSPHRASE: &str = "cf0f1a9a6e6d4a7b";
    pub const EXAMPLE_REDIRECT_URI: &str = "https://client.example/endpoint";
    pub const EXAMPLE_COOKIE: &str = "session=0xdeadbeef";
}

use self::defaults::*;

fn basic_authorization(user: &str, passphrase: &str) -> String {
    format!(
        "Basic {}",
        base64::encode(format!("{}:{}", user, passphrase))
    )
}

mod authorization;
mod registration;
mod userinfo;
