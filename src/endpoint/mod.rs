//! Polymorphic request wrappers for the provider flows.
//!
//! An endpoint is concerned with executing the abstract behaviours given by the backend in
//! terms of the actions of the endpoint types. This means translating redirect results to the
//! correct redirect response for example, or sending internal errors to loggers. The
//! front-ends, which are the bindings to particular server libraries, can instantiate the
//! endpoint api or simply reuse existing types.
//!
//! To ensure adherence to the specifications and to improve general implementations, some
//! control flow of incoming requests is specified here instead of the front-end
//! implementations. Instead, traits are offered to make this compatible with other
//! endpoints. In theory, this makes endpoints pluggable which could improve testing.
//!
//! The declarative endpoints need no flow of their own: serialize
//! [`ProviderMetadata`] and [`DiscoveryResponse`] (with `Cache-Control: no-store`) from the
//! [`code_grant::discovery`] module directly.
//!
//! Custom endpoint
//! ---------------
//! In order to not place restrictions on the web server library in use, it is possible to
//! implement an endpoint completely with user defined types.
//!
//! This requires custom, related implementations of [`WebRequest`] and [`WebResponse`].
//! _WARNING_: Custom endpoints MUST ensure a secure communication layer with confidential
//! clients. This means using TLS for communication over https.
//!
//! [`WebRequest`]: trait.WebRequest.html
//! [`WebResponse`]: trait.WebResponse.html
//! [`ProviderMetadata`]: ../code_grant/discovery/struct.ProviderMetadata.html
//! [`DiscoveryResponse`]: ../code_grant/discovery/struct.DiscoveryResponse.html
//! [`code_grant::discovery`]: ../code_grant/discovery/index.html
mod access_token;
mod authorization;
mod error;
mod query;
mod registration;
mod userinfo;

#[cfg(test)]
mod tests;

use std::borrow::Cow;

pub use crate::code_grant::access_token::ClientAuthenticator;
pub use crate::code_grant::authorization::{
    AuthenticationChallenge, Authenticator, Authorizer, Identity,
};
pub use crate::code_grant::error::{AccessTokenError, AuthorizationError};
pub use crate::code_grant::userinfo::UserInfoProvider;
pub use crate::code_grant::{HttpFetch, ProviderConfig};
pub use crate::primitives::jose::Jose;
pub use crate::primitives::registrar::Registrar;
pub use crate::primitives::sessions::GrantStore;

pub use self::access_token::AccessTokenFlow;
pub use self::authorization::AuthorizationFlow;
pub use self::error::OAuthError;
pub use self::query::{NormalizedParameter, QueryParameter, UniqueValue};
pub use self::registration::{ReadRegistrationFlow, RegistrationFlow};
pub use self::userinfo::UserInfoFlow;

use url::Url;

/// Modifiable reason for creating a response to the client.
///
/// Not all responses indicate failure. A redirect will also occur in the regular course of
/// providing an authorization code to the third party client. When an error is present (see
/// several methods) it is mostly possible to customize it. This hook provides advanced
/// endpoints with the opportunity to set additional parameters and informational messages
/// before they are encoded.
#[derive(Debug)]
pub struct Template<'a> {
    inner: InnerTemplate<'a>,
}

/// The general manner of the response.
///
/// These are parallels for HTTP status codes of the same name.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResponseStatus {
    /// The response is issued because the requesting party was not authorized.
    Unauthorized,

    /// The response redirects in the code grant flow.
    Redirect,

    /// The request was malformed.
    BadRequest,

    /// This response is normal and expected.
    Ok,
}

#[derive(Debug)]
enum InnerTemplate<'a> {
    /// Authorization to access the resource has not been granted.
    Unauthorized {
        /// Information on an access token error.
        ///
        /// Endpoints may modify this description to add additional explanatory text or a
        /// reference uri for clients seeking explanation.
        access_token_error: Option<&'a mut AccessTokenError>,
    },

    /// Redirect the user-agent to another url.
    ///
    /// The endpoint has the opportunity to inspect and modify error information to some
    /// extent. The response will generally not contain a body.
    Redirect {
        /// Information on an authorization error.
        authorization_error: Option<&'a mut AuthorizationError>,
    },

    /// The request did not conform to specification or was otherwise invalid.
    ///
    /// Some processes still warrant a response body to be set in the case of an invalid
    /// request, containing additional information for the client.
    BadRequest {
        /// Information on an invalid request error.
        access_token_error: Option<&'a mut AccessTokenError>,
    },

    /// An expected, normal response.
    ///
    /// The content of the response may require precise semantics to be standard compliant,
    /// therefore it is constructed using the `WebResponse` trait methods.
    Ok,
}

/// Abstraction of web requests with several different abstractions and constructors needed by
/// an endpoint. It is assumed to originate from an HTTP request, as defined in the scope of
/// the specifications, but theoretically other requests are possible.
pub trait WebRequest {
    /// The error generated from access of malformed or invalid requests.
    type Error;

    /// The corresponding type of Responses returned from this module.
    type Response: WebResponse<Error = Self::Error>;

    /// Retrieve a parsed version of the url query.
    ///
    /// An `Err` return value indicates a malformed query or an otherwise malformed
    /// WebRequest. Note that an empty query should result in `Ok(..)` with an empty map
    /// instead of an `Err`.
    fn query(&mut self) -> Result<Cow<dyn QueryParameter + 'static>, Self::Error>;

    /// Retrieve the parsed `application/x-form-urlencoded` body of the request.
    ///
    /// An `Err` value indicates a malformed body or a different Content-Type.
    fn urlbody(&mut self) -> Result<Cow<dyn QueryParameter + 'static>, Self::Error>;

    /// Contents of the authorization header or none if none exists. An `Err` value indicates
    /// a malformed header or request.
    fn authheader(&mut self) -> Result<Option<Cow<str>>, Self::Error>;

    /// The value of the provider's session cookie, if the user-agent sent one.
    fn cookie(&mut self) -> Result<Option<Cow<str>>, Self::Error> {
        Ok(None)
    }

    /// The raw request body, for endpoints consuming json.
    fn raw_body(&mut self) -> Result<Option<Cow<str>>, Self::Error> {
        Ok(None)
    }
}

/// Response representation into which the request is transformed by the flow types.
///
/// At most one of the body methods will be called. Some flows will however not call any of
/// them.
pub trait WebResponse {
    /// The error generated when trying to construct an unhandled or invalid response.
    type Error;

    /// Set the response status to 200.
    fn ok(&mut self) -> Result<(), Self::Error>;

    /// A response which will redirect the user-agent to which the response is issued.
    fn redirect(&mut self, url: Url) -> Result<(), Self::Error>;

    /// Set the response status to 400.
    fn client_error(&mut self) -> Result<(), Self::Error>;

    /// Set the response status to 401 and add a `WWW-Authenticate` header.
    fn unauthorized(&mut self, header_value: &str) -> Result<(), Self::Error>;

    /// A pure text response with no special media type set.
    fn body_text(&mut self, text: &str) -> Result<(), Self::Error>;

    /// Json response data, with media type `application/json`.
    fn body_json(&mut self, data: &str) -> Result<(), Self::Error>;

    /// A sealed token body, with media type `application/jwt`.
    fn body_jwt(&mut self, data: &str) -> Result<(), Self::Error> {
        self.body_text(data)
    }

    /// Attach a cookie to the response.
    fn set_cookie(&mut self, _name: &str, _value: &str) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Mark the response as not cacheable (`Cache-Control: no-store`).
    fn no_store(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Fuses requests and primitives into a coherent system to give a response.
///
/// There are multiple different valid ways to produce responses and react to internal errors
/// for a single request type. This trait should provide those mechanisms, including trying to
/// recover from primitive errors where appropriate.
///
/// To reduce the number of necessary impls and provide a single interface to a single trait,
/// this trait defines accessor methods for all possibly needed primitives. Note that not all
/// flows actually access all primitives. Thus, an implementation does not necessarily have to
/// return something in every accessor but failing to do so will also fail flows that try to
/// use them.
///
/// # Panics
///
/// It is expected that the endpoint primitive functions are consistent, i.e. they don't begin
/// returning `None` after having returned `Some(..)` previously. This ensures that the checks
/// executed by the flow preparation methods catch missing primitives. When this contract is
/// violated, the execution of a flow may lead to a panic.
pub trait Endpoint<Request: WebRequest> {
    /// The error type used as the error representation of each flow.
    type Error;

    /// A registrar if this endpoint can access one.
    ///
    /// Returning `None` will implicate failing any flow that requires a registrar but does
    /// not have any effect on flows that do not require one.
    fn registrar(&self) -> Option<&dyn Registrar>;

    /// Mutable registrar access, required by the registration flow.
    fn registrar_mut(&mut self) -> Option<&mut dyn Registrar>;

    /// A grant store if this endpoint can access one.
    fn sessions_mut(&mut self) -> Option<&mut dyn GrantStore>;

    /// The end-user authentication subsystem, required by the authorization flow.
    fn authenticator_mut(&mut self) -> Option<&mut dyn Authenticator>;

    /// The authorization policy, required by the authorization flow.
    fn authorizer_mut(&mut self) -> Option<&mut dyn Authorizer>;

    /// The client credential validator, required by the token flow.
    fn client_authenticator(&self) -> Option<&dyn ClientAuthenticator>;

    /// The user attribute collaborator.
    fn user_info(&self) -> Option<&dyn UserInfoProvider>;

    /// The JOSE backend.
    fn jose(&self) -> Option<&dyn Jose>;

    /// The bounded document fetcher.
    fn http(&self) -> Option<&dyn HttpFetch>;

    /// The ambient provider configuration.
    fn config(&self) -> &ProviderConfig;

    /// Render the login machinery's page for an authentication challenge.
    ///
    /// The authorization flow hands over here when the end-user has to be (re-)authenticated
    /// before the request can continue. This is the seam where a deployment plugs in its
    /// actual login UI.
    fn authentication_page(
        &mut self, request: &mut Request, challenge: &AuthenticationChallenge,
    ) -> Result<Request::Response, Self::Error>;

    /// Generate a prototype response.
    ///
    /// The endpoint can rely on this being called at most once for each flow, if it wants to
    /// preallocate the response or return a handle on an existing prototype.
    fn response(
        &mut self, request: &mut Request, kind: Template,
    ) -> Result<Request::Response, Self::Error>;

    /// Wrap an error.
    fn error(&mut self, err: OAuthError) -> Self::Error;

    /// Wrap an error in the request/response types.
    fn web_error(&mut self, err: Request::Error) -> Self::Error;
}

impl<'a> Template<'a> {
    /// Create an OK template.
    pub fn new_ok() -> Self {
        InnerTemplate::Ok.into()
    }

    /// Create a bad request template.
    pub fn new_bad(access_token_error: Option<&'a mut AccessTokenError>) -> Self {
        InnerTemplate::BadRequest { access_token_error }.into()
    }

    /// Create an unauthorized template.
    pub fn new_unauthorized(access_token_error: Option<&'a mut AccessTokenError>) -> Self {
        InnerTemplate::Unauthorized { access_token_error }.into()
    }

    /// Create a redirect template.
    pub fn new_redirect(authorization_error: Option<&'a mut AuthorizationError>) -> Self {
        InnerTemplate::Redirect { authorization_error }.into()
    }

    /// The corresponding status code.
    pub fn status(&self) -> ResponseStatus {
        match self.inner {
            InnerTemplate::Unauthorized { .. } => ResponseStatus::Unauthorized,
            InnerTemplate::Redirect { .. } => ResponseStatus::Redirect,
            InnerTemplate::BadRequest { .. } => ResponseStatus::BadRequest,
            InnerTemplate::Ok => ResponseStatus::Ok,
        }
    }

    /// Supplementary information about an error in the authorization flow.
    ///
    /// The referenced object can be inspected and manipulated to provide additional
    /// information that is specific to this server or endpoint, such as a reference uri with
    /// explanatory information.
    pub fn authorization_error(&mut self) -> Option<&mut AuthorizationError> {
        match &mut self.inner {
            InnerTemplate::Redirect {
                authorization_error, ..
            } => reborrow(authorization_error),
            _ => None,
        }
    }

    /// Supplementary information about an error in the token or userinfo flows.
    pub fn access_token_error(&mut self) -> Option<&mut AccessTokenError> {
        match &mut self.inner {
            InnerTemplate::Unauthorized {
                access_token_error, ..
            } => reborrow(access_token_error),
            InnerTemplate::BadRequest {
                access_token_error, ..
            } => reborrow(access_token_error),
            _ => None,
        }
    }
}

/// Reborrow contained optional reference.
///
/// Slightly tweaked from an `Into`, there is `Option<&'a mut T>` from `&'a mut Option<T>`.
fn reborrow<'a, T>(opt: &'a mut Option<&mut T>) -> Option<&'a mut T> {
    match opt {
        // Magically does correct lifetime coercision.
        Some(inner) => Some(inner),
        None => None,
    }
}

impl<'a, W: WebRequest> WebRequest for &'a mut W {
    type Error = W::Error;
    type Response = W::Response;

    fn query(&mut self) -> Result<Cow<dyn QueryParameter + 'static>, Self::Error> {
        (**self).query()
    }

    fn urlbody(&mut self) -> Result<Cow<dyn QueryParameter + 'static>, Self::Error> {
        (**self).urlbody()
    }

    fn authheader(&mut self) -> Result<Option<Cow<str>>, Self::Error> {
        (**self).authheader()
    }

    fn cookie(&mut self) -> Result<Option<Cow<str>>, Self::Error> {
        (**self).cookie()
    }

    fn raw_body(&mut self) -> Result<Option<Cow<str>>, Self::Error> {
        (**self).raw_body()
    }
}

impl<'a, R: WebRequest, E: Endpoint<R>> Endpoint<R> for &'a mut E {
    type Error = E::Error;

    fn registrar(&self) -> Option<&dyn Registrar> {
        (**self).registrar()
    }

    fn registrar_mut(&mut self) -> Option<&mut dyn Registrar> {
        (**self).registrar_mut()
    }

    fn sessions_mut(&mut self) -> Option<&mut dyn GrantStore> {
        (**self).sessions_mut()
    }

    fn authenticator_mut(&mut self) -> Option<&mut dyn Authenticator> {
        (**self).authenticator_mut()
    }

    fn authorizer_mut(&mut self) -> Option<&mut dyn Authorizer> {
        (**self).authorizer_mut()
    }

    fn client_authenticator(&self) -> Option<&dyn ClientAuthenticator> {
        (**self).client_authenticator()
    }

    fn user_info(&self) -> Option<&dyn UserInfoProvider> {
        (**self).user_info()
    }

    fn jose(&self) -> Option<&dyn Jose> {
        (**self).jose()
    }

    fn http(&self) -> Option<&dyn HttpFetch> {
        (**self).http()
    }

    fn config(&self) -> &ProviderConfig {
        (**self).config()
    }

    fn authentication_page(
        &mut self, request: &mut R, challenge: &AuthenticationChallenge,
    ) -> Result<R::Response, Self::Error> {
        (**self).authentication_page(request, challenge)
    }

    fn response(&mut self, request: &mut R, kind: Template) -> Result<R::Response, Self::Error> {
        (**self).response(request, kind)
    }

    fn error(&mut self, err: OAuthError) -> Self::Error {
        (**self).error(err)
    }

    fn web_error(&mut self, err: R::Error) -> Self::Error {
        (**self).web_error(err)
    }
}

impl<'a> From<InnerTemplate<'a>> for Template<'a> {
    fn from(inner: InnerTemplate<'a>) -> Self {
        Template { inner }
    }
}

/// Parse the contents of an `Authorization: Basic` header into client credentials.
pub(crate) fn parse_basic_authorization(header: &str) -> Option<(String, Vec<u8>)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::decode(encoded.trim()).ok()?;
    let mut split = decoded.splitn(2, |&byte| byte == b':');
    let user = split.next()?;
    let pass = split.next()?;
    String::from_utf8(user.to_vec())
        .ok()
        .map(|user| (user, pass.to_vec()))
}

/// Extract the token of an `Authorization: Bearer` header.
pub(crate) fn parse_bearer_authorization(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim)
}
