use std::borrow::Cow;
use std::marker::PhantomData;

use crate::code_grant::access_token::{
    access_token, Endpoint as TokenEndpoint, Error as FlowError, Request as TokenRequest,
};
use crate::code_grant::userinfo::UserInfoProvider;

use super::*;

/// All relevant methods for handling access token and refresh token requests.
pub struct AccessTokenFlow<E, R>
where
    E: Endpoint<R>,
    R: WebRequest,
{
    endpoint: WrappedToken<E, R>,
    allow_credentials_in_body: bool,
}

struct WrappedToken<E: Endpoint<R>, R: WebRequest> {
    inner: E,
    r_type: PhantomData<R>,
}

struct WrappedRequest<'a, R: WebRequest + 'a> {
    request: PhantomData<R>,

    /// The urlencoded body of the request.
    body: Cow<'a, dyn QueryParameter + 'static>,

    /// The decoded basic authorization header.
    authorization: Option<(String, Vec<u8>)>,

    /// An error if one occurred.
    error: Option<FailParse<R::Error>>,

    /// The allowed credentials in body behaviour, forwarded from the flow.
    allow_credentials_in_body: bool,
}

enum FailParse<E> {
    /// The web request failed to produce its parts.
    Web(E),
    /// The authorization header was present but unusable.
    Header,
}

impl<E, R> AccessTokenFlow<E, R>
where
    E: Endpoint<R>,
    R: WebRequest,
{
    /// Check that the endpoint supports the necessary operations for handling requests.
    pub fn prepare(mut endpoint: E) -> Result<Self, E::Error> {
        if endpoint.registrar().is_none()
            || endpoint.sessions_mut().is_none()
            || endpoint.client_authenticator().is_none()
            || endpoint.user_info().is_none()
            || endpoint.jose().is_none()
        {
            return Err(endpoint.error(OAuthError::PrimitiveError));
        }

        Ok(AccessTokenFlow {
            endpoint: WrappedToken {
                inner: endpoint,
                r_type: PhantomData,
            },
            allow_credentials_in_body: false,
        })
    }

    /// Credentials in body should only be enabled if use of HTTP Basic is not possible.
    ///
    /// Allows the request body to contain the `client_secret` as a form parameter. This is
    /// NOT RECOMMENDED and need not be supported.
    pub fn allow_credentials_in_body(&mut self, allow: bool) {
        self.allow_credentials_in_body = allow;
    }

    /// Use the checked endpoint to execute the token flow for a request.
    pub fn execute(&mut self, mut request: R) -> Result<R::Response, E::Error> {
        let result = {
            let wrapped = WrappedRequest::new(&mut request, self.allow_credentials_in_body);
            access_token(&mut self.endpoint, &wrapped)
        };

        match result {
            Ok(token) => {
                let mut response = self
                    .endpoint
                    .inner
                    .response(&mut request, Template::new_ok())?;
                response
                    .ok()
                    .and_then(|()| response.no_store())
                    .and_then(|()| response.body_json(&token.to_json()))
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                Ok(response)
            }
            Err(FlowError::Invalid(mut error)) => {
                let body = error.to_json();
                let mut response = self
                    .endpoint
                    .inner
                    .response(&mut request, Template::new_bad(Some(&mut error)))?;
                response
                    .client_error()
                    .and_then(|()| response.body_json(&body))
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                Ok(response)
            }
            Err(FlowError::Unauthorized(mut error, scheme)) => {
                let body = error.to_json();
                let mut response = self
                    .endpoint
                    .inner
                    .response(&mut request, Template::new_unauthorized(Some(&mut error)))?;
                response
                    .unauthorized(&scheme)
                    .and_then(|()| response.body_json(&body))
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                Ok(response)
            }
            Err(FlowError::Primitive) => Err(self.endpoint.inner.error(OAuthError::PrimitiveError)),
        }
    }
}

impl<E: Endpoint<R>, R: WebRequest> TokenEndpoint for WrappedToken<E, R> {
    fn registrar(&self) -> &dyn Registrar {
        self.inner.registrar().unwrap()
    }

    fn sessions(&mut self) -> &mut dyn GrantStore {
        self.inner.sessions_mut().unwrap()
    }

    fn client_authenticator(&self) -> &dyn ClientAuthenticator {
        self.inner.client_authenticator().unwrap()
    }

    fn user_info(&self) -> &dyn UserInfoProvider {
        self.inner.user_info().unwrap()
    }

    fn jose(&self) -> &dyn Jose {
        self.inner.jose().unwrap()
    }

    fn config(&self) -> &ProviderConfig {
        self.inner.config()
    }
}

impl<'a, R: WebRequest + 'a> WrappedRequest<'a, R> {
    fn new(request: &'a mut R, allow_credentials_in_body: bool) -> Self {
        Self::new_or_fail(request, allow_credentials_in_body)
            .unwrap_or_else(|error| Self::from_err(error, allow_credentials_in_body))
    }

    fn new_or_fail(
        request: &'a mut R, allow_credentials_in_body: bool,
    ) -> Result<Self, FailParse<R::Error>> {
        // The authorization header, if any, must be given in a valid format.
        let authorization = match request.authheader().map_err(FailParse::Web)? {
            Some(header) => {
                Some(parse_basic_authorization(header.as_ref()).ok_or(FailParse::Header)?)
            }
            None => None,
        };

        Ok(WrappedRequest {
            request: PhantomData,
            body: request.urlbody().map_err(FailParse::Web)?,
            authorization,
            error: None,
            allow_credentials_in_body,
        })
    }

    fn from_err(err: FailParse<R::Error>, allow_credentials_in_body: bool) -> Self {
        WrappedRequest {
            request: PhantomData,
            body: Cow::Owned(Default::default()),
            authorization: None,
            error: Some(err),
            allow_credentials_in_body,
        }
    }
}

impl<'a, R: WebRequest + 'a> TokenRequest for WrappedRequest<'a, R> {
    fn valid(&self) -> bool {
        self.error.is_none()
    }

    fn code(&self) -> Option<Cow<str>> {
        self.body.unique_value("code")
    }

    fn refresh_token(&self) -> Option<Cow<str>> {
        self.body.unique_value("refresh_token")
    }

    fn authorization(&self) -> Option<(Cow<str>, Cow<[u8]>)> {
        self.authorization
            .as_ref()
            .map(|(user, pass)| (Cow::Borrowed(user.as_str()), Cow::Borrowed(pass.as_slice())))
    }

    fn client_id(&self) -> Option<Cow<str>> {
        self.body.unique_value("client_id")
    }

    fn redirect_uri(&self) -> Option<Cow<str>> {
        self.body.unique_value("redirect_uri")
    }

    fn grant_type(&self) -> Option<Cow<str>> {
        self.body.unique_value("grant_type")
    }

    fn extension(&self, key: &str) -> Option<Cow<str>> {
        self.body.unique_value(key)
    }

    fn allow_credentials_in_body(&self) -> bool {
        self.allow_credentials_in_body
    }
}
