use std::borrow::Cow;
use std::marker::PhantomData;

use crate::code_grant::authorization::{
    authorization_flow, Endpoint as AuthorizationEndpoint, Error as FlowError,
    Request as AuthorizationRequest, Success,
};

use super::*;

/// All relevant methods for handling authorization requests.
pub struct AuthorizationFlow<E, R>
where
    E: Endpoint<R>,
    R: WebRequest,
{
    endpoint: WrappedAuthorization<E, R>,
}

struct WrappedAuthorization<E: Endpoint<R>, R: WebRequest> {
    inner: E,
    r_type: PhantomData<R>,
}

struct WrappedRequest<'a, R: WebRequest + 'a> {
    /// Original request.
    request: PhantomData<R>,

    /// The query in the url.
    query: Cow<'a, dyn QueryParameter + 'static>,

    /// An error if one occurred.
    error: Option<R::Error>,
}

impl<E, R> AuthorizationFlow<E, R>
where
    E: Endpoint<R>,
    R: WebRequest,
{
    /// Check that the endpoint supports the necessary operations for handling requests.
    ///
    /// Binds the endpoint to a particular type of request that it supports, for many
    /// implementations this is probably single type anyways.
    ///
    /// ## Panics
    ///
    /// Indirectly `execute` may panic when this flow is instantiated with an inconsistent
    /// endpoint, for details see the documentation of `Endpoint`. For consistent endpoints,
    /// the panic is instead caught as an error here.
    pub fn prepare(mut endpoint: E) -> Result<Self, E::Error> {
        if endpoint.registrar().is_none()
            || endpoint.sessions_mut().is_none()
            || endpoint.authenticator_mut().is_none()
            || endpoint.authorizer_mut().is_none()
            || endpoint.user_info().is_none()
            || endpoint.jose().is_none()
            || endpoint.http().is_none()
        {
            return Err(endpoint.error(OAuthError::PrimitiveError));
        }

        Ok(AuthorizationFlow {
            endpoint: WrappedAuthorization {
                inner: endpoint,
                r_type: PhantomData,
            },
        })
    }

    /// Use the checked endpoint to execute the authorization flow for a request.
    ///
    /// ## Panics
    ///
    /// When any of the primitives returned by the endpoint is suddenly `None` when previously
    /// it was `Some(..)`.
    pub fn execute(&mut self, mut request: R) -> Result<R::Response, E::Error> {
        let cookie = match request.cookie() {
            Ok(cookie) => cookie.map(Cow::into_owned),
            Err(err) => return Err(self.endpoint.inner.web_error(err)),
        };

        let result = {
            let wrapped = WrappedRequest::new(&mut request);
            authorization_flow(&mut self.endpoint, &wrapped, cookie.as_deref())
        };

        match result {
            Ok(Success::Issued { url, sso_cookie }) => {
                let cookie_name = self.endpoint.inner.config().cookie_name.clone();
                let mut response = self
                    .endpoint
                    .inner
                    .response(&mut request, Template::new_redirect(None))?;
                response
                    .redirect(url)
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                response
                    .set_cookie(&cookie_name, &sso_cookie)
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                Ok(response)
            }
            Ok(Success::Challenge(challenge)) => self
                .endpoint
                .inner
                .authentication_page(&mut request, &challenge),
            Err(FlowError::Invalid(body)) => {
                let mut response = self
                    .endpoint
                    .inner
                    .response(&mut request, Template::new_bad(None))?;
                response
                    .client_error()
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                let body = serde_json::to_string(&body)
                    .map_err(|_| self.endpoint.inner.error(OAuthError::PrimitiveError))?;
                response
                    .body_json(&body)
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                Ok(response)
            }
            Err(FlowError::Redirect(mut target)) => {
                let mut response = self.endpoint.inner.response(
                    &mut request,
                    Template::new_redirect(Some(target.description())),
                )?;
                response
                    .redirect(target.finish())
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                Ok(response)
            }
            Err(FlowError::PrimitiveError) => {
                Err(self.endpoint.inner.error(OAuthError::PrimitiveError))
            }
        }
    }
}

impl<E: Endpoint<R>, R: WebRequest> AuthorizationEndpoint for WrappedAuthorization<E, R> {
    fn registrar(&self) -> &dyn Registrar {
        self.inner.registrar().unwrap()
    }

    fn sessions(&mut self) -> &mut dyn GrantStore {
        self.inner.sessions_mut().unwrap()
    }

    fn authenticator(&mut self) -> &mut dyn Authenticator {
        self.inner.authenticator_mut().unwrap()
    }

    fn authorizer(&mut self) -> &mut dyn Authorizer {
        self.inner.authorizer_mut().unwrap()
    }

    fn user_info(&self) -> &dyn UserInfoProvider {
        self.inner.user_info().unwrap()
    }

    fn jose(&self) -> &dyn Jose {
        self.inner.jose().unwrap()
    }

    fn http(&self) -> &dyn HttpFetch {
        self.inner.http().unwrap()
    }

    fn config(&self) -> &ProviderConfig {
        self.inner.config()
    }
}

impl<'a, R: WebRequest + 'a> WrappedRequest<'a, R> {
    pub fn new(request: &'a mut R) -> Self {
        Self::new_or_fail(request).unwrap_or_else(Self::from_err)
    }

    fn new_or_fail(request: &'a mut R) -> Result<Self, R::Error> {
        Ok(WrappedRequest {
            request: PhantomData,
            query: request.query()?,
            error: None,
        })
    }

    fn from_err(err: R::Error) -> Self {
        WrappedRequest {
            request: PhantomData,
            query: Cow::Owned(Default::default()),
            error: Some(err),
        }
    }
}

impl<'a, R: WebRequest + 'a> AuthorizationRequest for WrappedRequest<'a, R> {
    fn valid(&self) -> bool {
        self.error.is_none()
    }

    fn client_id(&self) -> Option<Cow<str>> {
        self.query.unique_value("client_id")
    }

    fn redirect_uri(&self) -> Option<Cow<str>> {
        self.query.unique_value("redirect_uri")
    }

    fn response_type(&self) -> Option<Cow<str>> {
        self.query.unique_value("response_type")
    }

    fn scope(&self) -> Option<Cow<str>> {
        self.query.unique_value("scope")
    }

    fn state(&self) -> Option<Cow<str>> {
        self.query.unique_value("state")
    }

    fn nonce(&self) -> Option<Cow<str>> {
        self.query.unique_value("nonce")
    }

    fn prompt(&self) -> Option<Cow<str>> {
        self.query.unique_value("prompt")
    }

    fn max_age(&self) -> Option<Cow<str>> {
        self.query.unique_value("max_age")
    }

    fn request_uri(&self) -> Option<Cow<str>> {
        self.query.unique_value("request_uri")
    }

    fn request_object(&self) -> Option<Cow<str>> {
        self.query.unique_value("request")
    }

    fn extension(&self, key: &str) -> Option<Cow<str>> {
        self.query.unique_value(key)
    }
}
