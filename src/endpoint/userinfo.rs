use std::borrow::Cow;
use std::marker::PhantomData;

use crate::code_grant::id_token::SealedUserInfo;
use crate::code_grant::userinfo::{
    userinfo, Endpoint as UserInfoEndpoint, Error as FlowError, Request as UserInfoRequest,
};

use super::*;

/// All relevant methods for handling userinfo requests.
pub struct UserInfoFlow<E, R>
where
    E: Endpoint<R>,
    R: WebRequest,
{
    endpoint: WrappedUserInfo<E, R>,
}

struct WrappedUserInfo<E: Endpoint<R>, R: WebRequest> {
    inner: E,
    r_type: PhantomData<R>,
}

struct WrappedRequest<R: WebRequest> {
    request: PhantomData<R>,

    /// The bearer token, from the header or the form body.
    token: Option<String>,

    /// An error if one occurred.
    valid: bool,
}

impl<E, R> UserInfoFlow<E, R>
where
    E: Endpoint<R>,
    R: WebRequest,
{
    /// Check that the endpoint supports the necessary operations for handling requests.
    pub fn prepare(mut endpoint: E) -> Result<Self, E::Error> {
        if endpoint.registrar().is_none()
            || endpoint.sessions_mut().is_none()
            || endpoint.user_info().is_none()
            || endpoint.jose().is_none()
        {
            return Err(endpoint.error(OAuthError::PrimitiveError));
        }

        Ok(UserInfoFlow {
            endpoint: WrappedUserInfo {
                inner: endpoint,
                r_type: PhantomData,
            },
        })
    }

    /// Use the checked endpoint to execute the userinfo flow for a request.
    pub fn execute(&mut self, mut request: R) -> Result<R::Response, E::Error> {
        let result = {
            let wrapped = WrappedRequest::new(&mut request);
            userinfo(&mut self.endpoint, &wrapped)
        };

        match result {
            Ok(SealedUserInfo::Json(body)) => {
                let mut response = self
                    .endpoint
                    .inner
                    .response(&mut request, Template::new_ok())?;
                response
                    .ok()
                    .and_then(|()| response.body_json(&body))
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                Ok(response)
            }
            Ok(SealedUserInfo::Jwt(token)) => {
                let mut response = self
                    .endpoint
                    .inner
                    .response(&mut request, Template::new_ok())?;
                response
                    .ok()
                    .and_then(|()| response.body_jwt(&token))
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                Ok(response)
            }
            Err(FlowError::Invalid(mut error)) => {
                let body = error.to_json();
                let mut response = self
                    .endpoint
                    .inner
                    .response(&mut request, Template::new_unauthorized(Some(&mut error)))?;
                response
                    .unauthorized("Bearer")
                    .and_then(|()| response.body_json(&body))
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                Ok(response)
            }
            Err(FlowError::Primitive) => Err(self.endpoint.inner.error(OAuthError::PrimitiveError)),
        }
    }
}

impl<E: Endpoint<R>, R: WebRequest> UserInfoEndpoint for WrappedUserInfo<E, R> {
    fn sessions(&mut self) -> &mut dyn GrantStore {
        self.inner.sessions_mut().unwrap()
    }

    fn registrar(&self) -> &dyn Registrar {
        self.inner.registrar().unwrap()
    }

    fn user_info(&self) -> &dyn UserInfoProvider {
        self.inner.user_info().unwrap()
    }

    fn jose(&self) -> &dyn Jose {
        self.inner.jose().unwrap()
    }

    fn issuer(&self) -> &str {
        self.inner.config().issuer.as_str()
    }

    fn pairwise_seed(&self) -> &[u8] {
        &self.inner.config().seed
    }
}

impl<R: WebRequest> WrappedRequest<R> {
    fn new(request: &mut R) -> Self {
        Self::new_or_fail(request).unwrap_or_else(|_| WrappedRequest {
            request: PhantomData,
            token: None,
            valid: false,
        })
    }

    fn new_or_fail(request: &mut R) -> Result<Self, R::Error> {
        // The Authorization header wins over a token in the form body.
        let token = match request.authheader()? {
            Some(header) => parse_bearer_authorization(header.as_ref()).map(str::to_string),
            None => request
                .urlbody()
                .ok()
                .and_then(|body| body.unique_value("access_token").map(Cow::into_owned)),
        };

        Ok(WrappedRequest {
            request: PhantomData,
            token,
            valid: true,
        })
    }
}

impl<R: WebRequest> UserInfoRequest for WrappedRequest<R> {
    fn valid(&self) -> bool {
        self.valid
    }

    fn access_token(&self) -> Option<Cow<str>> {
        self.token.as_deref().map(Cow::Borrowed)
    }
}
