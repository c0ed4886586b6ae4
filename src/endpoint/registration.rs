use std::borrow::Cow;
use std::marker::PhantomData;

use crate::code_grant::error::{AccessTokenError, AccessTokenErrorType};
use crate::code_grant::registration::{
    read_registration, register, Endpoint as RegistrationEndpoint, Error as FlowError,
    RegistrationRequest,
};

use super::*;

/// All relevant methods for handling dynamic client registration.
pub struct RegistrationFlow<E, R>
where
    E: Endpoint<R>,
    R: WebRequest,
{
    endpoint: WrappedRegistration<E, R>,
}

/// Reads a registration back for the client owning it.
pub struct ReadRegistrationFlow<E, R>
where
    E: Endpoint<R>,
    R: WebRequest,
{
    endpoint: WrappedRegistration<E, R>,
}

struct WrappedRegistration<E: Endpoint<R>, R: WebRequest> {
    inner: E,
    r_type: PhantomData<R>,
}

impl<E, R> RegistrationFlow<E, R>
where
    E: Endpoint<R>,
    R: WebRequest,
{
    /// Check that the endpoint supports the necessary operations for handling requests.
    pub fn prepare(mut endpoint: E) -> Result<Self, E::Error> {
        if endpoint.registrar_mut().is_none() || endpoint.http().is_none() {
            return Err(endpoint.error(OAuthError::PrimitiveError));
        }

        Ok(RegistrationFlow {
            endpoint: WrappedRegistration {
                inner: endpoint,
                r_type: PhantomData,
            },
        })
    }

    /// Use the checked endpoint to execute the registration flow for a request.
    pub fn execute(&mut self, mut request: R) -> Result<R::Response, E::Error> {
        let body = match request.raw_body() {
            Ok(Some(body)) => body.into_owned(),
            Ok(None) => String::new(),
            Err(err) => return Err(self.endpoint.inner.web_error(err)),
        };

        let parsed: Result<RegistrationRequest, _> = serde_json::from_str(&body);
        let result = match parsed {
            Ok(parsed) => register(&mut self.endpoint, &parsed),
            Err(_) => {
                let mut error =
                    AccessTokenError::new(AccessTokenErrorType::InvalidConfigurationParameter);
                error.explain("Malformed registration request");
                Err(FlowError::Invalid(error))
            }
        };

        match result {
            Ok(response_body) => {
                let body = serde_json::to_string(&response_body)
                    .map_err(|_| self.endpoint.inner.error(OAuthError::PrimitiveError))?;
                let mut response = self
                    .endpoint
                    .inner
                    .response(&mut request, Template::new_ok())?;
                response
                    .ok()
                    .and_then(|()| response.no_store())
                    .and_then(|()| response.body_json(&body))
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                Ok(response)
            }
            Err(error) => registration_error(&mut self.endpoint.inner, &mut request, error),
        }
    }
}

impl<E, R> ReadRegistrationFlow<E, R>
where
    E: Endpoint<R>,
    R: WebRequest,
{
    /// Check that the endpoint supports the necessary operations for handling requests.
    pub fn prepare(mut endpoint: E) -> Result<Self, E::Error> {
        if endpoint.registrar_mut().is_none() {
            return Err(endpoint.error(OAuthError::PrimitiveError));
        }

        Ok(ReadRegistrationFlow {
            endpoint: WrappedRegistration {
                inner: endpoint,
                r_type: PhantomData,
            },
        })
    }

    /// Use the checked endpoint to read a registration back.
    pub fn execute(&mut self, mut request: R) -> Result<R::Response, E::Error> {
        let bearer = match request.authheader() {
            Ok(Some(header)) => parse_bearer_authorization(header.as_ref()).map(str::to_string),
            Ok(None) => None,
            Err(err) => return Err(self.endpoint.inner.web_error(err)),
        };

        let client_id = match request.query() {
            Ok(query) => query.unique_value("client_id").map(Cow::into_owned),
            Err(err) => return Err(self.endpoint.inner.web_error(err)),
        };

        let result = match (bearer, client_id) {
            (Some(bearer), Some(client_id)) => {
                read_registration(&mut self.endpoint, &bearer, &client_id)
            }
            _ => Err(FlowError::Unauthorized),
        };

        match result {
            Ok(response_body) => {
                let body = serde_json::to_string(&response_body)
                    .map_err(|_| self.endpoint.inner.error(OAuthError::PrimitiveError))?;
                let mut response = self
                    .endpoint
                    .inner
                    .response(&mut request, Template::new_ok())?;
                response
                    .ok()
                    .and_then(|()| response.no_store())
                    .and_then(|()| response.body_json(&body))
                    .map_err(|err| self.endpoint.inner.web_error(err))?;
                Ok(response)
            }
            Err(error) => registration_error(&mut self.endpoint.inner, &mut request, error),
        }
    }
}

fn registration_error<E: Endpoint<R>, R: WebRequest>(
    endpoint: &mut E, request: &mut R, error: FlowError,
) -> Result<R::Response, E::Error> {
    match error {
        FlowError::Invalid(mut error) => {
            let body = error.to_json();
            let mut response = endpoint.response(request, Template::new_bad(Some(&mut error)))?;
            response
                .client_error()
                .and_then(|()| response.body_json(&body))
                .map_err(|err| endpoint.web_error(err))?;
            Ok(response)
        }
        FlowError::Unauthorized => {
            let mut response = endpoint.response(request, Template::new_unauthorized(None))?;
            response
                .unauthorized("Bearer")
                .map_err(|err| endpoint.web_error(err))?;
            Ok(response)
        }
        FlowError::Primitive => Err(endpoint.error(OAuthError::PrimitiveError)),
    }
}

impl<E: Endpoint<R>, R: WebRequest> RegistrationEndpoint for WrappedRegistration<E, R> {
    fn registrar(&mut self) -> &mut dyn Registrar {
        self.inner.registrar_mut().unwrap()
    }

    fn http(&self) -> &dyn HttpFetch {
        self.inner.http().unwrap()
    }

    fn config(&self) -> &ProviderConfig {
        self.inner.config()
    }
}
