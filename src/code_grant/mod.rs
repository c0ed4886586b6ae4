//! Transport-independent protocol logic of the provider.
//!
//! Each submodule implements one endpoint of the provider as a pure function over trait
//! abstractions of the request and the primitives, so that any front-end representation can
//! drive them. The heart is the [`authorization`] state machine; [`access_token`],
//! [`userinfo`] and [`registration`] cover the remaining stateful endpoints while
//! [`discovery`] is purely declarative.
//!
//! [`authorization`]: authorization/index.html
//! [`access_token`]: access_token/index.html
//! [`userinfo`]: userinfo/index.html
//! [`registration`]: registration/index.html
//! [`discovery`]: discovery/index.html
use std::fmt;

use chrono::Duration;
use url::Url;

use crate::primitives::registrar::SubjectType;

pub mod access_token;
pub mod authorization;
pub mod discovery;
pub mod error;
pub mod id_token;
pub mod registration;
pub mod userinfo;

/// Ambient provider state, passed explicitly to every flow.
///
/// There are no module level globals: whoever instantiates an endpoint constructs one of
/// these and hands it to the flows through the endpoint trait.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// The issuer identity of this provider, also the base of its endpoint urls.
    pub issuer: Url,

    /// Server seed entering client secret derivation and pairwise subject identifiers.
    pub seed: Vec<u8>,

    /// Name of the single-sign-on cookie set after a successful authorization.
    pub cookie_name: String,

    /// How long the single-sign-on cookie stays valid.
    pub sso_ttl: Duration,

    /// Upper bound on fetching `request_uri` and `sector_identifier_uri` documents.
    pub fetch_timeout: std::time::Duration,

    /// The subject type assigned to registrations that state no preference.
    pub preferred_subject_type: SubjectType,
}

impl ProviderConfig {
    /// A configuration with common defaults for everything but identity and seed.
    pub fn new(issuer: Url, seed: &[u8]) -> Self {
        ProviderConfig {
            issuer,
            seed: seed.to_vec(),
            cookie_name: "oxide-oidc".to_string(),
            sso_ttl: Duration::hours(8),
            fetch_timeout: std::time::Duration::from_secs(5),
            preferred_subject_type: SubjectType::Public,
        }
    }
}

/// Bounded retrieval of documents referenced by requests.
///
/// Only two flows reach the network at all: dereferencing a `request_uri` during
/// authorization and a `sector_identifier_uri` during registration. Implementations must
/// bound the request by [`ProviderConfig::fetch_timeout`] and map every transport failure to
/// a [`FetchError`] instead of unwinding.
///
/// [`ProviderConfig::fetch_timeout`]: struct.ProviderConfig.html#structfield.fetch_timeout
/// [`FetchError`]: enum.FetchError.html
pub trait HttpFetch {
    /// Retrieve the document behind the url.
    fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

impl<'s, F: HttpFetch + ?Sized> HttpFetch for &'s F {
    fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        (**self).fetch(url)
    }
}

/// Failure modes of a bounded document fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchError {
    /// The configured timeout elapsed before a response arrived.
    Timeout,
    /// The connection could not be established or broke down.
    Connection,
    /// A response arrived but its body was unusable.
    Body,
}

impl fmt::Display for FetchError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FetchError::Timeout => fmt.write_str("document fetch timed out"),
            FetchError::Connection => fmt.write_str("connection failed"),
            FetchError::Body => fmt.write_str("document body was unusable"),
        }
    }
}

impl std::error::Error for FetchError {}
