//! A collection of primitives useful for more than one endpoint.
//!
//! A primitive is the smallest independent unit of policy used in OpenID Connect endpoints.
//! For example, a `GrantStore` creates and tracks the codes and tokens derived from one
//! authorization while a `Registrar` governs the set of known clients and their redirect uris.
//! Abstracting away the underlying primitives makes it possible to provide –e.g.– an
//! independent database based implementation without touching the protocol logic.
//!
//! These should be used to build or instantiate an `Endpoint`, see the [`endpoint`] module.
//!
//! [`endpoint`]: ../endpoint/index.html

use chrono::DateTime;
use chrono::Utc;

pub mod generator;
pub mod grant;
pub mod jose;
pub mod registrar;
pub mod scope;
pub mod sessions;

type Time = DateTime<Utc>;

/// Commonly used primitives for frontends and backends.
pub mod prelude {
    pub use super::generator::{ClientSecretPolicy, RandomGenerator, TagGrant};
    pub use super::grant::{Grant, OidcRequest};
    pub use super::jose::{ArtifactKind, Jose, SecretJose, SigningAlg};
    pub use super::registrar::{ClientMap, ClientUrl, RedirectRecord, Registrar, Registration};
    pub use super::scope::Scope;
    pub use super::sessions::{GrantStore, SessionMap, TokenBundle};
}
