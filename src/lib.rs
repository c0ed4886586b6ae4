//! # oxide-oidc
//!
//! An OpenID Connect provider core, for use behind any front-end able to hand over parsed
//! key/value requests, featuring a set of configurable and pluggable back-ends.
//!
//! ## About
//!
//! `oxide-oidc` turns an incoming authorization request into an authenticated, scoped grant,
//! issues and rotates the derived tokens (authorization code, access token, refresh token,
//! signed and optionally encrypted ID token) and governs dynamic client registration including
//! redirect-uri trust and sector identifiers. The library deliberately stops at the protocol:
//! HTTP parsing and serialization, the end-user login machinery, the raw JWS/JWE algorithms and
//! persistent key storage are all consumed through traits so that deployments can plug in their
//! own.
//!
//! A set of [`primitives`] needs to be chosen: a [`Registrar`] governing known clients, a
//! [`GrantStore`] owning the grant lifecycle, and a [`Jose`] sealer for tokens that leave the
//! server signed or encrypted. There is a simple, in-memory implementation provided for each.
//! More complex solutions might require a customized trait implementation, especially when
//! specific consistency requirements are needed.
//!
//! On top of those, the [`endpoint`] module offers flow types that drive one request through
//! the [`code_grant`] protocol logic: authorization, token exchange, userinfo, registration.
//! The endpoint is generic over a [`WebRequest`] so that any front-end representation can be
//! attached without jeopardizing the protocol invariants.
//!
//! _WARNING_: Custom front-ends MUST ensure a secure transportation layer with confidential
//! clients. This means using TLS for communication over HTTPS.
//!
//! [`primitives`]: primitives/index.html
//! [`Registrar`]: primitives/registrar/trait.Registrar.html
//! [`GrantStore`]: primitives/sessions/trait.GrantStore.html
//! [`Jose`]: primitives/jose/trait.Jose.html
//! [`endpoint`]: endpoint/index.html
//! [`code_grant`]: code_grant/index.html
//! [`WebRequest`]: endpoint/trait.WebRequest.html
#![warn(missing_docs)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod code_grant;
pub mod endpoint;
pub mod primitives;
