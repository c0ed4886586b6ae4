//! Generators produce the string tokens handed out to clients.
//!
//! Authorization codes, access tokens and refresh tokens all need to be unguessable strings
//! that the issuing store can later map back to a grant. Client identifiers and secrets are
//! generated here as well, so that every piece of entropy the provider mints comes from one
//! place.
use super::grant::Grant;

use base64::encode;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng, RngCore};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

/// Generic token generator for a specific grant.
///
/// The interface may be reused for authorization codes, bearer tokens and refresh tokens.
///
/// ## Requirements on implementations
///
/// When queried without repetition (users will change the `usage` counter each time), this
/// method MUST be indistinguishable from a random function. The requirement is derived from
/// the fact that one should not be able to derive the token for another artifact from ones
/// own. Since there may be multiple tokens for a grant, the `usage` counter makes it possible
/// for store implementations to differentiate between these.
pub trait TagGrant {
    /// For example sign the input parameters or generate a random token.
    fn tag(&mut self, usage: u64, grant: &Grant) -> Result<String, ()>;
}

/// Generates tokens from random bytes.
///
/// Each token is derived from the operating system random generator. This generator will
/// always succeed.
pub struct RandomGenerator {
    random: SystemRandom,
    len: usize,
}

impl RandomGenerator {
    /// Generates tokens with a specific byte length.
    pub fn new(length: usize) -> RandomGenerator {
        RandomGenerator {
            random: SystemRandom::new(),
            len: length,
        }
    }

    fn generate(&self) -> String {
        let mut result = vec![0; self.len];
        self.random
            .fill(result.as_mut_slice())
            .expect("Failed to generate random token");
        encode(&result)
    }
}

impl TagGrant for RandomGenerator {
    fn tag(&mut self, _: u64, _: &Grant) -> Result<String, ()> {
        Ok(self.generate())
    }
}

impl<'a> TagGrant for &'a RandomGenerator {
    fn tag(&mut self, _: u64, _: &Grant) -> Result<String, ()> {
        Ok(self.generate())
    }
}

impl<'a, T: TagGrant + ?Sized + 'a> TagGrant for Box<T> {
    fn tag(&mut self, counter: u64, grant: &Grant) -> Result<String, ()> {
        (&mut **self).tag(counter, grant)
    }
}

impl<'a, T: TagGrant + ?Sized + 'a> TagGrant for &'a mut T {
    fn tag(&mut self, counter: u64, grant: &Grant) -> Result<String, ()> {
        (&mut **self).tag(counter, grant)
    }
}

/// Derives client secrets from a server-held seed.
///
/// The secret is a keyed hash over the current time, fresh entropy and the client id. It is
/// not reversible and collisions are astronomically improbable, which is all that is required
/// of it; in particular it need not be recoverable from the inputs ever again.
pub struct ClientSecretPolicy {
    seed: hmac::Key,
}

impl ClientSecretPolicy {
    /// Construct a policy from a server seed.
    ///
    /// Security notice: never use a password alone as the seed. Instead, generate a new key
    /// using a utility such as `openssl rand` that you then store away securely.
    pub fn new(seed: &[u8]) -> Self {
        ClientSecretPolicy {
            seed: hmac::Key::new(hmac::HMAC_SHA256, seed),
        }
    }

    /// A policy whose secrets can not be re-derived after program exit.
    pub fn ephemeral() -> Self {
        ClientSecretPolicy {
            seed: hmac::Key::generate(hmac::HMAC_SHA256, &SystemRandom::new())
                .expect("Failed to generate ephemeral seed"),
        }
    }

    /// Mint the secret for a freshly allocated client id.
    pub fn derive(&self, client_id: &str) -> String {
        let mut entropy = [0u8; 16];
        thread_rng().fill_bytes(&mut entropy);

        let mut message = Vec::new();
        message.extend_from_slice(Utc::now().timestamp_nanos().to_be_bytes().as_ref());
        message.extend_from_slice(&entropy);
        message.extend_from_slice(client_id.as_bytes());

        let tag = hmac::sign(&self.seed, &message);
        tag.as_ref().iter().map(|byte| format!("{:02x}", byte)).collect()
    }
}

/// A random identifier of the given length, drawn from the alphanumeric alphabet.
///
/// Used for client ids and registration access tokens, where the consumer retries until the
/// result does not collide with an existing entry.
pub fn random_id(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::grant::Grant;
    use chrono::Utc;

    fn grant_template() -> Grant {
        Grant {
            owner_id: "Owner".to_string(),
            client_id: "Client".to_string(),
            scope: "openid".parse().unwrap(),
            nonce: None,
            redirect_uri: "https://client.example/endpoint".parse().unwrap(),
            permissions: vec![],
            oidc_request: None,
            issued_at: Utc::now(),
            until: Utc::now(),
        }
    }

    #[test]
    fn random_tokens_differ() {
        let mut generator = RandomGenerator::new(16);
        let grant = grant_template();
        let one = generator.tag(0, &grant).unwrap();
        let two = generator.tag(1, &grant).unwrap();
        assert_ne!(one, two);
        assert!(!one.is_empty());
    }

    #[test]
    fn secrets_are_unique_per_invocation() {
        let policy = ClientSecretPolicy::new(b"not a good seed");
        let first = policy.derive("SomeClient");
        let second = policy.derive("SomeClient");
        // Fresh entropy enters each derivation, even for the same client id.
        assert_ne!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn random_ids_have_requested_length() {
        let id = random_id(12);
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
