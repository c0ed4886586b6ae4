//! Assembles, signs and optionally encrypts ID tokens.
//!
//! The pipeline is a pure transform: it never stores state, it derives everything from a
//! grant snapshot, the client's registration and the provider configuration. Signing always
//! precedes encryption and the same machinery seals userinfo responses, only the per-artifact
//! algorithm lookup differs.
use crate::primitives::grant::Grant;
use crate::primitives::jose::{
    ArtifactKind, EncryptionAlg, EncryptionKey, Jose, JoseError, SigningKey,
};
use crate::primitives::registrar::{Registration, SubjectType};

use base64::{encode_config, URL_SAFE_NO_PAD};
use ring::digest;
use serde_json::{Map, Value};

/// The stateless ID token pipeline.
///
/// Construct one per request from the endpoint's JOSE backend and provider configuration.
pub struct IdTokenPipeline<'a> {
    jose: &'a dyn Jose,
    issuer: &'a str,
    pairwise_seed: &'a [u8],
}

/// A sealed userinfo response, distinguishing the content type to answer with.
#[derive(Clone, Debug, PartialEq)]
pub enum SealedUserInfo {
    /// Plain `application/json`, the client registered no response algorithms.
    Json(String),
    /// A signed and/or encrypted token, answered as `application/jwt`.
    Jwt(String),
}

impl<'a> IdTokenPipeline<'a> {
    /// Bind the pipeline to a JOSE backend and the provider identity.
    pub fn new(jose: &'a dyn Jose, issuer: &'a str, pairwise_seed: &'a [u8]) -> Self {
        IdTokenPipeline {
            jose,
            issuer,
            pairwise_seed,
        }
    }

    /// The subject identifier issued to this client for the grant's owner.
    ///
    /// Pairwise clients receive a stable identifier scoped to their sector, so that two
    /// clients in different sectors can not correlate the same end-user.
    pub fn subject(&self, grant: &Grant, registration: &Registration) -> String {
        match (&registration.subject_type, &registration.sector_id) {
            (SubjectType::Pairwise, Some(sector)) => {
                let mut input = Vec::new();
                input.extend_from_slice(sector.as_bytes());
                input.push(0);
                input.extend_from_slice(grant.owner_id.as_bytes());
                input.push(0);
                input.extend_from_slice(self.pairwise_seed);
                let derived = digest::digest(&digest::SHA256, &input);
                derived.as_ref().iter().map(|byte| format!("{:02x}", byte)).collect()
            }
            _ => grant.owner_id.clone(),
        }
    }

    /// Assemble the claim set for an ID token.
    ///
    /// Standard claims plus, when `user_info` is supplied, the end-user attributes the client
    /// asked to receive inline in the token.
    pub fn build_claims(
        &self, grant: &Grant, registration: &Registration, code: Option<&str>,
        access_token: Option<&str>, user_info: Option<&Map<String, Value>>,
    ) -> Map<String, Value> {
        let mut claims = Map::new();

        if let Some(user_info) = user_info {
            for (key, value) in user_info {
                claims.insert(key.clone(), value.clone());
            }
        }

        claims.insert("iss".to_string(), Value::from(self.issuer));
        claims.insert("sub".to_string(), Value::from(self.subject(grant, registration)));
        claims.insert("aud".to_string(), Value::from(grant.client_id.as_str()));
        claims.insert("iat".to_string(), Value::from(grant.issued_at.timestamp()));
        claims.insert("exp".to_string(), Value::from(grant.until.timestamp()));

        if let Some(nonce) = &grant.nonce {
            claims.insert("nonce".to_string(), Value::from(nonce.as_str()));
        }

        if let Some(code) = code {
            claims.insert("c_hash".to_string(), Value::from(half_hash(code)));
        }

        if let Some(access_token) = access_token {
            claims.insert("at_hash".to_string(), Value::from(half_hash(access_token)));
        }

        claims
    }

    /// Sign the claim set according to the client's registered preference.
    ///
    /// A symmetric preference selects the client secret as the key, everything else is signed
    /// with the provider's own key. Unspecified preference means `RS256`.
    pub fn sign(&self, claims: &Map<String, Value>, registration: &Registration) -> Result<String, JoseError> {
        let alg = registration.signing_alg(ArtifactKind::IdToken).unwrap_or_default();
        debug!("Signing ID token for {} with {}", registration.client_id, alg.as_str());

        let key = if alg.is_symmetric() {
            SigningKey::ClientSecret(&registration.client_secret)
        } else {
            SigningKey::Provider
        };

        let payload = serde_json::to_vec(claims).map_err(|_| JoseError::Invalid)?;
        self.jose.sign(&payload, key, alg)
    }

    /// Encrypt an already sealed token when the registration asks for it.
    ///
    /// The identity transform for clients without a registered encryption algorithm.
    pub fn encrypt(
        &self, token: String, registration: &Registration, kind: ArtifactKind,
    ) -> Result<String, JoseError> {
        let (alg, enc) = match registration.encryption(kind) {
            Some(parameters) => parameters,
            None => return Ok(token),
        };

        let key = match alg {
            EncryptionAlg::Dir => EncryptionKey::ClientSecret(&registration.client_secret),
            _ => EncryptionKey::ClientJwks(registration.jwks.as_ref().ok_or(JoseError::BadKey)?),
        };

        debug!(
            "Encrypting {:?} for {} with {}/{}",
            kind,
            registration.client_id,
            alg.as_str(),
            enc.as_str()
        );
        self.jose.encrypt(&token, key, alg, enc)
    }

    /// The full pipeline for one ID token: claims, then signature, then encryption.
    pub fn sign_and_maybe_encrypt(
        &self, grant: &Grant, registration: &Registration, code: Option<&str>,
        access_token: Option<&str>, user_info: Option<&Map<String, Value>>,
    ) -> Result<String, JoseError> {
        let claims = self.build_claims(grant, registration, code, access_token, user_info);
        let signed = self.sign(&claims, registration)?;
        self.encrypt(signed, registration, ArtifactKind::IdToken)
    }

    /// Seal a userinfo response according to the client's registered preferences.
    ///
    /// Signed when `userinfo_signed_response_alg` is registered, encrypted when
    /// `userinfo_encrypted_response_alg` is, plain json absent both.
    pub fn seal_userinfo(
        &self, info: &Map<String, Value>, registration: &Registration,
    ) -> Result<SealedUserInfo, JoseError> {
        let encryption = registration.encryption(ArtifactKind::Userinfo);

        let token = match registration.signing_alg(ArtifactKind::Userinfo) {
            Some(alg) => {
                let key = if alg.is_symmetric() {
                    SigningKey::ClientSecret(&registration.client_secret)
                } else {
                    SigningKey::Provider
                };
                let payload = serde_json::to_vec(info).map_err(|_| JoseError::Invalid)?;
                Some(self.jose.sign(&payload, key, alg)?)
            }
            None => None,
        };

        match (token, encryption.is_some()) {
            (Some(token), true) => {
                Ok(SealedUserInfo::Jwt(self.encrypt(token, registration, ArtifactKind::Userinfo)?))
            }
            (Some(token), false) => Ok(SealedUserInfo::Jwt(token)),
            (None, true) => {
                let json = serde_json::to_string(info).map_err(|_| JoseError::Invalid)?;
                Ok(SealedUserInfo::Jwt(self.encrypt(json, registration, ArtifactKind::Userinfo)?))
            }
            (None, false) => {
                let json = serde_json::to_string(info).map_err(|_| JoseError::Invalid)?;
                Ok(SealedUserInfo::Json(json))
            }
        }
    }
}

/// The left half of the SHA-256 digest, base64url encoded.
///
/// This is the `c_hash`/`at_hash` binding of an ID token to the code and access token issued
/// alongside it.
fn half_hash(token: &str) -> String {
    let digest = digest::digest(&digest::SHA256, token.as_bytes());
    encode_config(&digest.as_ref()[..16], URL_SAFE_NO_PAD)
}
