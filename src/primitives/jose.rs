//! The seam towards the JWS/JWE algorithms.
//!
//! The provider never implements the cryptographic standards itself. It decides *what* to
//! sign or encrypt and *which* key to use, then hands the payload to a [`Jose`] backend. The
//! provided [`SecretJose`] covers the symmetric part of the algorithm space with `ring`,
//! which is enough for prototyping and for clients registered with `HS*`/`dir` preferences;
//! deployments with asymmetric keys plug in their own backend.
//!
//! [`Jose`]: trait.Jose.html
//! [`SecretJose`]: struct.SecretJose.html
use std::fmt;

use base64::{decode_config, encode_config, URL_SAFE_NO_PAD};
use ring::rand::{SecureRandom, SystemRandom};
use ring::{aead, digest, hmac};

/// Signature algorithm for a token leaving the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigningAlg {
    /// RSASSA-PKCS1-v1_5 with SHA-256, the default of the standard.
    Rs256,
    /// ECDSA with P-256 and SHA-256.
    Es256,
    /// HMAC with SHA-256. Symmetric, keyed by the client secret.
    Hs256,
    /// HMAC with SHA-384. Symmetric, keyed by the client secret.
    Hs384,
    /// HMAC with SHA-512. Symmetric, keyed by the client secret.
    Hs512,
}

/// Key management algorithm of an encrypted response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionAlg {
    /// Direct use of a shared symmetric key.
    Dir,
    /// RSAES-PKCS1-v1_5 key encryption.
    Rsa1_5,
    /// RSAES OAEP key encryption.
    RsaOaep,
    /// AES-128 key wrap.
    A128Kw,
}

/// Content encryption applied to the payload of an encrypted response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentEncryption {
    /// AES-128-CBC with HMAC, the default when a client declares none.
    A128Cbc,
    /// AES-256-CBC with HMAC.
    A256Cbc,
    /// AES-128-GCM.
    A128Gcm,
    /// AES-256-GCM.
    A256Gcm,
}

/// The response artifacts with independently registered algorithm preferences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// The ID token attached to authorization and token responses.
    IdToken,
    /// The response of the userinfo endpoint.
    Userinfo,
    /// An embedded request object sent by the client.
    RequestObject,
}

/// Selects the signing key material for one operation.
///
/// Whether the provider key or the client secret applies is an algorithm decision made by the
/// ID token pipeline: symmetric algorithms are keyed by the secret shared with the client,
/// everything else by the provider's own key.
#[derive(Clone, Copy, Debug)]
pub enum SigningKey<'a> {
    /// The provider's own signing key, held by the backend.
    Provider,
    /// The secret shared with the client at registration.
    ClientSecret(&'a str),
}

/// Selects the encryption key material for one operation.
#[derive(Clone, Copy, Debug)]
pub enum EncryptionKey<'a> {
    /// The secret shared with the client, for direct symmetric encryption.
    ClientSecret(&'a str),
    /// The public keys the client registered, as a JWKS document.
    ClientJwks(&'a serde_json::Value),
}

/// Failures of a JOSE backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoseError {
    /// The algorithm or key combination is not supported by this backend.
    Unsupported,
    /// The token was malformed or its signature did not verify.
    Invalid,
    /// The supplied key material was unusable.
    BadKey,
}

impl SigningAlg {
    /// Whether the algorithm is keyed by a shared secret rather than a key pair.
    pub fn is_symmetric(self) -> bool {
        matches!(self, SigningAlg::Hs256 | SigningAlg::Hs384 | SigningAlg::Hs512)
    }

    /// The standard name of the algorithm.
    pub fn as_str(self) -> &'static str {
        match self {
            SigningAlg::Rs256 => "RS256",
            SigningAlg::Es256 => "ES256",
            SigningAlg::Hs256 => "HS256",
            SigningAlg::Hs384 => "HS384",
            SigningAlg::Hs512 => "HS512",
        }
    }

    /// Parse a standard algorithm name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "RS256" => Some(SigningAlg::Rs256),
            "ES256" => Some(SigningAlg::Es256),
            "HS256" => Some(SigningAlg::Hs256),
            "HS384" => Some(SigningAlg::Hs384),
            "HS512" => Some(SigningAlg::Hs512),
            _ => None,
        }
    }
}

impl Default for SigningAlg {
    /// `RS256`, the default required by the standard when a client registers no preference.
    fn default() -> Self {
        SigningAlg::Rs256
    }
}

impl EncryptionAlg {
    /// The standard name of the algorithm.
    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionAlg::Dir => "dir",
            EncryptionAlg::Rsa1_5 => "RSA1_5",
            EncryptionAlg::RsaOaep => "RSA-OAEP",
            EncryptionAlg::A128Kw => "A128KW",
        }
    }

    /// Parse a standard algorithm name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "dir" => Some(EncryptionAlg::Dir),
            "RSA1_5" => Some(EncryptionAlg::Rsa1_5),
            "RSA-OAEP" => Some(EncryptionAlg::RsaOaep),
            "A128KW" => Some(EncryptionAlg::A128Kw),
            _ => None,
        }
    }
}

impl ContentEncryption {
    /// The standard name of the content encryption.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentEncryption::A128Cbc => "A128CBC",
            ContentEncryption::A256Cbc => "A256CBC",
            ContentEncryption::A128Gcm => "A128GCM",
            ContentEncryption::A256Gcm => "A256GCM",
        }
    }

    /// Parse a standard content encryption name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "A128CBC" => Some(ContentEncryption::A128Cbc),
            "A256CBC" => Some(ContentEncryption::A256Cbc),
            "A128GCM" => Some(ContentEncryption::A128Gcm),
            "A256GCM" => Some(ContentEncryption::A256Gcm),
            _ => None,
        }
    }
}

impl Default for ContentEncryption {
    /// `A128CBC`, applied when a client declares an encryption algorithm but no encoding.
    fn default() -> Self {
        ContentEncryption::A128Cbc
    }
}

impl fmt::Display for JoseError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JoseError::Unsupported => fmt.write_str("algorithm not supported by this backend"),
            JoseError::Invalid => fmt.write_str("token malformed or failed verification"),
            JoseError::BadKey => fmt.write_str("unusable key material"),
        }
    }
}

impl std::error::Error for JoseError {}

/// A backend performing the actual JWS/JWE operations.
///
/// Signing always precedes encryption, the pipeline composes the two in that order. `open` is
/// the inverse used on embedded request objects received from clients.
pub trait Jose {
    /// Produce a signed compact token over the payload.
    fn sign(&self, payload: &[u8], key: SigningKey, alg: SigningAlg) -> Result<String, JoseError>;

    /// Encrypt an already signed token (or a plain JSON payload) for the client.
    fn encrypt(
        &self, token: &str, key: EncryptionKey, alg: EncryptionAlg, enc: ContentEncryption,
    ) -> Result<String, JoseError>;

    /// Verify a compact token received from a client and return its payload.
    fn open(&self, token: &str, key: SigningKey) -> Result<Vec<u8>, JoseError>;
}

impl<'s, J: Jose + ?Sized> Jose for &'s J {
    fn sign(&self, payload: &[u8], key: SigningKey, alg: SigningAlg) -> Result<String, JoseError> {
        (**self).sign(payload, key, alg)
    }

    fn encrypt(
        &self, token: &str, key: EncryptionKey, alg: EncryptionAlg, enc: ContentEncryption,
    ) -> Result<String, JoseError> {
        (**self).encrypt(token, key, alg, enc)
    }

    fn open(&self, token: &str, key: SigningKey) -> Result<Vec<u8>, JoseError> {
        (**self).open(token, key)
    }
}

impl<J: Jose + ?Sized> Jose for Box<J> {
    fn sign(&self, payload: &[u8], key: SigningKey, alg: SigningAlg) -> Result<String, JoseError> {
        (**self).sign(payload, key, alg)
    }

    fn encrypt(
        &self, token: &str, key: EncryptionKey, alg: EncryptionAlg, enc: ContentEncryption,
    ) -> Result<String, JoseError> {
        (**self).encrypt(token, key, alg, enc)
    }

    fn open(&self, token: &str, key: SigningKey) -> Result<Vec<u8>, JoseError> {
        (**self).open(token, key)
    }
}

/// A symmetric JOSE backend built on `ring`.
///
/// Signs with the HMAC family, keyed either by its own provider key (`HS256`) or by the
/// client secret, and encrypts via direct AES-128-GCM under a key derived from the client
/// secret. Asymmetric algorithms return [`JoseError::Unsupported`]; a deployment wanting
/// `RS256` ID tokens brings a backend wrapping its JOSE library of choice.
///
/// [`JoseError::Unsupported`]: enum.JoseError.html#variant.Unsupported
pub struct SecretJose {
    key: hmac::Key,
    random: SystemRandom,
}

impl SecretJose {
    /// Construct a backend from a provider signing secret.
    pub fn new(secret: &[u8]) -> Self {
        SecretJose {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            random: SystemRandom::new(),
        }
    }

    /// Construct a backend whose tokens are only verifiable for the program execution.
    pub fn ephemeral() -> Self {
        SecretJose {
            key: hmac::Key::generate(hmac::HMAC_SHA256, &SystemRandom::new())
                .expect("Failed to generate ephemeral signing key"),
            random: SystemRandom::new(),
        }
    }

    fn mac_algorithm(alg: SigningAlg) -> Result<hmac::Algorithm, JoseError> {
        match alg {
            SigningAlg::Hs256 => Ok(hmac::HMAC_SHA256),
            SigningAlg::Hs384 => Ok(hmac::HMAC_SHA384),
            SigningAlg::Hs512 => Ok(hmac::HMAC_SHA512),
            SigningAlg::Rs256 | SigningAlg::Es256 => Err(JoseError::Unsupported),
        }
    }

    fn signing_key(&self, key: SigningKey, alg: SigningAlg) -> Result<hmac::Key, JoseError> {
        match key {
            // The provider key is an HS256 key, other tags would lie about the mac in use.
            SigningKey::Provider if alg == SigningAlg::Hs256 => Ok(self.key.clone()),
            SigningKey::Provider => Err(JoseError::Unsupported),
            SigningKey::ClientSecret(secret) => {
                Ok(hmac::Key::new(Self::mac_algorithm(alg)?, secret.as_bytes()))
            }
        }
    }

    fn content_key(secret: &str) -> aead::LessSafeKey {
        let derived = digest::digest(&digest::SHA256, secret.as_bytes());
        let unbound = aead::UnboundKey::new(&aead::AES_128_GCM, &derived.as_ref()[..16])
            .expect("AES-128 key length is fixed");
        aead::LessSafeKey::new(unbound)
    }
}

impl Jose for SecretJose {
    fn sign(&self, payload: &[u8], key: SigningKey, alg: SigningAlg) -> Result<String, JoseError> {
        let key = self.signing_key(key, alg)?;
        let header = format!("{{\"alg\":\"{}\",\"typ\":\"JWT\"}}", alg.as_str());

        let mut token = encode_config(header.as_bytes(), URL_SAFE_NO_PAD);
        token.push('.');
        token.push_str(&encode_config(payload, URL_SAFE_NO_PAD));

        let tag = hmac::sign(&key, token.as_bytes());
        token.push('.');
        token.push_str(&encode_config(tag.as_ref(), URL_SAFE_NO_PAD));
        Ok(token)
    }

    fn encrypt(
        &self, token: &str, key: EncryptionKey, alg: EncryptionAlg, enc: ContentEncryption,
    ) -> Result<String, JoseError> {
        let secret = match (alg, key) {
            (EncryptionAlg::Dir, EncryptionKey::ClientSecret(secret)) => secret,
            (EncryptionAlg::Dir, EncryptionKey::ClientJwks(_)) => return Err(JoseError::BadKey),
            _ => return Err(JoseError::Unsupported),
        };

        if enc != ContentEncryption::A128Gcm {
            return Err(JoseError::Unsupported);
        }

        let mut nonce_bytes = [0u8; 12];
        self.random.fill(&mut nonce_bytes).map_err(|_| JoseError::BadKey)?;
        let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

        let header = format!("{{\"alg\":\"{}\",\"enc\":\"{}\"}}", alg.as_str(), enc.as_str());
        let protected = encode_config(header.as_bytes(), URL_SAFE_NO_PAD);

        let mut in_out = token.as_bytes().to_vec();
        Self::content_key(secret)
            .seal_in_place_append_tag(nonce, aead::Aad::from(protected.as_bytes()), &mut in_out)
            .map_err(|_| JoseError::BadKey)?;

        let tag_at = in_out.len() - 16;
        Ok(format!(
            "{}..{}.{}.{}",
            protected,
            encode_config(&nonce_bytes, URL_SAFE_NO_PAD),
            encode_config(&in_out[..tag_at], URL_SAFE_NO_PAD),
            encode_config(&in_out[tag_at..], URL_SAFE_NO_PAD),
        ))
    }

    fn open(&self, token: &str, key: SigningKey) -> Result<Vec<u8>, JoseError> {
        let mut parts = token.split('.');
        let (header, payload, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(header), Some(payload), Some(signature), None) => (header, payload, signature),
            _ => return Err(JoseError::Invalid),
        };

        let header_json = decode_config(header, URL_SAFE_NO_PAD).map_err(|_| JoseError::Invalid)?;
        let header_json: serde_json::Value =
            serde_json::from_slice(&header_json).map_err(|_| JoseError::Invalid)?;
        let alg = header_json
            .get("alg")
            .and_then(|alg| alg.as_str())
            .ok_or(JoseError::Invalid)?;

        let payload_bytes = decode_config(payload, URL_SAFE_NO_PAD).map_err(|_| JoseError::Invalid)?;

        if alg == "none" {
            if !signature.is_empty() {
                return Err(JoseError::Invalid);
            }
            return Ok(payload_bytes);
        }

        let alg = SigningAlg::from_name(alg).ok_or(JoseError::Unsupported)?;
        let key = self.signing_key(key, alg)?;

        let signed = &token[..header.len() + 1 + payload.len()];
        let tag = decode_config(signature, URL_SAFE_NO_PAD).map_err(|_| JoseError::Invalid)?;
        hmac::verify(&key, signed.as_bytes(), &tag).map_err(|_| JoseError::Invalid)?;

        Ok(payload_bytes)
    }
}
