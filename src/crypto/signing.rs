// Certificate signing.
//
// Two schemes are supported: Ed25519 when the operator configures a private
// key, and HMAC-SHA256 over a locally held secret otherwise. The certificate
// records which scheme produced the signature so a verifier knows what to
// check against.

use crate::crypto::{to_hex, SecureRng};
use crate::{WipeError, WipeResult};
use ring::hmac;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureScheme {
    HmacSha256,
    Ed25519,
}

impl std::fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureScheme::HmacSha256 => f.write_str("HMAC-SHA256"),
            SignatureScheme::Ed25519 => f.write_str("Ed25519"),
        }
    }
}

pub enum Signer {
    Hmac { key: hmac::Key },
    Ed25519 { key_pair: Box<Ed25519KeyPair> },
}

impl Signer {
    /// HMAC signer over an existing installation secret.
    pub fn hmac_from_secret(secret: &[u8]) -> Self {
        Signer::Hmac {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    /// HMAC signer with a fresh random secret. The secret only lives inside
    /// the key; installations that need to re-verify later must use
    /// `hmac_from_secret` with a persisted secret.
    pub fn generate_hmac() -> WipeResult<Self> {
        let secret = SecureRng::new()
            .generate_secret(32)
            .map_err(|e| WipeError::CertificateSigningFailed(e.to_string()))?;
        Ok(Self::hmac_from_secret(&secret))
    }

    /// Ed25519 signer from PKCS#8 key material.
    pub fn ed25519_from_pkcs8(pkcs8: &[u8]) -> WipeResult<Self> {
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8)
            .map_err(|e| WipeError::CertificateSigningFailed(format!("bad Ed25519 key: {}", e)))?;
        Ok(Signer::Ed25519 {
            key_pair: Box::new(key_pair),
        })
    }

    /// Generate a fresh Ed25519 key pair, returning the signer and the
    /// PKCS#8 document for the operator to store.
    pub fn generate_ed25519() -> WipeResult<(Self, Vec<u8>)> {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| WipeError::CertificateSigningFailed("key generation failed".into()))?;
        let signer = Self::ed25519_from_pkcs8(pkcs8.as_ref())?;
        Ok((signer, pkcs8.as_ref().to_vec()))
    }

    pub fn scheme(&self) -> SignatureScheme {
        match self {
            Signer::Hmac { .. } => SignatureScheme::HmacSha256,
            Signer::Ed25519 { .. } => SignatureScheme::Ed25519,
        }
    }

    /// Hex public key for Ed25519 signers; None for HMAC (the secret is not
    /// disclosed).
    pub fn public_key_hex(&self) -> Option<String> {
        match self {
            Signer::Hmac { .. } => None,
            Signer::Ed25519 { key_pair } => Some(to_hex(key_pair.public_key().as_ref())),
        }
    }

    pub fn sign(&self, message: &[u8]) -> WipeResult<String> {
        match self {
            Signer::Hmac { key } => Ok(to_hex(hmac::sign(key, message).as_ref())),
            Signer::Ed25519 { key_pair } => Ok(to_hex(key_pair.sign(message).as_ref())),
        }
    }

    pub fn verify(&self, message: &[u8], signature_hex: &str) -> bool {
        let Some(signature) = from_hex(signature_hex) else {
            return false;
        };
        match self {
            Signer::Hmac { key } => hmac::verify(key, message, &signature).is_ok(),
            Signer::Ed25519 { key_pair } => {
                UnparsedPublicKey::new(&ED25519, key_pair.public_key().as_ref())
                    .verify(message, &signature)
                    .is_ok()
            }
        }
    }
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
