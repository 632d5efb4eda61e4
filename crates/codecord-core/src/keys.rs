//! RSA key material for stream and operator tokens
//!
//! Every stream gets its own 2048-bit RSA pair at creation time. The private
//! half never leaves the process: it lives inside the stream's runtime and is
//! destroyed with it, which is what invalidates outstanding stream tokens.

use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::{CoreError, Result};

/// RSA modulus size for generated keys
pub const RSA_KEY_BITS: usize = 2048;

/// An RSA key pair ready for RS256 signing and verification
pub struct RsaKeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    public_pem: String,
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("private_key", &"[redacted]")
            .finish()
    }
}

impl RsaKeyPair {
    /// Generate a fresh 2048-bit pair
    ///
    /// Key generation is CPU-heavy; async callers should run it on a
    /// blocking thread.
    pub fn generate() -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key.to_pkcs1_pem(LineEnding::LF)?;
        let public_pem = public_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|err| CoreError::KeyEncoding(err.to_string()))?;

        Self::from_pem(&private_pem, &public_pem)
    }

    /// Build a pair from PEM-encoded key material
    pub fn from_pem(private_pem: &str, public_pem: &str) -> Result<Self> {
        let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|err| CoreError::KeyParsing(err.to_string()))?;
        let decoding = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|err| CoreError::KeyParsing(err.to_string()))?;

        Ok(Self {
            encoding,
            decoding,
            public_pem: public_pem.to_owned(),
        })
    }

    /// Signing key for RS256
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    /// Verification key for RS256
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// PEM form of the public half
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_round_trip() {
        let keys = RsaKeyPair::generate().unwrap();
        assert!(keys.public_pem().contains("BEGIN RSA PUBLIC KEY"));

        // the same PEM must parse back into a usable pair
        let public_pem = keys.public_pem().to_owned();
        let reparsed = DecodingKey::from_rsa_pem(public_pem.as_bytes());
        assert!(reparsed.is_ok());
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let keys = RsaKeyPair::generate().unwrap();
        let rendered = format!("{keys:?}");
        assert!(rendered.contains("[redacted]"));
        assert!(!rendered.contains("BEGIN"));
    }
}
