//! Error types for the code-cord domain crate

use thiserror::Error;

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in the domain layer
#[derive(Error, Debug)]
pub enum CoreError {
    /// RSA key generation failed
    #[error("could not generate RSA key pair: {0}")]
    KeyGeneration(String),

    /// Key material could not be encoded to PEM
    #[error("could not encode key material: {0}")]
    KeyEncoding(String),

    /// Key material could not be parsed from PEM
    #[error("could not parse key material: {0}")]
    KeyParsing(String),

    /// A signing operation was requested but no key was loaded
    #[error("no signing key has been loaded")]
    KeyMissing,

    /// Public and private key do not belong together
    #[error("public and private keys do not form a pair")]
    KeyMismatch,

    /// Token signing failed
    #[error("could not sign token: {0}")]
    TokenSigning(String),

    /// Token verification failed
    #[error("could not verify token: {0}")]
    TokenInvalid(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

impl From<rsa::Error> for CoreError {
    fn from(err: rsa::Error) -> Self {
        CoreError::KeyGeneration(err.to_string())
    }
}

impl From<rsa::pkcs1::Error> for CoreError {
    fn from(err: rsa::pkcs1::Error) -> Self {
        CoreError::KeyEncoding(err.to_string())
    }
}
