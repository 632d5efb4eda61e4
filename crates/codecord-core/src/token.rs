//! Access token signing and verification
//!
//! Two token kinds, both RS256:
//!
//! - **Server tokens** carry RFC 7519 registered claims and are signed by the
//!   operator's key. They authorize the server-level surface (creating
//!   streams, minting host tokens).
//! - **Stream tokens** carry `{streamUUID, UUID, host}` and are signed by the
//!   per-stream key. They have no expiry: their validity ends when the stream
//!   finishes, because the signing key is destroyed with the stream runtime.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::keys::RsaKeyPair;

/// Token type reported alongside issued access tokens
pub const TOKEN_TYPE_BEARER: &str = "bearer";

/// Claims of a stream access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamClaims {
    #[serde(rename = "streamUUID")]
    pub stream_uuid: String,
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(default)]
    pub host: bool,
}

/// Claims of a server access token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Sign a stream access token with the stream's private key
pub fn sign_stream_token(
    keys: &RsaKeyPair,
    stream_uuid: &str,
    participant_uuid: &str,
    host: bool,
) -> Result<String> {
    let claims = StreamClaims {
        stream_uuid: stream_uuid.to_owned(),
        uuid: participant_uuid.to_owned(),
        host,
    };

    encode(&Header::new(Algorithm::RS256), &claims, keys.encoding_key())
        .map_err(|err| CoreError::TokenSigning(err.to_string()))
}

/// Verify a stream access token against the stream's public key
pub fn verify_stream_token(key: &DecodingKey, token: &str) -> Result<StreamClaims> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;

    decode::<StreamClaims>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|err| CoreError::TokenInvalid(err.to_string()))
}

/// Sign a server access token with the operator's private key
pub fn sign_server_token(key: &EncodingKey, claims: &ServerClaims) -> Result<String> {
    encode(&Header::new(Algorithm::RS256), claims, key)
        .map_err(|err| CoreError::TokenSigning(err.to_string()))
}

/// Verify a server access token against the operator's public key
///
/// Temporal claims are only enforced when present in the token.
pub fn verify_server_token(key: &DecodingKey, token: &str) -> Result<ServerClaims> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.required_spec_claims.clear();
    validation.validate_nbf = true;
    validation.validate_aud = false;

    decode::<ServerClaims>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|err| CoreError::TokenInvalid(err.to_string()))
}

/// Check that an encoding/decoding key pair actually belongs together
///
/// Signs a probe token and verifies it; a failure means the operator supplied
/// mismatched public and private key files.
pub fn verify_key_pair(encoding: &EncodingKey, decoding: &DecodingKey) -> Result<()> {
    let probe = ServerClaims {
        sub: "key-pair-probe".into(),
        ..ServerClaims::default()
    };
    let token = sign_server_token(encoding, &probe)?;
    verify_server_token(decoding, &token).map_err(|_| CoreError::KeyMismatch)?;
    Ok(())
}
