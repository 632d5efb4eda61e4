//! code-cord domain crate
//!
//! Shared model and token cryptography for the stream control plane:
//!
//! - Stream, participant and avatar entities with their persisted wire form
//! - Per-stream and operator RSA key material
//! - RS256 access tokens: server tokens (operator key, RFC 7519 claims) and
//!   stream tokens (per-stream key, `{streamUUID, UUID, host}` claims)
//!
//! The control plane itself — launchers, registry, storage, HTTP surfaces —
//! lives in `codecord-server`.

pub mod avatar;
pub mod error;
pub mod keys;
pub mod participant;
pub mod stream;
pub mod token;

pub use avatar::AvatarRecord;
pub use error::{CoreError, Result};
pub use keys::RsaKeyPair;
pub use participant::{Participant, ParticipantStatus};
pub use stream::{HostInfo, JoinConfig, JoinPolicy, LaunchMode, StreamRecord, StreamStatus};
pub use token::{ServerClaims, StreamClaims, TOKEN_TYPE_BEARER};
