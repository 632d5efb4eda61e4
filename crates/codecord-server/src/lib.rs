//! code-cord stream control plane
//!
//! Launches, supervises and mediates access to short-lived collaborative
//! "stream" workers. Each stream is an isolated worker — a spawned local
//! executable or a docker container — speaking newline-delimited JSON-RPC
//! over TCP. The control plane exposes two HTTP surfaces and signs
//! per-stream RSA access tokens.
//!
//! ## Public endpoints
//!
//! - `GET /` / `GET /ping` — server info and liveness
//! - `POST /avatar`, `GET /avatar/{id}` — avatar blobs
//! - `GET /stream/{id}` — public stream info
//! - `POST /stream/{id}/join` — participant admission
//! - `POST /stream` — create a stream (operator token when security is on)
//! - `GET /stream/{id}/token` — re-mint a host token (operator token)
//! - `GET /stream/{id}/participants` — participant list (stream token)
//! - `GET /stream/{id}/service/{route}` — 308 redirect to the worker
//! - `PATCH /stream/{id}/participants/me` — self-update (stream token)
//! - `GET /stream/{id}/participants/{pid}/decision` — host decision
//! - `DELETE /stream/{id}`, `PATCH /stream/{id}` — finish / patch (host)
//!
//! ## Admin endpoints (separate loopback listener)
//!
//! - `GET /`, `GET /ping`, `POST /token`
//! - `GET /stream` — filtered, sorted, paginated list
//! - `DELETE /stream/{id}` — forced finish
//! - `GET /storage/{name}` — consistent bucket backup

pub mod admin;
pub mod admission;
pub mod api;
pub mod auth;
pub mod avatar;
pub mod config;
pub mod error;
pub mod launcher;
pub mod lifecycle;
pub mod registry;
pub mod rpc;
pub mod storage;

pub use admin::{create_admin_router, AdminState};
pub use api::{create_router, AppState};
pub use avatar::AvatarService;
pub use config::{Cli, ConfigError, ServerConfig};
pub use error::ServiceError;
pub use lifecycle::StreamService;
pub use registry::StreamRegistry;
