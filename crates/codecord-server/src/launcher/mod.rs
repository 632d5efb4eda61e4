//! Stream worker launchers
//!
//! A worker is the external process implementing a stream's business logic.
//! The control plane only knows how to start it on an address, stop it, and
//! learn about unexpected exits through the interrupt channel. Two launch
//! variants exist: a standalone local process and a docker container.

pub mod container;
pub mod standalone;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use codecord_core::LaunchMode;

pub use container::ContainerWorker;
pub use standalone::StandaloneWorker;

/// Errors raised while launching or stopping workers
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid launch configuration: {0}")]
    InvalidConfig(String),

    #[error("port {0} is unavailable: {1}")]
    PortUnavailable(u16, String),

    #[error("could not find free port on {0}: {1}")]
    NoFreePort(String, String),

    #[error("could not spawn worker binary {0}: {1}")]
    Spawn(String, String),

    #[error("container runtime failed: {0}")]
    Container(String),
}

/// Address a worker is listening on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAddress {
    pub ip: String,
    pub port: u16,
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Report delivered on the interrupt channel when a worker exits on its own
#[derive(Debug)]
pub struct WorkerExit {
    pub reason: String,
}

/// Contract shared by all launch variants
///
/// `start` produces the address the worker listens on; readiness is proven by
/// the caller through the RPC dial retry, not here. `stop` is best-effort and
/// idempotent. The interrupt channel delivers a single value when — and only
/// when — the worker exits without the control plane stopping it.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn start(&mut self) -> Result<WorkerAddress, LaunchError>;

    async fn stop(&mut self) -> Result<(), LaunchError>;

    /// Take the interrupt channel; yields `None` after the first call
    fn take_interrupts(&mut self) -> Option<oneshot::Receiver<WorkerExit>>;
}

/// Launch parameters chosen by the stream creator
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    pub mode: LaunchMode,
    pub preferred_ip: Option<String>,
    pub preferred_port: Option<u16>,
}

/// Builds a worker for a launch spec; swapped out in tests
pub trait WorkerFactory: Send + Sync {
    fn build(&self, stream_uuid: &str, launch: &LaunchSpec) -> Result<Box<dyn Worker>, LaunchError>;
}

/// Production factory choosing between the two launch variants
pub struct DefaultWorkerFactory {
    pub bin_path: PathBuf,
    pub container_prefix: String,
    pub stream_image: String,
}

impl WorkerFactory for DefaultWorkerFactory {
    fn build(
        &self,
        stream_uuid: &str,
        launch: &LaunchSpec,
    ) -> Result<Box<dyn Worker>, LaunchError> {
        match launch.mode {
            LaunchMode::StandaloneApp => Ok(Box::new(StandaloneWorker::new(
                self.bin_path.clone(),
                launch.preferred_ip.clone(),
                launch.preferred_port,
            ))),
            LaunchMode::DockerContainer => Ok(Box::new(ContainerWorker::new(
                stream_uuid,
                &self.container_prefix,
                &self.stream_image,
                launch.preferred_ip.clone(),
                launch.preferred_port,
            ))),
        }
    }
}

/// Acquire a free TCP port on `host` by transient listen-and-close
pub(crate) fn free_port(host: &str) -> Result<u16, LaunchError> {
    let listener = std::net::TcpListener::bind((host, 0))
        .map_err(|err| LaunchError::NoFreePort(host.to_owned(), err.to_string()))?;
    let port = listener
        .local_addr()
        .map_err(|err| LaunchError::NoFreePort(host.to_owned(), err.to_string()))?
        .port();
    Ok(port)
}

/// Verify that a caller-fixed port can actually be bound on `host`
pub(crate) fn claim_port(host: &str, port: u16) -> Result<(), LaunchError> {
    std::net::TcpListener::bind((host, port))
        .map(|_| ())
        .map_err(|err| LaunchError::PortUnavailable(port, err.to_string()))
}
