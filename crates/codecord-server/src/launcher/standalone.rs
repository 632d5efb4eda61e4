//! Stream worker running as a standalone local process
//!
//! The worker binary is resolved from the configured binary folder and
//! spawned with `-addr <ip:port>`. After a short settle delay the worker is
//! treated as probably listening; the caller proves readiness through the
//! RPC dial retry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::oneshot;

use super::{claim_port, free_port, LaunchError, Worker, WorkerAddress, WorkerExit};

const DEFAULT_STANDALONE_IP: &str = "127.0.0.1";
const STREAM_BIN: &str = "stream";
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Stream worker backed by a spawned local executable
pub struct StandaloneWorker {
    bin_path: PathBuf,
    preferred_ip: Option<String>,
    preferred_port: Option<u16>,
    disarm: Option<oneshot::Sender<()>>,
    interrupts: Option<oneshot::Receiver<WorkerExit>>,
}

impl StandaloneWorker {
    pub fn new(bin_path: PathBuf, preferred_ip: Option<String>, preferred_port: Option<u16>) -> Self {
        Self {
            bin_path,
            preferred_ip,
            preferred_port,
            disarm: None,
            interrupts: None,
        }
    }
}

#[async_trait]
impl Worker for StandaloneWorker {
    async fn start(&mut self) -> Result<WorkerAddress, LaunchError> {
        let ip = self
            .preferred_ip
            .clone()
            .unwrap_or_else(|| DEFAULT_STANDALONE_IP.to_owned());
        let port = match self.preferred_port {
            Some(port) => {
                claim_port(&ip, port)?;
                port
            }
            None => free_port(&ip)?,
        };
        let address = WorkerAddress { ip, port };

        let bin = resolve_bin_path(&self.bin_path, STREAM_BIN);
        let mut child = Command::new(&bin)
            .arg("-addr")
            .arg(address.to_string())
            .spawn()
            .map_err(|err| LaunchError::Spawn(bin.display().to_string(), err.to_string()))?;

        let (disarm_tx, disarm_rx) = oneshot::channel();
        let (interrupt_tx, interrupt_rx) = oneshot::channel();
        self.disarm = Some(disarm_tx);
        self.interrupts = Some(interrupt_rx);

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let reason = match status {
                        Ok(status) => format!("worker process exited: {status}"),
                        Err(err) => format!("could not await worker process: {err}"),
                    };
                    let _ = interrupt_tx.send(WorkerExit { reason });
                }
                _ = disarm_rx => {
                    let _ = child.kill().await;
                }
            }
        });

        tokio::time::sleep(SETTLE_DELAY).await;

        Ok(address)
    }

    async fn stop(&mut self) -> Result<(), LaunchError> {
        if let Some(disarm) = self.disarm.take() {
            let _ = disarm.send(());
        }
        Ok(())
    }

    fn take_interrupts(&mut self) -> Option<oneshot::Receiver<WorkerExit>> {
        self.interrupts.take()
    }
}

/// Resolve the worker binary inside `folder`, adding `.exe` on Windows
fn resolve_bin_path(folder: &Path, name: &str) -> PathBuf {
    let mut name = name.to_owned();
    if cfg!(windows) {
        name.push_str(".exe");
    }
    folder.join(name)
}
