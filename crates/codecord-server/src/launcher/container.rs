//! Stream worker running inside a docker container
//!
//! Containers are created with a deterministic name
//! `<prefix>-<stream-uuid>`, the chosen port bound to the host interface and
//! `/start -addr <ip:port>` as the command. The docker CLI is driven as a
//! subprocess; create-time warnings land in the log.

use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::warn;

use super::{claim_port, free_port, LaunchError, Worker, WorkerAddress, WorkerExit};

const DEFAULT_CONTAINER_HOST_IP: &str = "0.0.0.0";
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Stream worker backed by a docker container
pub struct ContainerWorker {
    stream_uuid: String,
    container_prefix: String,
    image: String,
    preferred_ip: Option<String>,
    preferred_port: Option<u16>,
    container_id: Option<String>,
    disarm: Option<oneshot::Sender<()>>,
    interrupts: Option<oneshot::Receiver<WorkerExit>>,
}

impl ContainerWorker {
    pub fn new(
        stream_uuid: &str,
        container_prefix: &str,
        image: &str,
        preferred_ip: Option<String>,
        preferred_port: Option<u16>,
    ) -> Self {
        Self {
            stream_uuid: stream_uuid.to_owned(),
            container_prefix: container_prefix.to_owned(),
            image: image.to_owned(),
            preferred_ip,
            preferred_port,
            container_id: None,
            disarm: None,
            interrupts: None,
        }
    }

    /// Pull the stream image, optionally against an authenticated registry
    ///
    /// `registry_auth` is a docker auth-config JSON document; it is handed to
    /// the CLI through `DOCKER_AUTH_CONFIG` so credentials never touch disk.
    pub async fn pull_image(image: &str, registry_auth: Option<&str>) -> Result<(), LaunchError> {
        let mut command = Command::new("docker");
        command.args(["pull", image]);
        if let Some(auth) = registry_auth {
            command.env("DOCKER_AUTH_CONFIG", auth);
        }

        let output = command
            .output()
            .await
            .map_err(|err| LaunchError::Container(err.to_string()))?;
        check_output("pull", &output)
    }
}

#[async_trait]
impl Worker for ContainerWorker {
    async fn start(&mut self) -> Result<WorkerAddress, LaunchError> {
        let ip = self
            .preferred_ip
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTAINER_HOST_IP.to_owned());
        let port = match self.preferred_port {
            Some(port) => {
                claim_port(&ip, port)?;
                port
            }
            None => free_port(&ip)?,
        };
        let address = WorkerAddress { ip, port };

        let container_name = format!("{}-{}", self.container_prefix, self.stream_uuid);
        let binding = format!("{}:{}:{}", address.ip, address.port, address.port);
        let addr_arg = address.to_string();

        let create = docker(&[
            "create",
            "--name",
            &container_name,
            "-p",
            &binding,
            &self.image,
            "/start",
            "-addr",
            &addr_arg,
        ])
        .await?;
        check_output("create", &create)?;

        // `docker create` prints warnings to stderr even on success
        for line in String::from_utf8_lossy(&create.stderr).lines() {
            if !line.trim().is_empty() {
                warn!(container = %container_name, "{}", line.trim());
            }
        }

        let container_id = String::from_utf8_lossy(&create.stdout).trim().to_owned();
        if container_id.is_empty() {
            return Err(LaunchError::Container(
                "docker create returned no container id".into(),
            ));
        }
        self.container_id = Some(container_id.clone());

        let start = docker(&["start", &container_id]).await?;
        check_output("start", &start)?;

        let (disarm_tx, disarm_rx) = oneshot::channel();
        let (interrupt_tx, interrupt_rx) = oneshot::channel();
        self.disarm = Some(disarm_tx);
        self.interrupts = Some(interrupt_rx);

        let wait_id = container_id.clone();
        tokio::spawn(async move {
            let wait = Command::new("docker").args(["wait", &wait_id]).output();
            tokio::select! {
                output = wait => {
                    let reason = match output {
                        Ok(output) => {
                            let code = String::from_utf8_lossy(&output.stdout).trim().to_owned();
                            format!("container exited with status {code}")
                        }
                        Err(err) => format!("could not await container: {err}"),
                    };
                    let _ = interrupt_tx.send(WorkerExit { reason });
                }
                _ = disarm_rx => {}
            }
        });

        tokio::time::sleep(SETTLE_DELAY).await;

        Ok(address)
    }

    async fn stop(&mut self) -> Result<(), LaunchError> {
        if let Some(disarm) = self.disarm.take() {
            let _ = disarm.send(());
        }

        let Some(container_id) = self.container_id.clone() else {
            return Ok(());
        };

        let output = docker(&["stop", &container_id]).await?;
        check_output("stop", &output)
    }

    fn take_interrupts(&mut self) -> Option<oneshot::Receiver<WorkerExit>> {
        self.interrupts.take()
    }
}

async fn docker(args: &[&str]) -> Result<Output, LaunchError> {
    Command::new("docker")
        .args(args)
        .output()
        .await
        .map_err(|err| LaunchError::Container(format!("could not run docker CLI: {err}")))
}

fn check_output(operation: &str, output: &Output) -> Result<(), LaunchError> {
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(LaunchError::Container(format!(
        "docker {operation} failed: {}",
        stderr.trim()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_without_container_is_noop() {
        let mut worker = ContainerWorker::new("s-1", "code-cord.stream", "img", None, None);
        worker.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_check_output_reports_stderr() {
        use std::os::unix::process::ExitStatusExt;

        let output = Output {
            status: std::process::ExitStatus::from_raw(256),
            stdout: Vec::new(),
            stderr: b"no such image\n".to_vec(),
        };
        let err = check_output("create", &output).unwrap_err();
        assert!(err.to_string().contains("no such image"));
    }
}
