//! JSON-RPC link to a running stream worker
//!
//! The worker speaks newline-delimited JSON-RPC 1.0 over TCP. Calls are
//! synchronous: one request line out, one response line back, serialized
//! behind a lock. A broken link does not by itself finish the stream — the
//! worker's interrupt channel does.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::warn;

use codecord_core::ParticipantStatus;

/// Default number of dial attempts against a freshly started worker
pub const DIAL_RETRY_COUNT: u32 = 3;
const DIAL_RETRY_BACKOFF: Duration = Duration::from_secs(2);

const METHOD_NEW_PARTICIPANT: &str = "Worker.NewParticipant";
const METHOD_CHANGE_PARTICIPANT_INFO: &str = "Worker.ChangeParticipantInfo";

/// Errors raised by the RPC link
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("connection timeout")]
    TransportTimeout,

    #[error("rpc link is closed")]
    TransportClosed,

    #[error("rpc transport failed: {0}")]
    Transport(String),

    #[error("worker call failed: {0}")]
    Remote(String),

    #[error("could not encode rpc payload: {0}")]
    Encode(String),
}

/// Participant payload as the worker expects it on the wire
#[derive(Debug, Clone, Serialize)]
pub struct WorkerParticipant {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "avatarId", skip_serializing_if = "String::is_empty")]
    pub avatar_id: String,
    pub status: ParticipantStatus,
    #[serde(rename = "isHost", skip_serializing_if = "std::ops::Not::not")]
    pub is_host: bool,
}

#[derive(Serialize)]
struct Request<'a, T> {
    method: &'a str,
    params: [&'a T; 1],
    id: u64,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug)]
struct LinkState {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

/// Synchronous JSON-RPC 1.0 client to one worker
#[derive(Debug)]
pub struct RpcLink {
    state: Mutex<Option<LinkState>>,
}

impl RpcLink {
    /// Dial the worker with retry
    ///
    /// Each failed attempt is logged and followed by a 2 second backoff;
    /// exhausting all attempts yields `TransportTimeout`.
    pub async fn dial(address: &str, attempts: u32) -> Result<Self, RpcError> {
        for _ in 0..attempts {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    let (read_half, write_half) = stream.into_split();
                    return Ok(Self {
                        state: Mutex::new(Some(LinkState {
                            reader: BufReader::new(read_half),
                            writer: write_half,
                            next_id: 0,
                        })),
                    });
                }
                Err(err) => {
                    warn!(address = %address, error = %err, "could not connect to the stream worker");
                    tokio::time::sleep(DIAL_RETRY_BACKOFF).await;
                }
            }
        }

        Err(RpcError::TransportTimeout)
    }

    /// Notify the worker about a newly admitted participant
    pub async fn new_participant(&self, participant: &WorkerParticipant) -> Result<(), RpcError> {
        self.call(METHOD_NEW_PARTICIPANT, participant).await
    }

    /// Notify the worker about changed participant info
    pub async fn change_participant_info(
        &self,
        participant: &WorkerParticipant,
    ) -> Result<(), RpcError> {
        self.call(METHOD_CHANGE_PARTICIPANT_INFO, participant).await
    }

    async fn call<T: Serialize>(&self, method: &str, params: &T) -> Result<(), RpcError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(RpcError::TransportClosed)?;

        state.next_id += 1;
        let request = Request {
            method,
            params: [params],
            id: state.next_id,
        };
        let mut payload =
            serde_json::to_vec(&request).map_err(|err| RpcError::Encode(err.to_string()))?;
        payload.push(b'\n');

        if let Err(err) = state.writer.write_all(&payload).await {
            *guard = None;
            return Err(RpcError::Transport(err.to_string()));
        }

        let mut line = String::new();
        match state.reader.read_line(&mut line).await {
            Ok(0) => {
                *guard = None;
                Err(RpcError::TransportClosed)
            }
            Ok(_) => {
                let response: Response = serde_json::from_str(&line)
                    .map_err(|err| RpcError::Transport(err.to_string()))?;
                match response.error {
                    None | Some(Value::Null) => Ok(()),
                    Some(err) => Err(RpcError::Remote(err.to_string())),
                }
            }
            Err(err) => {
                *guard = None;
                Err(RpcError::Transport(err.to_string()))
            }
        }
    }

    /// Close the link; subsequent calls fail with `TransportClosed`
    pub async fn close(&self) {
        *self.state.lock().await = None;
    }
}

#[cfg(test)]
impl RpcLink {
    /// A link that was never connected; every call fails with
    /// `TransportClosed`.
    pub(crate) fn closed_for_tests() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn_echo_worker() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut reader = BufReader::new(read_half);
                    let mut line = String::new();
                    while matches!(reader.read_line(&mut line).await, Ok(n) if n > 0) {
                        let request: Value = serde_json::from_str(&line).unwrap();
                        let response = serde_json::json!({
                            "id": request["id"],
                            "result": null,
                            "error": null,
                        });
                        let mut payload = serde_json::to_vec(&response).unwrap();
                        payload.push(b'\n');
                        if write_half.write_all(&payload).await.is_err() {
                            break;
                        }
                        line.clear();
                    }
                });
            }
        });

        address
    }

    fn test_participant() -> WorkerParticipant {
        WorkerParticipant {
            uuid: "p-1".into(),
            name: "bob".into(),
            avatar_id: String::new(),
            status: ParticipantStatus::Active,
            is_host: false,
        }
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let address = spawn_echo_worker().await;
        let link = RpcLink::dial(&address.to_string(), 1).await.unwrap();

        link.new_participant(&test_participant()).await.unwrap();
        link.change_participant_info(&test_participant())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_link_rejects_calls() {
        let address = spawn_echo_worker().await;
        let link = RpcLink::dial(&address.to_string(), 1).await.unwrap();

        link.close().await;
        let err = link.new_participant(&test_participant()).await.unwrap_err();
        assert!(matches!(err, RpcError::TransportClosed));
    }

    #[tokio::test]
    async fn test_dial_times_out() {
        // a bound-then-dropped listener leaves a port nothing listens on
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let err = RpcLink::dial(&address.to_string(), 1).await.unwrap_err();
        assert!(matches!(err, RpcError::TransportTimeout));
    }

    #[test]
    fn test_worker_participant_wire_shape() {
        let participant = test_participant();
        let encoded = serde_json::to_value(&participant).unwrap();
        assert_eq!(encoded["uuid"], "p-1");
        assert_eq!(encoded["status"], "active");
        // empty avatar and non-host flags stay off the wire
        assert!(encoded.get("avatarId").is_none());
        assert!(encoded.get("isHost").is_none());
    }
}
