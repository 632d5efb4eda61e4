//! Server configuration
//!
//! CLI flags (with environment overrides) are resolved once at startup into
//! an immutable `ServerConfig` that is passed by value into the components.
//! Contradictory options — one half of a TLS pair, security without keys,
//! mismatched key files — are fatal.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use jsonwebtoken::{DecodingKey, EncodingKey};
use thiserror::Error;

use codecord_core::token::verify_key_pair;

use crate::api::models::ServerInfo;

const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_ADDRESS: &str = "127.0.0.1:7070";
const DEFAULT_DATA_FOLDER: &str = ".__data";
const DEFAULT_CONTAINER_PREFIX: &str = "code-cord.stream";
const DEFAULT_STREAM_IMAGE: &str = "code-cord.stream";

const SERVER_NAME: &str = "code-cord server";
const SERVER_DESCRIPTION: &str = "control plane for collaborative code-cord streams";

/// manage code-cord stream server
#[derive(Parser, Debug)]
#[command(name = "code-cord-server", version)]
pub struct Cli {
    /// Server listen and serve address
    #[arg(long, short = 'a', alias = "addr")]
    pub address: Option<String>,

    /// TLS cert file path (for https connections)
    #[arg(long = "tls-cert", alias = "cert", env = "CODE_CORD_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// TLS key file path (for https connections)
    #[arg(long = "tls-key", alias = "key", env = "CODE_CORD_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Log level ("error", "warn", "info", "debug" or "trace")
    #[arg(long = "log", alias = "level", default_value = "info")]
    pub log_level: String,

    /// Stream container prefix for streams running inside docker containers
    #[arg(long = "stream-container-prefix", alias = "container-prefix", default_value = DEFAULT_CONTAINER_PREFIX)]
    pub stream_container_prefix: String,

    /// Stream image to run inside the container
    #[arg(long = "stream-image", alias = "stream-img", default_value = DEFAULT_STREAM_IMAGE)]
    pub stream_image: String,

    /// Registry auth config used when pulling the stream image
    #[arg(long = "stream-image-registry-auth")]
    pub stream_image_registry_auth: Option<String>,

    /// Pull the stream image when the server starts
    #[arg(long = "pull-image-on-startup")]
    pub pull_image_on_startup: bool,

    /// Data folder to store server data
    #[arg(long = "data-folder", alias = "data", env = "CODE_CORD_DATA_FOLDER")]
    pub data_folder: Option<PathBuf>,

    /// Maximum acceptable size of the incoming avatar image (in bytes)
    #[arg(long = "avatar-size")]
    pub avatar_size: Option<u64>,

    /// Folder path to code-cord binaries
    #[arg(long = "bin-path", alias = "bin", env = "CODE_CORD_BIN_PATH")]
    pub bin_path: Option<PathBuf>,

    /// Verify operator tokens on the server-level endpoints
    #[arg(long = "with-security-check")]
    pub with_security_check: bool,

    /// Operator RSA public key file (PEM)
    #[arg(long = "server-public-key", env = "CODE_CORD_SERVER_PUBLIC_KEY")]
    pub server_public_key: Option<PathBuf>,

    /// Operator RSA private key file (PEM)
    #[arg(long = "server-private-key", env = "CODE_CORD_SERVER_PRIVATE_KEY")]
    pub server_private_key: Option<PathBuf>,
}

/// Errors raised while resolving the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid serve address {0}: {1}")]
    InvalidAddress(String, String),

    #[error("could not find any free port: {0}")]
    NoFreePort(String),

    #[error("please provide both --tls-cert and --tls-key")]
    TlsPair,

    #[error("please provide --server-public-key or disable --with-security-check")]
    MissingSecurityKey,

    #[error("could not read {0} key file: {1}")]
    KeyRead(PathBuf, String),

    #[error("could not parse key data from {0}: {1}")]
    KeyParse(PathBuf, String),

    #[error("server public and private keys do not form a pair")]
    KeyMismatch,

    #[error("could not prepare data folder: {0}")]
    DataFolder(String),
}

/// TLS material for the public listener
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Fully resolved server configuration
pub struct ServerConfig {
    pub address: SocketAddr,
    pub admin_address: SocketAddr,
    pub tls: Option<TlsConfig>,
    pub log_level: String,
    pub container_prefix: String,
    pub stream_image: String,
    pub registry_auth: Option<String>,
    pub pull_image_on_startup: bool,
    pub data_folder: PathBuf,
    pub max_avatar_size: Option<u64>,
    pub bin_path: PathBuf,
    /// Operator public key; set only when security is enabled
    pub operator_public_key: Option<DecodingKey>,
    /// Operator private key for the admin token endpoint
    pub operator_private_key: Option<EncodingKey>,
    pub info: ServerInfo,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("address", &self.address)
            .field("admin_address", &self.admin_address)
            .field("tls", &self.tls)
            .field("log_level", &self.log_level)
            .field("container_prefix", &self.container_prefix)
            .field("stream_image", &self.stream_image)
            .field("registry_auth", &self.registry_auth)
            .field("pull_image_on_startup", &self.pull_image_on_startup)
            .field("data_folder", &self.data_folder)
            .field("max_avatar_size", &self.max_avatar_size)
            .field("bin_path", &self.bin_path)
            .field(
                "operator_public_key",
                &self.operator_public_key.is_some(),
            )
            .field(
                "operator_private_key",
                &self.operator_private_key.is_some(),
            )
            .field("info", &self.info)
            .finish()
    }
}

impl ServerConfig {
    /// Resolve and cross-check the CLI flags
    pub fn resolve(cli: Cli) -> Result<Self, ConfigError> {
        let address = resolve_address(cli.address)?;
        let admin_address = DEFAULT_ADMIN_ADDRESS
            .parse()
            .expect("default admin address is valid");

        let tls = match (cli.tls_cert, cli.tls_key) {
            (Some(cert), Some(key)) => Some(TlsConfig { cert, key }),
            (None, None) => None,
            _ => return Err(ConfigError::TlsPair),
        };

        let data_folder = match cli.data_folder {
            Some(folder) => folder,
            None => std::env::current_dir()
                .map_err(|err| ConfigError::DataFolder(err.to_string()))?
                .join(DEFAULT_DATA_FOLDER),
        };

        let bin_path = cli.bin_path.unwrap_or_else(|| PathBuf::from("."));

        let operator_public_key = if cli.with_security_check {
            let path = cli
                .server_public_key
                .ok_or(ConfigError::MissingSecurityKey)?;
            let pem = std::fs::read(&path)
                .map_err(|err| ConfigError::KeyRead(path.clone(), err.to_string()))?;
            Some(
                DecodingKey::from_rsa_pem(&pem)
                    .map_err(|err| ConfigError::KeyParse(path, err.to_string()))?,
            )
        } else {
            None
        };

        let operator_private_key = match cli.server_private_key {
            Some(path) => {
                let pem = std::fs::read(&path)
                    .map_err(|err| ConfigError::KeyRead(path.clone(), err.to_string()))?;
                Some(
                    EncodingKey::from_rsa_pem(&pem)
                        .map_err(|err| ConfigError::KeyParse(path, err.to_string()))?,
                )
            }
            None => None,
        };

        if let (Some(private), Some(public)) = (&operator_private_key, &operator_public_key) {
            verify_key_pair(private, public).map_err(|_| ConfigError::KeyMismatch)?;
        }

        Ok(Self {
            address,
            admin_address,
            tls,
            log_level: cli.log_level,
            container_prefix: cli.stream_container_prefix,
            stream_image: cli.stream_image,
            registry_auth: cli.stream_image_registry_auth,
            pull_image_on_startup: cli.pull_image_on_startup,
            data_folder,
            max_avatar_size: cli.avatar_size,
            bin_path,
            operator_public_key,
            operator_private_key,
            info: ServerInfo {
                name: SERVER_NAME.to_owned(),
                description: SERVER_DESCRIPTION.to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                meta: None,
            },
        })
    }
}

/// Resolve the serve address, defaulting to a free port on loopback
fn resolve_address(address: Option<String>) -> Result<SocketAddr, ConfigError> {
    match address {
        Some(raw) => raw
            .parse()
            .map_err(|err: std::net::AddrParseError| ConfigError::InvalidAddress(raw, err.to_string())),
        None => {
            let listener = std::net::TcpListener::bind((DEFAULT_SERVER_HOST, 0))
                .map_err(|err| ConfigError::NoFreePort(err.to_string()))?;
            listener
                .local_addr()
                .map_err(|err| ConfigError::NoFreePort(err.to_string()))
        }
    }
}
