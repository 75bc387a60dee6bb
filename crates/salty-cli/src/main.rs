//! Salty CLI tools: key generation and interactive relayed-data sessions.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use rmpv::Value;
use salty_client::tasks::RelayedDataTask;
use salty_client::{Client, ClientBuilder, SignalingEvent, SignalingState};
use salty_crypto::{public_key_from_hex, AuthToken, CryptoProvider, KeyStore, NaclProvider};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "salty")]
#[command(about = "SaltyRTC signaling tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new permanent key pair
    Keygen {
        /// Output file path (without extension)
        #[arg(short, long, default_value = "salty")]
        output: PathBuf,
    },

    /// Generate a one-time auth token
    Token,

    /// Open a path as initiator and chat with the first responder
    Initiator {
        #[command(flatten)]
        session: SessionArgs,

        /// Responder permanent key (hex) to trust instead of using a token
        #[arg(long, env = "SALTY_TRUSTED_RESPONDER")]
        trusted_responder: Option<String>,
    },

    /// Join an initiator's path as responder
    Responder {
        #[command(flatten)]
        session: SessionArgs,

        /// Initiator permanent key (hex)
        #[arg(long, env = "SALTY_INITIATOR_KEY")]
        initiator_key: String,

        /// Auth token (hex). Omit when the initiator trusts our key.
        #[arg(long, env = "SALTY_TOKEN")]
        token: Option<String>,
    },

    /// Show version information
    Version,
}

#[derive(ClapArgs, Debug)]
struct SessionArgs {
    /// SaltyRTC server base URL (ws:// or wss://)
    #[arg(short, long, env = "SALTY_SERVER")]
    server: String,

    /// File holding our permanent secret key (hex), as written by `keygen`.
    /// A fresh key is generated when omitted.
    #[arg(short, long, env = "SALTY_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Pinned server permanent key (hex)
    #[arg(long, env = "SALTY_SERVER_KEY")]
    server_key: Option<String>,

    /// Seconds between server pings (0 disables)
    #[arg(long, default_value_t = 0)]
    ping_interval: u32,

    /// Timeout per connect attempt in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Number of connect attempts
    #[arg(long, default_value_t = 1)]
    connect_attempts: u32,

    /// Wait a little longer after every failed connect attempt
    #[arg(long)]
    linear_backoff: bool,
}

impl SessionArgs {
    fn builder(&self, key_store: KeyStore) -> Result<ClientBuilder> {
        let mut builder = ClientBuilder::new()
            .with_server_url(self.server.as_str())
            .with_key_store(key_store)
            .with_task(Box::new(RelayedDataTask::new()))
            .with_ping_interval(self.ping_interval)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_connect_attempts(self.connect_attempts, self.linear_backoff);

        if let Some(server_key) = &self.server_key {
            let key = public_key_from_hex(server_key).context("invalid server key")?;
            builder = builder.with_server_key(key);
        }
        Ok(builder)
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn provider() -> Arc<dyn CryptoProvider> {
    Arc::new(NaclProvider)
}

fn load_key_store(path: Option<&PathBuf>) -> Result<KeyStore> {
    match path {
        Some(path) => {
            let hex = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            KeyStore::from_secret_hex(provider(), hex.trim())
                .with_context(|| format!("invalid secret key in {}", path.display()))
        }
        None => {
            let key_store = KeyStore::generate(provider());
            info!("using a fresh permanent key {}", key_store.public_key_hex());
            Ok(key_store)
        }
    }
}

fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Keygen { output } => {
            let key_store = KeyStore::generate(provider());

            let private_path = output.with_extension("key");
            let public_path = output.with_extension("pub");
            std::fs::write(&private_path, key_store.secret_key_hex())
                .with_context(|| format!("writing {}", private_path.display()))?;
            std::fs::write(&public_path, key_store.public_key_hex())
                .with_context(|| format!("writing {}", public_path.display()))?;

            println!("Private key: {}", private_path.display());
            println!("Public key:  {}", public_path.display());
            println!("Key:         {}", key_store.public_key_hex());
        }
        Command::Token => {
            let token = AuthToken::generate(provider().as_ref())?;
            println!("{}", token.to_hex());
        }
        Command::Initiator {
            session,
            trusted_responder,
        } => {
            let key_store = load_key_store(session.key_file.as_ref())?;
            let public_key = key_store.public_key_hex();
            let builder = session.builder(key_store)?;

            let config = match trusted_responder {
                Some(hex) => {
                    let key = public_key_from_hex(&hex).context("invalid responder key")?;
                    builder.as_initiator_with_trusted_key(key)?
                }
                None => builder.as_initiator()?,
            };

            println!("Initiator key: {}", public_key);
            if let Some(token) = config.signaling.auth_token() {
                println!("Auth token:    {}", token.to_hex());
            }
            run_session(config)?;
        }
        Command::Responder {
            session,
            initiator_key,
            token,
        } => {
            let key_store = load_key_store(session.key_file.as_ref())?;
            let initiator_key =
                public_key_from_hex(&initiator_key).context("invalid initiator key")?;
            let builder = session.builder(key_store)?;

            let config = match token {
                Some(hex) => {
                    let token = AuthToken::from_hex(provider().as_ref(), &hex)
                        .context("invalid auth token")?;
                    builder.as_responder(initiator_key, token)?
                }
                None => builder.as_responder_with_trusted_key(initiator_key)?,
            };
            run_session(config)?;
        }
        Command::Version => {
            println!("salty {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn run_session(config: salty_client::ClientConfig) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(chat(config))
}

/// Lines from stdin go to the peer as relayed data; data from the peer is
/// printed to stdout.
async fn chat(config: salty_client::ClientConfig) -> Result<()> {
    let mut client = Client::spawn(config)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ready = false;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = client.next_event() => match event {
                Some(SignalingEvent::StateChanged(SignalingState::Task)) => {
                    ready = true;
                    println!("Peer connected, type to send");
                }
                Some(SignalingEvent::StateChanged(state)) => info!("state: {}", state),
                Some(SignalingEvent::TaskData(value)) => println!("< {}", render(&value)),
                Some(SignalingEvent::ApplicationMessage(value)) => {
                    println!("< [application] {}", render(&value))
                }
                Some(SignalingEvent::PeerClosed(reason)) => println!("Peer closed: {}", reason),
                Some(SignalingEvent::PeerDisconnected(id)) => {
                    println!("Peer 0x{:02x} disconnected", id)
                }
                Some(SignalingEvent::Closed(code)) => println!("Connection closed ({})", code),
                Some(SignalingEvent::Error(err)) => warn!("{}", err),
                Some(other) => info!("{:?}", other),
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if ready => {
                    let message = RelayedDataTask::data_message(Value::from(line));
                    if let Err(err) = client.send_task_message(message).await {
                        warn!("could not send: {}", err);
                    }
                }
                Some(_) => println!("No peer yet, message dropped"),
                None => {
                    stdin_open = false;
                    disconnect(&client).await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, disconnecting");
                disconnect(&client).await;
            }
        }
    }

    client
        .join()
        .await
        .map_err(|e| anyhow!("signaling failed: {}", e))
}

async fn disconnect(client: &Client) {
    if let Err(err) = client.disconnect().await {
        warn!("disconnect: {}", err);
    }
}

fn render(value: &Value) -> String {
    match value.as_str() {
        Some(text) => text.to_string(),
        None => value.to_string(),
    }
}
