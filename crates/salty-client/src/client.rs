//! Tokio WebSocket driver for [`Signaling`].
//!
//! [`Client::spawn`] runs the engine on its own task: it connects (with
//! timeout, retries and optional linear backoff), feeds frames into the
//! engine, writes its transmits back to the socket and forwards events to
//! the application over a channel.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rmpv::Value;
use salty_core::{TaskMessage, SUBPROTOCOL};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::SignalingError;
use crate::event::{SignalingEvent, Transmit};
use crate::signaling::Signaling;
use crate::state::SignalingState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the socket went away without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported for a close frame without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

const COMMAND_QUEUE: usize = 64;

/// How long to wait for the relay to answer our close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
enum ClientCommand {
    SendTask(TaskMessage),
    SendApplication(Value),
    Disconnect,
}

struct Transport {
    url: Url,
    connect_timeout: Duration,
    connect_attempts: u32,
    linear_backoff: bool,
}

/// Handle to a running signaling connection.
pub struct Client {
    commands: mpsc::Sender<ClientCommand>,
    events: mpsc::UnboundedReceiver<SignalingEvent>,
    driver: JoinHandle<Result<(), SignalingError>>,
}

impl Client {
    /// Start connecting. Must be called from within a tokio runtime.
    pub fn spawn(config: ClientConfig) -> Result<Self, SignalingError> {
        let ClientConfig {
            url,
            connect_timeout,
            connect_attempts,
            linear_backoff,
            signaling,
        } = config;

        let signaling = Signaling::new(signaling)?;
        let transport = Transport {
            url,
            connect_timeout,
            connect_attempts,
            linear_backoff,
        };

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(run(signaling, transport, command_rx, event_tx));

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            driver,
        })
    }

    /// Next event from the engine. `None` once the driver stopped.
    pub async fn next_event(&mut self) -> Option<SignalingEvent> {
        self.events.recv().await
    }

    pub async fn send_task_message(&self, message: TaskMessage) -> Result<(), SignalingError> {
        self.command(ClientCommand::SendTask(message)).await
    }

    pub async fn send_application_message(&self, data: Value) -> Result<(), SignalingError> {
        self.command(ClientCommand::SendApplication(data)).await
    }

    pub async fn disconnect(&self) -> Result<(), SignalingError> {
        self.command(ClientCommand::Disconnect).await
    }

    /// Disconnect if still connected and wait for the driver to finish.
    pub async fn join(self) -> Result<(), SignalingError> {
        let Client {
            commands,
            events,
            driver,
        } = self;
        drop(commands);
        drop(events);
        driver
            .await
            .map_err(|e| SignalingError::internal(format!("driver task failed: {}", e)))?
    }

    async fn command(&self, command: ClientCommand) -> Result<(), SignalingError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SignalingError::Transport("connection driver stopped".into()))
    }
}

async fn run(
    mut signaling: Signaling,
    transport: Transport,
    mut commands: mpsc::Receiver<ClientCommand>,
    events: mpsc::UnboundedSender<SignalingEvent>,
) -> Result<(), SignalingError> {
    let stream = connect(&mut signaling, &transport, &events).await?;
    signaling.on_open();
    forward_events(&mut signaling, &events);

    let mut ws = Some(stream);
    let mut commands_open = true;
    let mut close_deadline: Option<Instant> = None;

    loop {
        flush(&mut signaling, &mut ws).await;
        forward_events(&mut signaling, &events);

        if signaling.state() == SignalingState::Closing && close_deadline.is_none() {
            close_deadline = Some(Instant::now() + CLOSE_TIMEOUT);
        }

        if matches!(
            signaling.state(),
            SignalingState::Closed | SignalingState::Error
        ) {
            break;
        }
        if ws.is_none() && signaling.state() == SignalingState::Closing {
            // The relay is gone already, nobody will echo our close
            signaling.on_close(WsCloseCode::Normal.into());
            continue;
        }
        if ws.is_none() && !commands_open {
            info!("relay handed over and application detached, stopping driver");
            break;
        }

        tokio::select! {
            frame = next_frame(&mut ws) => match frame {
                Some(Ok(WsMessage::Binary(data))) => signaling.on_frame(&data),
                Some(Ok(WsMessage::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(NO_STATUS_RECEIVED);
                    if signaling.handover().both() {
                        ws = None;
                    }
                    signaling.on_close(code);
                }
                Some(Ok(WsMessage::Text(_))) => warn!("ignoring text frame from server"),
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    ws = None;
                    signaling.on_transport_error(&err.to_string());
                    signaling.on_close(ABNORMAL_CLOSURE);
                }
                None => {
                    ws = None;
                    if !signaling.handover().both() {
                        signaling.on_close(ABNORMAL_CLOSURE);
                    }
                }
            },
            command = commands.recv(), if commands_open => match command {
                Some(ClientCommand::SendTask(message)) => {
                    if let Err(err) = signaling.send_task_message(message) {
                        warn!("could not send task message: {}", err);
                    }
                }
                Some(ClientCommand::SendApplication(data)) => {
                    if let Err(err) = signaling.send_application_message(data) {
                        warn!("could not send application message: {}", err);
                    }
                }
                Some(ClientCommand::Disconnect) => signaling.disconnect(),
                None => {
                    debug!("command channel closed, disconnecting");
                    commands_open = false;
                    signaling.disconnect();
                }
            },
            _ = tokio::time::sleep_until(close_deadline.unwrap_or_else(Instant::now)),
                if close_deadline.is_some() => {
                warn!("relay did not answer our close within {:?}", CLOSE_TIMEOUT);
                ws = None;
                signaling.on_close(ABNORMAL_CLOSURE);
            }
        }
    }

    forward_events(&mut signaling, &events);
    info!("signaling driver stopped in state {}", signaling.state());
    Ok(())
}

async fn connect(
    signaling: &mut Signaling,
    transport: &Transport,
    events: &mpsc::UnboundedSender<SignalingEvent>,
) -> Result<WsStream, SignalingError> {
    let mut last_error = String::from("no connect attempt made");

    for attempt in 1..=transport.connect_attempts {
        signaling.on_connecting();
        forward_events(signaling, events);
        info!(
            "connecting to {} (attempt {}/{})",
            transport.url, attempt, transport.connect_attempts
        );

        match tokio::time::timeout(transport.connect_timeout, open_websocket(&transport.url)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(err)) => {
                warn!("connect attempt {} failed: {}", attempt, err);
                last_error = err.to_string();
            }
            Err(_) => {
                warn!(
                    "connect attempt {} timed out after {:?}",
                    attempt, transport.connect_timeout
                );
                last_error = "connect timed out".into();
            }
        }

        if transport.linear_backoff && attempt < transport.connect_attempts {
            tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
        }
    }

    signaling.on_transport_error(&last_error);
    forward_events(signaling, events);
    Err(SignalingError::Transport(last_error))
}

async fn open_websocket(url: &Url) -> Result<WsStream, SignalingError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| SignalingError::Transport(e.to_string()))?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

    let (stream, response) = connect_async(request)
        .await
        .map_err(|e| SignalingError::Transport(e.to_string()))?;

    let accepted = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok());
    if accepted != Some(SUBPROTOCOL) {
        return Err(SignalingError::Transport(format!(
            "server did not accept subprotocol {}",
            SUBPROTOCOL
        )));
    }
    Ok(stream)
}

async fn next_frame(
    ws: &mut Option<WsStream>,
) -> Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>> {
    match ws {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Write everything the engine queued to the socket.
async fn flush(signaling: &mut Signaling, ws: &mut Option<WsStream>) {
    while let Some(transmit) = signaling.poll_transmit() {
        let stream = match ws.as_mut() {
            Some(stream) => stream,
            None => {
                debug!("relay connection gone, dropping {:?}", transmit);
                continue;
            }
        };

        let result = match transmit {
            Transmit::Frame(frame) => stream.send(WsMessage::Binary(frame.into())).await,
            Transmit::Close(code) => {
                debug!("closing websocket with {}", code);
                stream
                    .close(Some(CloseFrame {
                        code: WsCloseCode::from(code.as_u16()),
                        reason: "".into(),
                    }))
                    .await
            }
        };

        if let Err(err) = result {
            *ws = None;
            signaling.on_transport_error(&err.to_string());
            signaling.on_close(ABNORMAL_CLOSURE);
        }
    }
}

fn forward_events(signaling: &mut Signaling, events: &mpsc::UnboundedSender<SignalingEvent>) {
    while let Some(event) = signaling.poll_event() {
        if events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}
