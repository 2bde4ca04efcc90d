//! WebSocket client implementation.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::ClientConfig;
use crate::discovery::{service_name, Discovery, ResolvedRoom};
use crate::error::ClientError;
use crate::protocol::{decode, encode, AnswerPayload, WireMessage, WS_PATH};

use super::state::{ClientEvent, ClientSession, QuestionView};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Where and as whom to join.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectParams {
    host: String,
    port: u16,
    room_code: String,
    name: String,
    password: Option<String>,
}

impl ConnectParams {
    fn same_room(&self, other: &ConnectParams) -> bool {
        self.host == other.host && self.port == other.port && self.room_code.eq_ignore_ascii_case(&other.room_code)
    }
}

/// How one connection attempt ended.
enum SessionEnd {
    /// The server refused us. Never retried.
    Denied(String),
    Lost { joined: bool, error: ClientError },
}

#[derive(Default)]
struct ClientState {
    session: ClientSession,
    params: Option<ConnectParams>,
    /// Outbound queue of the live, joined connection.
    link: Option<mpsc::UnboundedSender<WireMessage>>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

struct Inner {
    config: ClientConfig,
    events: mpsc::UnboundedSender<ClientEvent>,
    state: Mutex<ClientState>,
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Client event dropped, no listener");
        }
    }
}

/// A player's connection to a quiz room.
///
/// Keeps reconnecting in the background after a drop, presenting the id the
/// server issued so the seat and score are kept.
#[derive(Clone)]
pub struct QuizClient {
    inner: Arc<Inner>,
}

impl QuizClient {
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let client = Self {
            inner: Arc::new(Inner {
                config,
                events,
                state: Mutex::new(ClientState::default()),
            }),
        };
        (client, rx)
    }

    /// Join a room. A no-op when already joined with the same parameters.
    pub async fn connect(&self, host: &str, port: u16, room_code: &str, name: &str, password: Option<&str>) {
        let params = ConnectParams {
            host: host.to_string(),
            port,
            room_code: room_code.to_string(),
            name: name.to_string(),
            password: password.map(String::from),
        };

        let mut state = self.inner.state.lock().await;
        if state.closed {
            tracing::warn!("Client is closed, ignoring connect");
            return;
        }
        if state.params.as_ref() == Some(&params) && state.link.is_some() {
            return;
        }

        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.link = None;
        if !state.params.as_ref().is_some_and(|p| p.same_room(&params)) {
            state.session = ClientSession::new();
        }
        state.params = Some(params.clone());
        state.task = Some(tokio::spawn(connect_loop(Arc::clone(&self.inner), params)));
    }

    /// Submit an answer. Dropped silently without a live connection.
    pub async fn send_answer(&self, question_index: usize, payload: AnswerPayload) {
        let mut state = self.inner.state.lock().await;
        let Some(link) = state.link.clone() else {
            tracing::debug!("Not connected, dropping answer for question {}", question_index);
            return;
        };
        state.session.record_answer(question_index, payload);
        let _ = link.send(WireMessage::AnswerSubmit { question_index, payload });
    }

    pub async fn clear_answer(&self, question_index: usize) {
        let mut state = self.inner.state.lock().await;
        let Some(link) = state.link.clone() else {
            tracing::debug!("Not connected, dropping clear for question {}", question_index);
            return;
        };
        state.session.clear_answer(question_index);
        let _ = link.send(WireMessage::AnswerClear { question_index });
    }

    /// Disconnect for good. Later `connect` calls are ignored.
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        state.closed = true;
        state.link = None;
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }

    pub async fn player_id(&self) -> Option<String> {
        self.inner.state.lock().await.session.player_id().map(String::from)
    }

    pub async fn current_question(&self) -> Option<QuestionView> {
        self.inner.state.lock().await.session.question().cloned()
    }

    pub async fn my_answer(&self) -> Option<AnswerPayload> {
        self.inner.state.lock().await.session.my_answer().cloned()
    }

    /// Joined and the connection is up.
    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.link.is_some()
    }
}

/// Look a room up by its code.
pub async fn resolve_room(discovery: &dyn Discovery, room_code: &str) -> Result<ResolvedRoom, ClientError> {
    let wanted = service_name(room_code);
    let mut rooms = discovery.search(&wanted);
    while let Some(found) = rooms.next().await {
        match found {
            Ok(room) if room.name.to_uppercase().starts_with(&wanted) => {
                return Ok(room);
            }
            Ok(_) => {}
            Err(e) => return Err(ClientError::ConnectionError(e.to_string())),
        }
    }
    Err(ClientError::ConnectionError(format!("Room {} not found", room_code)))
}

async fn connect_loop(inner: Arc<Inner>, params: ConnectParams) {
    let mut attempt: u32 = 0;
    let mut reported = false;
    let mut joined_once = false;

    loop {
        match run_session(&inner, &params).await {
            SessionEnd::Denied(reason) => {
                tracing::warn!("Join denied: {}", reason);
                inner.emit(ClientEvent::Error {
                    message: ClientError::JoinDenied(reason).to_string(),
                });
                return;
            }
            SessionEnd::Lost { joined, error } => {
                tracing::info!("{}", error);
                if joined {
                    joined_once = true;
                    attempt = 0;
                    reported = false;
                }
                if !reported {
                    reported = true;
                    let event = if joined_once {
                        ClientEvent::Reconnecting
                    } else {
                        ClientEvent::Error {
                            message: error.to_string(),
                        }
                    };
                    inner.emit(event);
                }
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = inner.config.backoff(attempt);
        tracing::debug!("Reconnecting in {:?} (attempt {})", delay, attempt);
        tokio::time::sleep(delay).await;
    }
}

async fn run_session(inner: &Arc<Inner>, params: &ConnectParams) -> SessionEnd {
    let url = format!("ws://{}:{}{}", params.host, params.port, WS_PATH);
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            return SessionEnd::Lost {
                joined: false,
                error: ClientError::ConnectionError(e.to_string()),
            };
        }
    };
    tracing::info!("Connected to {}", url);

    let (sink, mut receiver) = ws_stream.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = writer_loop(rx, sink, inner.config.ping_interval);

    let prior_player_id = inner.state.lock().await.session.player_id().map(String::from);
    let _ = tx.send(WireMessage::JoinRequest {
        room_code: params.room_code.clone(),
        name: params.name.clone(),
        password: params.password.clone(),
        prior_player_id,
    });

    let mut joined = false;
    let end = loop {
        let frame = match tokio::time::timeout(inner.config.idle_timeout, receiver.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => break ClientError::ConnectionError(e.to_string()),
            Ok(None) => break ClientError::ConnectionError("Connection closed".to_string()),
            Err(_) => break ClientError::ConnectionError("Server stopped responding".to_string()),
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(frame) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                break ClientError::ConnectionError(format!("Closed by server: {}", reason));
            }
            _ => continue,
        };

        let msg = match decode(text.as_str()) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("Unreadable frame from server: {}", e);
                continue;
            }
        };

        if let WireMessage::JoinDenied { reason } = msg {
            drop(tx);
            writer.abort();
            return SessionEnd::Denied(reason);
        }

        let mut state = inner.state.lock().await;
        if matches!(msg, WireMessage::JoinAccepted { .. }) {
            joined = true;
            state.link = Some(tx.clone());
        }
        if let Some(event) = state.session.apply(msg) {
            inner.emit(event);
        }
    };

    {
        let mut state = inner.state.lock().await;
        if state.link.as_ref().is_some_and(|link| link.same_channel(&tx)) {
            state.link = None;
        }
    }
    drop(tx);
    writer.abort();

    SessionEnd::Lost { joined, error: end }
}

/// Writes queued messages and keeps the connection alive with pings.
fn writer_loop(mut rx: mpsc::UnboundedReceiver<WireMessage>, mut sink: WsSink, ping_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        if sink.send(Message::Text(encode(&msg).into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        break;
                    }
                },
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}
