//! WebSocket session coordinator.
//!
//! Owns the room listener, one task per connection and the timers that drive
//! a game. All session state sits behind a single lock; tasks woken by a
//! socket or a timer take it, mutate, queue outbound frames and release it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::discovery::{service_name, Discovery};
use crate::error::ServerError;
use crate::models::Question;
use crate::protocol::{decode, encode, PlayerInfo, WireMessage, WS_PATH};

use super::events::HostEvent;
use super::game::GameSettings;
use super::registry::{CloseReason, ConnectionHandle, ConnectionId, Outbound};
use super::state::{JoinAttempt, SessionState, Step};

/// How long a closing connection gets to flush its queue.
const PUSHER_DRAIN: Duration = Duration::from_secs(1);

struct ListenerHandle {
    port: u16,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Room {
    session: Option<SessionState>,
    listener: Option<ListenerHandle>,
    /// Automatic mode: reveal, grace, next question.
    driver: Option<JoinHandle<()>>,
    /// Manual timed mode: reveal when the countdown runs out.
    timer: Option<JoinHandle<()>>,
    /// Reconnect windows of players who dropped mid-game.
    expiries: HashMap<String, JoinHandle<()>>,
}

impl Room {
    fn abort_game_tasks(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn abort_all_tasks(&mut self) {
        self.abort_game_tasks();
        for (_, expiry) in self.expiries.drain() {
            expiry.abort();
        }
    }
}

struct Shared {
    config: ServerConfig,
    discovery: Arc<dyn Discovery>,
    events: mpsc::UnboundedSender<HostEvent>,
    room: Mutex<Room>,
}

impl Shared {
    /// Run `f` under the session lock, then publish what it produced.
    async fn locked<R>(self: &Arc<Self>, f: impl FnOnce(&mut Room) -> R) -> R {
        let mut guard = self.room.lock().await;
        let room = &mut *guard;
        let result = f(room);
        self.flush(room);
        result
    }

    /// Emit pending host events and open reconnect windows.
    fn flush(self: &Arc<Self>, room: &mut Room) {
        let Some(session) = room.session.as_mut() else {
            return;
        };
        let (events, retained) = session.drain_effects();
        for event in events {
            self.emit(event);
        }

        let Some(window) = self.config.reconnect_window else {
            return;
        };
        for player_id in retained {
            let shared = Arc::clone(self);
            let id = player_id.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(window).await;
                shared
                    .locked(|room| {
                        room.expiries.remove(&id);
                        if let Some(session) = room.session.as_mut() {
                            session.expire_player(&id);
                        }
                    })
                    .await;
            });
            if let Some(previous) = room.expiries.insert(player_id, task) {
                previous.abort();
            }
        }
    }

    fn emit(&self, event: HostEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Host event dropped, no listener");
        }
    }

    /// Automatic mode: every question runs for the full duration, is revealed,
    /// and the next one follows after the grace interval.
    fn spawn_driver(self: &Arc<Self>, run_id: u64, settings: GameSettings) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let mut index = 0;
            loop {
                tokio::time::sleep(settings.duration).await;
                shared
                    .locked(|room| room.session.as_mut().map(|s| s.reveal(run_id, index)))
                    .await;

                tokio::time::sleep(shared.config.grace_interval).await;
                let step = shared
                    .locked(|room| room.session.as_mut().map(|s| s.next_question(run_id, Instant::now())))
                    .await;

                match step {
                    Some(Step::Question(next)) => index = next,
                    _ => break,
                }
            }
            tracing::debug!("Driver for game {} finished", run_id);
        })
    }

    /// Manual timed mode: reveal question `index` when its countdown ends.
    fn spawn_reveal_timer(self: &Arc<Self>, run_id: u64, index: usize, after: Duration) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            shared
                .locked(|room| {
                    room.timer = None;
                    room.session.as_mut().map(|s| s.reveal(run_id, index))
                })
                .await;
        })
    }
}

/// Hosts one quiz room at a time.
///
/// Cheap to clone; every clone drives the same room.
#[derive(Clone)]
pub struct QuizServer {
    shared: Arc<Shared>,
}

impl QuizServer {
    /// Create a coordinator. Host events arrive on the returned receiver.
    pub fn new(config: ServerConfig, discovery: Arc<dyn Discovery>) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let server = Self {
            shared: Arc::new(Shared {
                config,
                discovery,
                events,
                room: Mutex::new(Room::default()),
            }),
        };
        (server, rx)
    }

    /// Open the room on an ephemeral port and advertise it.
    pub async fn start(
        &self,
        room_code: &str,
        password: Option<String>,
        questions: Vec<Question>,
    ) -> Result<u16, ServerError> {
        let port = {
            let mut room = self.shared.room.lock().await;
            if room.listener.is_some() {
                return Err(ServerError::AlreadyRunning);
            }

            let (listener, port) = match bind(&self.shared.config).await {
                Ok(bound) => bound,
                Err(e) => {
                    self.shared.emit(HostEvent::Error { message: e.to_string() });
                    return Err(e);
                }
            };

            room.session = Some(SessionState::new(room_code, password, questions));
            let (shutdown, shutdown_rx) = oneshot::channel();
            let task = tokio::spawn(accept_loop(Arc::clone(&self.shared), listener, shutdown_rx));
            room.listener = Some(ListenerHandle { port, shutdown, task });
            port
        };
        tracing::info!("Room {} listening on port {}", room_code, port);

        match self.shared.discovery.advertise(&service_name(room_code), port).await {
            Ok(name) => {
                tracing::info!("Advertised as {}", name);
                self.shared.emit(HostEvent::RoomStarted { name, port });
                Ok(port)
            }
            Err(e) => {
                tracing::error!("Advertising failed: {}", e);
                self.shared.emit(HostEvent::Error { message: e.to_string() });
                self.stop(None).await;
                Err(e.into())
            }
        }
    }

    /// Close the room. Idempotent.
    pub async fn stop(&self, reason: Option<&str>) {
        let listener = {
            let mut room = self.shared.room.lock().await;
            let Some(listener) = room.listener.take() else {
                return;
            };
            room.abort_all_tasks();
            if let Some(session) = room.session.as_mut() {
                session.cancel(reason.unwrap_or("Host closed the room"));
                session.close_all("Room closed");
            }
            self.shared.flush(&mut *room);
            room.session = None;
            listener
        };

        self.shared.discovery.withdraw().await;
        let _ = listener.shutdown.send(());
        if let Err(e) = listener.task.await {
            tracing::warn!("Accept loop ended abnormally: {}", e);
        }
        tracing::info!("Room on port {} stopped", listener.port);
    }

    /// Start a game with the current roster. Returns `false` when refused.
    pub async fn start_game(&self, settings: GameSettings) -> bool {
        let shared = Arc::clone(&self.shared);
        self.shared
            .locked(move |room| {
                let Some(session) = room.session.as_mut() else {
                    return false;
                };
                let Some(run_id) = session.start_game(settings, Instant::now()) else {
                    return false;
                };

                room.abort_game_tasks();
                if !settings.is_manual() {
                    room.driver = Some(shared.spawn_driver(run_id, settings));
                } else if settings.is_timed() {
                    room.timer = Some(shared.spawn_reveal_timer(run_id, 0, settings.duration));
                }
                true
            })
            .await
    }

    /// Abort the running game. Returns `false` if none was running.
    pub async fn cancel_game(&self, reason: &str) -> bool {
        self.shared
            .locked(|room| {
                let cancelled = room.session.as_mut().is_some_and(|s| s.cancel(reason));
                if cancelled {
                    room.abort_game_tasks();
                }
                cancelled
            })
            .await
    }

    /// Manual mode: reveal the open question, or move past a revealed one.
    pub async fn advance(&self) -> Step {
        let shared = Arc::clone(&self.shared);
        self.shared
            .locked(move |room| {
                let Some(session) = room.session.as_mut() else {
                    return Step::Ignored;
                };
                let step = session.advance(Instant::now());
                let round = session.game().round().map(|r| (r.run_id, r.settings));

                match (&step, round) {
                    (Step::Revealed | Step::Finished, _) => {
                        if let Some(timer) = room.timer.take() {
                            timer.abort();
                        }
                    }
                    (Step::Question(index), Some((run_id, settings))) if settings.is_timed() => {
                        let timer = shared.spawn_reveal_timer(run_id, *index, settings.duration);
                        if let Some(previous) = room.timer.replace(timer) {
                            previous.abort();
                        }
                    }
                    _ => {}
                }
                step
            })
            .await
    }

    /// Current roster in join order.
    pub async fn players(&self) -> Vec<PlayerInfo> {
        let room = self.shared.room.lock().await;
        room.session.as_ref().map(SessionState::players).unwrap_or_default()
    }

    /// Port the room listens on, while running.
    pub async fn port(&self) -> Option<u16> {
        let room = self.shared.room.lock().await;
        room.listener.as_ref().map(|l| l.port)
    }

    pub async fn is_game_running(&self) -> bool {
        let room = self.shared.room.lock().await;
        room.session.as_ref().is_some_and(|s| s.game().is_running())
    }
}

async fn bind(config: &ServerConfig) -> Result<(TcpListener, u16), ServerError> {
    let listener = TcpListener::bind((config.bind_addr, 0)).await.map_err(ServerError::Bind)?;
    let port = listener.local_addr().map_err(ServerError::Bind)?.port();
    Ok((listener, port))
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener, mut shutdown: oneshot::Receiver<()>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    connections.spawn(handle_connection(Arc::clone(&shared), stream, addr));
                }
                Err(e) => tracing::warn!("Failed to accept connection: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(listener);

    // close frames are already queued; give them a moment to go out
    let drained = tokio::time::timeout(shared.config.shutdown_flush, async {
        while connections.join_next().await.is_some() {}
    })
    .await
    .is_ok();
    if !drained {
        tracing::debug!("Dropping {} connections that did not close in time", connections.len());
        connections.abort_all();
    }
}

/// Only the WebSocket path is served.
fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == WS_PATH {
        return Ok(response);
    }
    let mut error = ErrorResponse::new(Some("Not found".to_string()));
    *error.status_mut() = StatusCode::NOT_FOUND;
    Err(error)
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, addr: SocketAddr) {
    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let id = Uuid::new_v4();
    let (sink, mut receiver) = ws_stream.split();
    let (tx, rx) = mpsc::unbounded_channel();

    let registered = shared
        .locked(|room| match room.session.as_mut() {
            Some(session) => {
                session.register(id, ConnectionHandle::new(tx.clone()));
                true
            }
            None => false,
        })
        .await;
    if !registered {
        return;
    }
    tracing::info!("Connection {} from {}", id, addr);

    let mut pusher = pusher_loop(rx, sink, shared.config.ping_interval);

    loop {
        let frame = match tokio::time::timeout(shared.config.idle_timeout, receiver.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                tracing::debug!("Connection {} read error: {}", id, e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::info!("Connection {} idle, closing", id);
                break;
            }
        };

        match frame {
            Message::Text(text) => handle_frame(&shared, id, &tx, text.as_str()).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    shared
        .locked(|room| {
            if let Some(session) = room.session.as_mut() {
                session.disconnect(id);
            }
        })
        .await;
    tracing::info!("Connection {} closed", id);

    drop(tx);
    if tokio::time::timeout(PUSHER_DRAIN, &mut pusher).await.is_err() {
        pusher.abort();
    }
}

async fn handle_frame(shared: &Arc<Shared>, id: ConnectionId, tx: &mpsc::UnboundedSender<Outbound>, text: &str) {
    let msg = match decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!("Connection {} sent an unreadable frame: {}", id, e);
            let _ = tx.send(Outbound::Message(WireMessage::ProtocolError { message: e.to_string() }));
            return;
        }
    };

    match msg {
        WireMessage::JoinRequest {
            room_code,
            name,
            password,
            prior_player_id,
        } => {
            let attempt = JoinAttempt {
                room_code: &room_code,
                name: &name,
                password: password.as_deref(),
                prior_player_id: prior_player_id.as_deref(),
            };
            shared
                .locked(|room| {
                    if let Some(session) = room.session.as_mut() {
                        session.join(id, attempt, Instant::now());
                    }
                })
                .await;
        }
        WireMessage::AnswerSubmit { question_index, payload } => {
            shared
                .locked(|room| room.session.as_mut().map(|s| s.submit_answer(id, question_index, payload)))
                .await;
        }
        WireMessage::AnswerClear { question_index } => {
            shared
                .locked(|room| room.session.as_mut().map(|s| s.clear_answer(id, question_index)))
                .await;
        }
        other => tracing::debug!("Ignoring unexpected message from {}: {:?}", id, other),
    }
}

/// Writes queued frames to the socket and pings on a fixed interval.
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut sender: SplitSink<WebSocketStream<TcpStream>, Message>,
    ping_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.tick().await;

        loop {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Some(Outbound::Message(msg)) => {
                        if sender.send(Message::Text(encode(&msg).into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close(reason)) => {
                        let _ = sender.send(Message::Close(Some(close_frame(reason)))).await;
                        break;
                    }
                    None => {
                        let _ = sender.close().await;
                        break;
                    }
                },
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn close_frame(reason: CloseReason) -> CloseFrame {
    let (code, reason) = match reason {
        CloseReason::Normal(reason) => (CloseCode::Normal, reason),
        CloseReason::CannotAccept(reason) => (CloseCode::Unsupported, reason),
    };
    CloseFrame {
        code,
        reason: reason.into(),
    }
}
