//! WebSocket upgrade handler and per-connection session

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{JoinAccepted, RoomError};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ParticipantId, RoomId, ServerMsg};

/// Capacity of each connection's outbound queue
const OUTBOUND_QUEUE_CAPACITY: usize = 256;
/// Longest display name kept
pub const MAX_DISPLAY_NAME_CHARS: usize = 24;

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let participant_id = Uuid::new_v4();
    let display_name = sanitize_display_name(query.name.as_deref(), participant_id);

    info!(participant_id = %participant_id, display_name = %display_name, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, participant_id, display_name, state))
}

/// Trim, strip control characters and cap the length; fall back to a generated name
pub fn sanitize_display_name(raw: Option<&str>, participant_id: ParticipantId) -> String {
    let cleaned: String = raw
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_DISPLAY_NAME_CHARS)
        .collect();

    if cleaned.trim().is_empty() {
        format!("Player_{}", &participant_id.simple().to_string()[..8])
    } else {
        cleaned.trim().to_string()
    }
}

/// Map a room error onto the message sent back to the caller
pub fn room_error_msg(err: &RoomError) -> ServerMsg {
    match err {
        RoomError::RoomNotFound(room_id) => ServerMsg::RoomNotFound {
            room_id: room_id.clone(),
        },
        RoomError::RoomFull(_) => ServerMsg::error("room_full", err.to_string()),
        RoomError::NotInRoom => ServerMsg::error("not_in_room", err.to_string()),
        RoomError::NotHost => ServerMsg::error("not_host", err.to_string()),
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    participant_id: ParticipantId,
    display_name: String,
    state: AppState,
) {
    info!(participant_id = %participant_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let writer_handle = tokio::spawn(write_loop(participant_id, ws_sink, out_rx));

    let welcome = ServerMsg::Welcome {
        participant_id,
        server_time: unix_millis(),
    };

    if out_tx.send(welcome).await.is_ok() {
        let mut session = Session {
            participant_id,
            display_name,
            state,
            out_tx,
            room: None,
            forwarder: None,
        };
        session.run(ws_stream).await;

        // Cleanup on disconnect
        session.leave_room().await;
    } else {
        error!(participant_id = %participant_id, "Failed to queue welcome");
    }

    writer_handle.abort();
    info!(participant_id = %participant_id, "WebSocket connection closed");
}

/// Drain the connection's outbound queue into the socket
async fn write_loop(
    participant_id: ParticipantId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = out_rx.recv().await {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!(participant_id = %participant_id, error = %e, "Failed to encode message");
                continue;
            }
        };

        if let Err(e) = ws_sink.send(Message::Text(json)).await {
            debug!(participant_id = %participant_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Relay one room's event stream into a connection's outbound queue
async fn forward_room_events(
    participant_id: ParticipantId,
    room_id: RoomId,
    mut events: broadcast::Receiver<ServerMsg>,
    out_tx: mpsc::Sender<ServerMsg>,
) {
    loop {
        match events.recv().await {
            Ok(msg) => {
                if out_tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                // Snapshots are full state, so skipping is safe
                warn!(
                    participant_id = %participant_id,
                    room_id = %room_id,
                    lagged_count = n,
                    "Client lagged, skipping {} room events", n
                );
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(participant_id = %participant_id, room_id = %room_id, "Room event stream closed");
                break;
            }
        }
    }
}

/// One participant's connection state
struct Session {
    participant_id: ParticipantId,
    display_name: String,
    state: AppState,
    out_tx: mpsc::Sender<ServerMsg>,
    room: Option<RoomId>,
    forwarder: Option<JoinHandle<()>>,
}

impl Session {
    /// Reader loop: WebSocket -> room manager
    async fn run(&mut self, mut ws_stream: SplitStream<WebSocket>) {
        let rate_limiter = ConnectionRateLimiter::new(self.state.config.input_rate_limit);

        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if !rate_limiter.check_input() {
                        warn!(participant_id = %self.participant_id, "Rate limited client message");
                        continue;
                    }

                    match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(msg) => {
                            if !self.dispatch(msg).await {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(participant_id = %self.participant_id, error = %e, "Failed to parse client message");
                            if !self
                                .send(ServerMsg::error("bad_message", e.to_string()))
                                .await
                            {
                                break;
                            }
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!(participant_id = %self.participant_id, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(participant_id = %self.participant_id, "Client initiated close");
                    break;
                }
                Err(e) => {
                    error!(participant_id = %self.participant_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    /// Handle one client message. Returns false once the connection is unusable.
    async fn dispatch(&mut self, msg: ClientMsg) -> bool {
        match msg {
            ClientMsg::CreateRoom => {
                let room_id = self.state.rooms.create_room();
                let connected = self
                    .send(ServerMsg::RoomCreated {
                        room_id: room_id.clone(),
                    })
                    .await
                    && self.join(room_id.clone()).await;

                if self.room.as_ref() != Some(&room_id) {
                    self.state.rooms.discard_if_empty(&room_id).await;
                }
                connected
            }
            ClientMsg::JoinRoom { room_id } => self.join(room_id).await,
            ClientMsg::StartGame { room_id } => {
                match self.state.rooms.start_room(&room_id, self.participant_id).await {
                    Ok(()) => true,
                    Err(e) => self.send(room_error_msg(&e)).await,
                }
            }
            ClientMsg::Input { flap } => {
                self.state.rooms.submit_input(self.participant_id, flap);
                true
            }
            ClientMsg::RestartGame => match self.state.rooms.restart_room(self.participant_id).await {
                Ok(()) => true,
                Err(e) => self.send(room_error_msg(&e)).await,
            },
            ClientMsg::LeaveRoom => {
                self.leave_room().await;
                true
            }
            ClientMsg::Ping { t } => self.send(ServerMsg::Pong { t }).await,
        }
    }

    async fn join(&mut self, room_id: RoomId) -> bool {
        let result = self
            .state
            .rooms
            .join_room(&room_id, self.participant_id, self.display_name.clone())
            .await;

        // The manager may have moved us out of the previous room either way
        if self.state.rooms.current_room(&self.participant_id) != self.room {
            self.stop_forwarding();
        }

        match result {
            Ok(JoinAccepted { snapshot, events }) => {
                self.stop_forwarding();
                if !self.send(ServerMsg::Init { state: snapshot }).await {
                    return false;
                }
                self.forwarder = Some(tokio::spawn(forward_room_events(
                    self.participant_id,
                    room_id.clone(),
                    events,
                    self.out_tx.clone(),
                )));
                self.room = Some(room_id);
                true
            }
            Err(e) => {
                debug!(participant_id = %self.participant_id, room_id = %room_id, error = %e, "Join refused");
                self.send(room_error_msg(&e)).await
            }
        }
    }

    async fn leave_room(&mut self) {
        self.stop_forwarding();
        if let Some(room_id) = self.state.rooms.leave(self.participant_id).await {
            debug!(participant_id = %self.participant_id, room_id = %room_id, "Left room");
        }
    }

    fn stop_forwarding(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.room = None;
    }

    async fn send(&self, msg: ServerMsg) -> bool {
        self.out_tx.send(msg).await.is_ok()
    }
}
