//! Headless participant: connects to a room server, joins or creates a room
//! and keeps its bird airborne using local prediction.

use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use flappy_room_server::client::Reconciler;
use flappy_room_server::util::time::unix_millis;
use flappy_room_server::ws::protocol::{ClientMsg, RoomId, ServerMsg};

/// Local prediction step
const FRAME: Duration = Duration::from_millis(16);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server base URL
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Room code to join; a new room is created when omitted
    #[arg(short = 'r', long)]
    room: Option<String>,

    /// Display name (letters, digits, '-' and '_' are kept)
    #[arg(short = 'n', long, default_value = "flap-bot")]
    name: String,

    /// Flap whenever the predicted bird sinks below this y
    #[arg(long, default_value = "330")]
    flap_below: f32,

    /// Send start_game once joined
    #[arg(long)]
    start: bool,

    /// Restart the room after game over (only works for the host)
    #[arg(long)]
    auto_restart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let room = match args.room.as_deref() {
        Some(raw) => Some(RoomId::parse(raw).context("invalid room code")?),
        None => None,
    };

    let name: String = args
        .name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    let url = format!("{}/ws?name={}", args.server.trim_end_matches('/'), name);

    let (ws, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {}", url))?;
    info!("Connected to {}", url);
    let (mut write, mut read) = ws.split();

    let mut reconciler: Option<Reconciler> = None;
    let mut frame = tokio::time::interval(FRAME);

    loop {
        let mut outgoing: Vec<ClientMsg> = Vec::new();

        tokio::select! {
            incoming = read.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Server closed the connection");
                        return Ok(());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                };

                let msg: ServerMsg = match serde_json::from_str(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "Unparseable server message");
                        continue;
                    }
                };

                match &msg {
                    ServerMsg::Welcome { participant_id, .. } => {
                        info!(participant_id = %participant_id, "Welcome");
                        reconciler = Some(Reconciler::new(*participant_id));
                        outgoing.push(match &room {
                            Some(room_id) => ClientMsg::JoinRoom { room_id: room_id.clone() },
                            None => ClientMsg::CreateRoom,
                        });
                    }
                    ServerMsg::RoomCreated { room_id } => info!(room_id = %room_id, "Room created"),
                    ServerMsg::RoomNotFound { room_id } => bail!("room {} not found", room_id),
                    ServerMsg::Init { state } => {
                        info!(room_id = %state.room_id, players = state.players.len(), "Joined room");
                        if args.start && !state.started {
                            outgoing.push(ClientMsg::StartGame { room_id: state.room_id.clone() });
                        }
                    }
                    ServerMsg::GameStarted { tick } => info!(tick, "Game started"),
                    ServerMsg::PlayerEliminated { participant_id, score } => {
                        info!(participant_id = %participant_id, score, "Player eliminated");
                    }
                    ServerMsg::GameOver { results } => {
                        for (rank, line) in results.iter().enumerate() {
                            info!(rank = rank + 1, name = %line.display_name, score = line.score, "Result");
                        }
                        let is_host = reconciler
                            .as_ref()
                            .and_then(|r| r.confirmed().map(|s| s.host_id == Some(r.participant_id())))
                            .unwrap_or(false);
                        if args.auto_restart && is_host {
                            outgoing.push(ClientMsg::RestartGame);
                        }
                    }
                    ServerMsg::Error { code, message } => warn!(code = %code, "Server error: {}", message),
                    _ => {}
                }

                if let Some(r) = reconciler.as_mut() {
                    r.apply(&msg);
                }
            }
            _ = frame.tick() => {
                if let Some(r) = reconciler.as_mut() {
                    r.predict(FRAME.as_secs_f32());
                    let sinking = r
                        .display()
                        .and_then(|s| s.player(r.participant_id()).map(|p| p.y > args.flap_below))
                        .unwrap_or(false);
                    if sinking && r.flap(unix_millis()) {
                        debug!("Flap");
                        outgoing.push(ClientMsg::Input { flap: true });
                    }
                }
            }
        }

        for msg in outgoing {
            let json = serde_json::to_string(&msg)?;
            write.send(Message::Text(json)).await?;
        }
    }
}
