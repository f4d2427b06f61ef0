//! WebSocket upgrade handlers for the lobby and game sockets

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{RoomEnvelope, RoomHandle, SeatClaims};
use crate::lobby::PresenceFrame;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{Identity, LobbyClientMsg, LobbyServerMsg, RoomClientMsg, RoomServerMsg};

/// A lobby socket that has not registered within this window is dropped
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

// ============================================================================
// Lobby socket
// ============================================================================

pub async fn lobby_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_lobby_socket(socket, state))
}

async fn handle_lobby_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let Some((identity, display_name)) = await_register(&mut ws_sink, &mut ws_stream).await else {
        let _ = ws_sink.send(Message::Close(None)).await;
        return;
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let writer_identity = identity.clone();
    let writer_handle = tokio::spawn(async move {
        run_lobby_writer(writer_identity, ws_sink, rx).await;
    });

    let conn_id = state.lobby.on_connect(&identity, &display_name, tx).await;
    info!(identity = %identity, conn_id, "Lobby socket registered");

    let rate_limiter = ConnectionRateLimiter::for_lobby();
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check() {
                    warn!(identity = %identity, "Rate limited lobby message");
                    continue;
                }
                match serde_json::from_str::<LobbyClientMsg>(&text) {
                    Ok(msg) => state.lobby.handle(&identity, msg).await,
                    Err(e) => {
                        debug!(identity = %identity, error = %e, "Malformed lobby message");
                        state.lobby.presence().send(
                            &identity,
                            LobbyServerMsg::Error {
                                code: "bad_message".into(),
                                message: "Could not parse message".into(),
                            },
                        );
                    }
                }
            }
            Ok(Message::Pong(_)) => state.lobby.presence().mark_alive(&identity),
            Ok(Message::Binary(_)) => {
                debug!(identity = %identity, "Ignoring binary lobby frame");
            }
            Ok(Message::Ping(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(identity = %identity, "Lobby client initiated close");
                break;
            }
            Err(e) => {
                debug!(identity = %identity, error = %e, "Lobby socket error");
                break;
            }
        }
    }

    state.lobby.on_disconnect(&identity, conn_id).await;
    writer_handle.abort();
    info!(identity = %identity, conn_id, "Lobby socket closed");
}

/// Wait for the `register` message. Anything else is answered with an
/// error and ends the socket.
async fn await_register(sink: &mut WsSink, stream: &mut WsStream) -> Option<(Identity, String)> {
    let first = tokio::time::timeout(REGISTER_TIMEOUT, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .ok()
    .flatten()?;

    let (identity, display_name) = match serde_json::from_str::<LobbyClientMsg>(&first) {
        Ok(LobbyClientMsg::Register {
            identity,
            display_name,
        }) => (Identity::new(identity), display_name),
        _ => {
            let _ = send_json(
                sink,
                &LobbyServerMsg::Error {
                    code: "not_registered".into(),
                    message: "First message must be register".into(),
                },
            )
            .await;
            return None;
        }
    };

    if identity.is_empty() {
        let _ = send_json(
            sink,
            &LobbyServerMsg::Error {
                code: "invalid_identity".into(),
                message: "Identity must not be empty".into(),
            },
        )
        .await;
        return None;
    }

    let display_name = display_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| identity.short());
    Some((identity, display_name))
}

async fn run_lobby_writer(
    identity: Identity,
    mut ws_sink: WsSink,
    mut rx: mpsc::UnboundedReceiver<PresenceFrame>,
) {
    while let Some(frame) = rx.recv().await {
        let sent = match frame {
            PresenceFrame::Message(msg) => send_json(&mut ws_sink, &msg).await,
            PresenceFrame::Ping => ws_sink
                .send(Message::Ping(Vec::new()))
                .await
                .map_err(|e| e.to_string()),
            PresenceFrame::Close => {
                debug!(identity = %identity, "Closing lobby socket");
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }
        };
        if let Err(e) = sent {
            debug!(identity = %identity, error = %e, "Lobby send failed");
            break;
        }
    }
}

// ============================================================================
// Game socket
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GameQuery {
    /// Seat reservation token from `game_ready`
    pub reservation: String,
}

/// Verify the reservation before upgrading, so a forged or stale token is
/// a plain HTTP error. The seat itself is redeemed once the socket is up.
pub async fn game_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<GameQuery>,
    State(state): State<AppState>,
) -> Response {
    let claims = match state.signer.verify(&query.reservation) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(error = %e, "Game socket refused");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let Some(room) = state.rooms.get(&claims.room_id) else {
        warn!(room_id = %claims.room_id, identity = %claims.identity, "Reservation for unknown room");
        return (StatusCode::NOT_FOUND, "Room not found").into_response();
    };

    info!(room_id = %room.id, identity = %claims.identity, "Game socket upgrade");
    ws.on_upgrade(move |socket| handle_game_socket(socket, state, room, claims))
}

/// Consume the seat named by the claims, answering a refusal with the
/// frame the client is sent before the socket closes
fn redeem(room: &RoomHandle, claims: &SeatClaims) -> Result<(), RoomServerMsg> {
    room.redeem_seat(claims).map_err(|e| {
        warn!(room_id = %room.id, identity = %claims.identity, error = %e, "Seat redemption failed");
        RoomServerMsg::Error {
            code: "join_rejected".into(),
            message: e.to_string(),
        }
    })
}

async fn handle_game_socket(socket: WebSocket, state: AppState, room: RoomHandle, claims: SeatClaims) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    if let Err(refusal) = redeem(&room, &claims) {
        let _ = send_json(&mut ws_sink, &refusal).await;
        let _ = ws_sink.send(Message::Close(None)).await;
        return;
    }

    let identity = claims.identity;
    let display_name = state
        .lobby
        .presence()
        .display_name(&identity)
        .unwrap_or_else(|| identity.short());
    state.lobby.presence().set_room(&identity, Some(room.id));

    // subscribe before joining so the `joined` reply is not missed
    let events = room.subscribe();
    if let Err(rejection) = room.join(identity.clone(), display_name).await {
        warn!(room_id = %room.id, identity = %identity, %rejection, "Join refused");
        let _ = send_json(
            &mut ws_sink,
            &RoomServerMsg::Error {
                code: "join_rejected".into(),
                message: rejection.to_string(),
            },
        )
        .await;
        let _ = ws_sink.send(Message::Close(None)).await;
        return;
    }

    let writer_identity = identity.clone();
    let room_id = room.id;
    let writer_handle = tokio::spawn(async move {
        run_game_writer(room_id, writer_identity, ws_sink, events).await;
    });

    let rate_limiter = ConnectionRateLimiter::for_room();
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check() {
                    debug!(room_id = %room.id, identity = %identity, "Rate limited room input");
                    continue;
                }
                match serde_json::from_str::<RoomClientMsg>(&text) {
                    Ok(msg) => {
                        if !room.send_input(identity.clone(), msg).await {
                            debug!(room_id = %room.id, identity = %identity, "Room gone");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(room_id = %room.id, identity = %identity, error = %e, "Failed to parse room message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(identity = %identity, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(room_id = %room.id, identity = %identity, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(room_id = %room.id, identity = %identity, error = %e, "WebSocket error");
                break;
            }
        }
    }

    room.leave(identity.clone()).await;
    writer_handle.abort();
    info!(room_id = %room.id, identity = %identity, "Game socket closed");
}

/// Forward room broadcasts addressed to `identity`. Stops after the
/// room's terminal message.
async fn run_game_writer(
    room_id: uuid::Uuid,
    identity: Identity,
    mut ws_sink: WsSink,
    mut events: broadcast::Receiver<RoomEnvelope>,
) {
    loop {
        match events.recv().await {
            Ok(envelope) => {
                if !envelope.is_for(&identity) {
                    continue;
                }
                let last = ends_room(&envelope.msg);
                if let Err(e) = send_json(&mut ws_sink, &envelope.msg).await {
                    debug!(room_id = %room_id, identity = %identity, error = %e, "WebSocket send failed");
                    break;
                }
                if last {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(room_id = %room_id, identity = %identity, lagged_count = n, "Client lagged, skipping messages");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(room_id = %room_id, identity = %identity, "Room channel closed");
                break;
            }
        }
    }
}

fn ends_room(msg: &RoomServerMsg) -> bool {
    matches!(
        msg,
        RoomServerMsg::MissionComplete { .. }
            | RoomServerMsg::MissionFailed { .. }
            | RoomServerMsg::Gameover { .. }
    )
}

/// Send a message over WebSocket
async fn send_json<T: Serialize>(sink: &mut WsSink, msg: &T) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tokio_test::assert_ok;

    #[test]
    fn terminal_messages_end_the_game_socket() {
        assert!(ends_room(&RoomServerMsg::Gameover {
            scores: BTreeMap::new(),
            tick: 4
        }));
        assert!(ends_room(&RoomServerMsg::MissionFailed {
            reason: "all_dead".into(),
            scores: BTreeMap::new(),
        }));
        assert!(!ends_room(&RoomServerMsg::Pong { t: 1 }));
        assert!(!ends_room(&RoomServerMsg::ExtractionOpen { timer_ms: 1_000 }));
    }

    #[test]
    fn seat_is_redeemed_once_after_upgrade() {
        use crate::game::room::Room;
        use crate::game::{ReservationSigner, RoomOptions};

        let a = Identity::new("a");
        let (_room, handle) =
            Room::new(uuid::Uuid::new_v4(), RoomOptions::for_squad(&[a.clone()], None)).unwrap();
        let signer = ReservationSigner::new("secret");
        let results = handle.reserve_seats(&signer, &[a], Duration::from_secs(60));
        let token = results[0].1.clone().unwrap().token;

        // verifying before the upgrade leaves the seat unspent
        let claims = signer.verify(&token).unwrap();
        assert_ok!(signer.verify(&token));
        assert_ok!(redeem(&handle, &claims));

        match redeem(&handle, &claims) {
            Err(RoomServerMsg::Error { code, message }) => {
                assert_eq!(code, "join_rejected");
                assert_eq!(message, "Reservation already used");
            }
            other => panic!("expected join_rejected, got {:?}", other),
        }
    }

    #[test]
    fn game_query_reads_reservation() {
        let query: GameQuery = serde_json::from_str(r#"{"reservation":"abc.def"}"#).unwrap();
        assert_eq!(query.reservation, "abc.def");
    }
}
