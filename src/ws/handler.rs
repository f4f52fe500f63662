//! Spectator WebSocket: one read-only stream per match

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::routes::AppError;
use crate::store::MatchStatus;
use crate::ws::protocol::ServerMsg;

/// WebSocket upgrade handler for `GET /matches/:id/live`
pub async fn spectate_handler(
    ws: WebSocketUpgrade,
    Path(match_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let record = state
        .store
        .get(match_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Match {} not found", match_id)))?;

    let status = record.status;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, match_id, status, state)))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, match_id: Uuid, status: MatchStatus, state: AppState) {
    info!(match_id = %match_id, "Spectator connected");

    let (mut ws_sink, ws_stream) = socket.split();

    if matches!(status, MatchStatus::Finished | MatchStatus::Rejected) {
        let msg = ServerMsg::Error {
            message: format!("Match is {}", status.as_str()),
        };
        let _ = send_msg(&mut ws_sink, &msg).await;
        let _ = ws_sink.send(Message::Close(None)).await;
        return;
    }

    // Subscribe before reading the live view so nothing falls in between
    let rx = state.hub.subscribe(match_id);

    // A scheduled match has no live view yet; its stream opens with match_started
    if let Some(update) = state.engine.live_update(match_id) {
        if let Err(e) = send_msg(&mut ws_sink, &update).await {
            error!(match_id = %match_id, error = %e, "Failed to send live view");
            drop(rx);
            state.hub.release(match_id);
            return;
        }
    }

    run_session(match_id, ws_sink, ws_stream, rx).await;
    state.hub.release(match_id);

    info!(match_id = %match_id, "Spectator disconnected");
}

/// Forward broadcasts until either side goes away
async fn run_session(
    match_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<ServerMsg>,
) {
    // Writer task: match broadcasts -> WebSocket
    let mut writer_handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(match_id = %match_id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        match_id = %match_id,
                        lagged_count = n,
                        "Spectator lagged, skipping {} messages", n
                    );
                    // Continue - the next match_update carries the full view
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(match_id = %match_id, "Match channel closed");
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Reader loop: spectators only send control frames
    loop {
        tokio::select! {
            _ = &mut writer_handle => return,
            frame = ws_stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {
                    debug!(match_id = %match_id, "Ignoring spectator message");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(match_id = %match_id, error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    writer_handle.abort();
    // The receiver lives in the writer task; wait for it to drop
    let _ = writer_handle.await;
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
