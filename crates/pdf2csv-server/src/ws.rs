// WebSocket route
//
// Each connection registers with the hub and forwards its outbound channel
// to the socket. The only inbound frame we understand is a replay request,
// answered directly from the per-collection buffer.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum InboundFrame {
    #[serde(rename = "REPLAY_REQUEST", rename_all = "camelCase")]
    ReplayRequest { collection_id: String },
}

pub(crate) async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| client_session(state, socket))
}

async fn client_session(state: AppState, socket: WebSocket) {
    let (client_id, mut outbound) = state.hub.register();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    // Hub dropped us (backlog exceeded).
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&state, &mut sink, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unregister(client_id);
    debug!(client_id, "ws session closed");
}

async fn handle_inbound(
    state: &AppState,
    sink: &mut (impl SinkExt<Message> + Unpin),
    text: &str,
) {
    match serde_json::from_str::<InboundFrame>(text) {
        Ok(InboundFrame::ReplayRequest { collection_id }) => {
            let frames = state.hub.replay_for(&collection_id);
            debug!(
                collection_id = %collection_id,
                frames = frames.len(),
                "replaying buffered events"
            );
            for frame in frames {
                if sink.send(Message::Text(frame)).await.is_err() {
                    return;
                }
            }
        }
        Err(err) => {
            warn!(%err, "ignoring unparseable ws frame");
        }
    }
}
