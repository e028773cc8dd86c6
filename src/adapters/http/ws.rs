use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use serde_json::json;
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{debug, info};

use crate::adapters::http::state::HttpState;
use crate::domain::stream::{LiveEvent, WsFrameMetaMessage};

pub async fn ws_handler(ws: WebSocketUpgrade, State(st): State<HttpState>) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, st))
}

/// Una sesión de cámara en vivo por socket. Cada frame se envía como un
/// mensaje de texto JSON con sus metadatos seguido del JPEG en binario.
async fn handle_socket(mut socket: WebSocket, st: HttpState) {
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut rx = st.detection.start_live(stop_rx);
    let mut pending_jpeg: Option<Vec<u8>> = None;
    info!("Live viewer connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            event = rx.recv() => match event {
                Ok(LiveEvent::Frame(jpeg)) => pending_jpeg = Some(jpeg),
                Ok(LiveEvent::Meta(meta)) => {
                    let msg = WsFrameMetaMessage { r#type: "frame".into(), meta };
                    let json = serde_json::to_string(&msg).unwrap_or_default();
                    if socket.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                    if let Some(jpeg) = pending_jpeg.take() {
                        if socket.send(Message::Binary(jpeg)).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(LiveEvent::Finished { frames, error }) => {
                    let msg = json!({ "type": "finished", "frames": frames, "error": error });
                    let _ = socket.send(Message::Text(msg.to_string())).await;
                    break;
                }
                Err(RecvError::Lagged(n)) => debug!("Live viewer skipped {} events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    // La cámara se detiene tras el frame en curso
    let _ = stop_tx.send(true);
    info!("Live viewer disconnected");
}
