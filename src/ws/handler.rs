//! WebSocket upgrade handler

use axum::{
    extract::{ws::WebSocket, State, WebSocketUpgrade},
    response::Response,
};
use futures::StreamExt;
use tracing::info;

use crate::app::AppState;
use crate::ws::session::run_session;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    run_session(ws_sink, ws_stream, state.session_context()).await;
}
