//! Viewer WebSocket endpoint
//!
//! Each connection binds one viewer to one session. Connecting to a target
//! that already has a viewer replaces that viewer's transport, which tears
//! down the previous relay host first.

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::state::AppState;
use crate::transport::WsTransport;

/// Viewer connection parameters
#[derive(Debug, Deserialize)]
pub struct ViewerQuery {
    /// Browser target to view
    pub target: String,
}

/// WebSocket upgrade handler for `/ws/viewer`
pub async fn viewer_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ViewerQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_viewer_socket(socket, state, query.target))
}

/// Bind an upgraded socket to its session
async fn handle_viewer_socket(socket: WebSocket, state: Arc<AppState>, target_id: String) {
    let session = match state.session_for_target(&target_id).await {
        Ok(session) => session,
        Err(e) => {
            // Setup failure is fatal for this connection only
            error!(target = %target_id, "Session setup failed: {}", e);
            return;
        }
    };

    info!(target = %target_id, "Viewer connected");
    let transport = WsTransport::spawn(socket);
    session.attach_transport(transport).await;
}
