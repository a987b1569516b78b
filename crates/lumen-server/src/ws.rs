// WebSocket upgrade route. Connection identity is normally
// established by the out-of-scope auth collaborator; this boundary
// only accepts whatever identity string the caller already resolved,
// passed as a query parameter.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::{routing::get, Router};
use lumen_bus::ProgressBus;
use serde::Deserialize;

#[derive(Clone)]
pub struct AppState {
    pub bus: ProgressBus,
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

#[derive(Debug, Deserialize, Default)]
struct ConnectParams {
    identity: Option<String>,
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> impl IntoResponse {
    let identity = params.identity.unwrap_or_else(|| "anonymous".to_string());
    ws.on_upgrade(move |socket| lumen_ws::handle_connection(socket, state.bus, identity))
}
