//! VLESS-over-WebSocket engine ("UnderPass"): WebSocket upgrade -> VLESS
//! header parse -> TCP dial (or DoH redirect) -> bidirectional bridge.

pub mod bridge;
pub mod doh;
pub mod header;

use crate::hub::AppState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use bridge::{early_data_from_header, run_conduit, ConduitContext};
use tracing::debug;

/// `GET` with `Upgrade: websocket`: the VLESS inbound endpoint.
pub async fn vless_ws(ws: WebSocketUpgrade, headers: HeaderMap, State(state): State<AppState>) -> Response {
    let early_chunk = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| match early_data_from_header(Some(v)) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("invalid early-data header: {e}");
                None
            }
        });

    ws.on_upgrade(move |socket| async move {
        let ctx = ConduitContext {
            user_id: &state.config.user_id,
            resolver: &state.resolver,
            doh_url: &state.config.doh_url,
            doh_client: &state.http_client,
        };
        run_conduit(socket, early_chunk, ctx).await;
    })
}
