//! H2 tunnel v1: a single POST whose response body is the target's read
//! side, while the request body is concurrently piped into the target's
//! write side.

use super::{check_auth, dial_target, pipe_body_into, stream_body, streaming_headers, validate_target};
use crate::hub::AppState;
use crate::Result;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

pub async fn handle_v1(headers: HeaderMap, State(state): State<AppState>, body: Body) -> Response {
    match run(headers, state, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn run(headers: HeaderMap, state: AppState, body: Body) -> Result<Response> {
    check_auth(&headers, &state.config.password)?;
    let (host, port) = validate_target(&headers)?;

    debug!("H2 tunnel v1 dialing {host}:{port}");
    let tcp = dial_target(&host, port, &state.resolver).await?;
    let (read_half, write_half) = tcp.into_split();

    tokio::spawn(pipe_body_into(body, write_half));

    let mut response_headers = HeaderMap::new();
    streaming_headers(&mut response_headers);

    let mut response = (StatusCode::OK, stream_body(read_half)).into_response();
    response.headers_mut().extend(response_headers);
    Ok(response)
}
