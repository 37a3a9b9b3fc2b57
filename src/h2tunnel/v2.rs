//! H2 tunnel v2: a POST and a GET, matched by `X-Tunnel-Id`, rendezvous
//! through a process-wide table so clients whose HTTP stack can't expose a
//! response body until the request body ends can still get a duplex.

use super::rendezvous::{GetRegistration, PostRegistration, GET_BEFORE_POST_GRACE};
use super::{check_auth, dial_target, pipe_body_into, stream_body, streaming_headers, tunnel_id, validate_target};
use crate::hub::AppState;
use crate::{Error, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

pub async fn handle_post(headers: HeaderMap, State(state): State<AppState>, body: Body) -> Response {
    match run_post(headers, state, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

pub async fn handle_get(headers: HeaderMap, State(state): State<AppState>) -> Response {
    match run_get(headers, state).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn run_post(headers: HeaderMap, state: AppState, body: Body) -> Result<Response> {
    check_auth(&headers, &state.config.password)?;
    let id = tunnel_id(&headers).ok_or_else(|| Error::bad_request("missing X-Tunnel-Id"))?;

    let tx = match state.rendezvous.register_post(&id) {
        PostRegistration::Fresh(tx) => tx,
        PostRegistration::Conflict => return Err(Error::conflict(format!("tunnel id {id} already in use"))),
    };

    let (host, port) = match validate_target(&headers) {
        Ok(t) => t,
        Err(e) => {
            let _ = tx.send(Err(e.to_string()));
            return Err(e);
        }
    };

    debug!("H2 tunnel v2 POST {id} dialing {host}:{port}");
    let tcp = match dial_target(&host, port, &state.resolver).await {
        Ok(tcp) => tcp,
        Err(e) => {
            let _ = tx.send(Err(e.to_string()));
            return Err(e);
        }
    };

    let (read_half, write_half) = tcp.into_split();
    let _ = tx.send(Ok(read_half));

    pipe_body_into(body, write_half).await;

    Ok((StatusCode::CREATED, "tunnel closed").into_response())
}

async fn run_get(headers: HeaderMap, state: AppState) -> Result<Response> {
    check_auth(&headers, &state.config.password)?;
    let id = tunnel_id(&headers).ok_or_else(|| Error::bad_request("missing X-Tunnel-Id"))?;

    let resolve_rx = match state.rendezvous.register_get(&id) {
        GetRegistration::Ready(rx) => rx,
        GetRegistration::AlreadyWaiting => {
            return Err(Error::not_found(format!("tunnel id {id} already awaited")))
        }
        GetRegistration::Waiting(waiter_rx) => {
            match tokio::time::timeout(GET_BEFORE_POST_GRACE, waiter_rx).await {
                Ok(Ok(resolve_rx)) => resolve_rx,
                _ => {
                    state.rendezvous.remove_if_waiting(&id);
                    return Err(Error::not_found(format!("no tunnel registered for id {id}")));
                }
            }
        }
    };

    match resolve_rx.await {
        Ok(Ok(read_half)) => {
            let mut response_headers = HeaderMap::new();
            streaming_headers(&mut response_headers);
            let mut response = (StatusCode::OK, stream_body(read_half)).into_response();
            response.headers_mut().extend(response_headers);
            Ok(response)
        }
        Ok(Err(reason)) => Err(Error::dial_failed(reason)),
        Err(_) => Err(Error::internal("tunnel resolver dropped without a result")),
    }
}
