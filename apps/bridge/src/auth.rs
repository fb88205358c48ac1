//! Secret-token gateway in front of every route
//!
//! Preflights and `GET /health` pass without a token. Everything else must
//! present `x-auth-token` equal to the session secret; the comparison is
//! constant time and the header never reaches the upstream.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ollama_bridge_common::{
    Session,
    constants::{AUTH_HEADER, HEALTH_PATH},
};
use serde::Serialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::cors::{apply_cors_headers, preflight_response};

/// Result of checking a request against the session secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authorized,
    Missing,
    Mismatch,
}

/// Body of a 401 answer
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnauthorizedBody {
    pub error: &'static str,
    pub received_token: &'static str,
    pub token_match: bool,
}

/// Check the request headers against the session secret
pub fn authorize(headers: &HeaderMap, session: &Session) -> AuthOutcome {
    match headers.get(AUTH_HEADER) {
        None => AuthOutcome::Missing,
        Some(presented) => {
            if tokens_match(presented.as_bytes(), session.secret_token().as_bytes()) {
                AuthOutcome::Authorized
            } else {
                AuthOutcome::Mismatch
            }
        }
    }
}

fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    presented.ct_eq(expected).into()
}

/// Middleware guarding the listener
pub async fn auth_gateway(
    State(session): State<Arc<Session>>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return preflight_response();
    }

    if request.method() == Method::GET && request.uri().path() == HEALTH_PATH {
        return next.run(request).await;
    }

    match authorize(request.headers(), &session) {
        AuthOutcome::Authorized => {
            request.headers_mut().remove(AUTH_HEADER);
            next.run(request).await
        }
        outcome => {
            warn!(
                "Rejected {} {}: token {}",
                request.method(),
                request.uri().path(),
                if outcome == AuthOutcome::Missing {
                    "missing"
                } else {
                    "mismatch"
                }
            );
            unauthorized(outcome)
        }
    }
}

fn unauthorized(outcome: AuthOutcome) -> Response {
    let body = UnauthorizedBody {
        error: "Unauthorized",
        received_token: if outcome == AuthOutcome::Missing {
            "missing"
        } else {
            "present"
        },
        token_match: false,
    };
    let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    apply_cors_headers(response.headers_mut());
    response
}
