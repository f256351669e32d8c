//! HTTP surface.
//!
//! | Method | Path                  | Semantics                          |
//! |--------|-----------------------|------------------------------------|
//! | GET    | `/`, `/inspect`, `/float` | inspect by `url` or `s,a,d,m`  |
//! | GET    | `/stats`              | fleet snapshot                     |
//!
//! Status mapping: 200 success/accepted, 400 bad descriptor, 429 queue
//! full, 504 timeout or no bots ready, 500 result-processing failure.

use crate::coordinator::{InspectCoordinator, InspectResponse};
use crate::descriptor::{parse_link, InspectDescriptor};
use crate::error::InspectError;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
struct AppState {
    coordinator: Arc<InspectCoordinator>,
}

/// Builds the gateway router.
pub fn router(coordinator: Arc<InspectCoordinator>) -> Router {
    let state = AppState { coordinator };
    Router::new()
        .route("/", get(inspect_handler))
        .route("/inspect", get(inspect_handler))
        .route("/float", get(inspect_handler))
        .route("/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves until the token is cancelled.
pub async fn serve(
    coordinator: Arc<InspectCoordinator>,
    port: u16,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[derive(Debug, Deserialize)]
struct InspectQuery {
    url: Option<String>,
    s: Option<u64>,
    a: Option<u64>,
    d: Option<u64>,
    m: Option<u64>,
    refresh: Option<String>,
    reply: Option<String>,
    #[serde(rename = "lowPriority")]
    low_priority: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

struct ApiError(InspectError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InspectError::BadDescriptor(_) => StatusCode::BAD_REQUEST,
            InspectError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
            InspectError::NoBotsReady
            | InspectError::InspectTimeout
            | InspectError::TransportDrop => StatusCode::GATEWAY_TIMEOUT,
            InspectError::Transport(_)
            | InspectError::Persistence(_)
            | InspectError::ShuttingDown => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ApiErrorBody {
            error: self.0.to_string(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// Interprets `refresh`/`reply`/`lowPriority` query values.
fn flag(value: &Option<String>, default: bool) -> bool {
    match value.as_deref() {
        Some(raw) => matches!(raw, "1" | "true" | "yes"),
        None => default,
    }
}

/// Builds the descriptor from either a full inspect link or the raw
/// `s,a,d,m` fields.
fn descriptor_from_query(query: &InspectQuery) -> Result<InspectDescriptor, InspectError> {
    let mut desc = if let Some(url) = &query.url {
        parse_link(url).map_err(|err| InspectError::BadDescriptor(err.to_string()))?
    } else {
        let a = query
            .a
            .ok_or_else(|| InspectError::BadDescriptor("missing asset id (a)".into()))?;
        let d = query
            .d
            .ok_or_else(|| InspectError::BadDescriptor("missing proof token (d)".into()))?;
        match (query.s.unwrap_or(0), query.m.unwrap_or(0)) {
            (s, 0) if s != 0 => InspectDescriptor::owned(s, a, d),
            (0, m) if m != 0 => InspectDescriptor::market(m, a, d),
            _ => {
                return Err(InspectError::BadDescriptor(
                    "exactly one of s and m must be non-zero".into(),
                ))
            }
        }
    };
    desc.refresh = flag(&query.refresh, false);
    desc.reply = flag(&query.reply, true);
    desc.low_priority = flag(&query.low_priority, false);
    Ok(desc)
}

async fn inspect_handler(
    State(state): State<AppState>,
    Query(query): Query<InspectQuery>,
) -> Result<Json<InspectResponse>, ApiError> {
    let desc = descriptor_from_query(&query).map_err(ApiError)?;
    let response = state
        .coordinator
        .inspect_item(desc)
        .await
        .map_err(ApiError)?;
    Ok(Json(response))
}

async fn stats_handler(State(state): State<AppState>) -> Response {
    Json(state.coordinator.fleet().stats()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(
        url: Option<&str>,
        s: Option<u64>,
        a: Option<u64>,
        d: Option<u64>,
        m: Option<u64>,
    ) -> InspectQuery {
        InspectQuery {
            url: url.map(String::from),
            s,
            a,
            d,
            m,
            refresh: None,
            reply: None,
            low_priority: None,
        }
    }

    #[test]
    fn test_descriptor_from_fields() {
        let q = query(None, Some(76561198084749846), Some(42), Some(7), None);
        let desc = descriptor_from_query(&q).unwrap();
        assert_eq!(desc.s, 76561198084749846);
        assert_eq!(desc.a, 42);
        assert!(desc.reply);
        assert!(!desc.refresh);
    }

    #[test]
    fn test_descriptor_from_market_fields() {
        let q = query(None, None, Some(42), Some(7), Some(4545586519));
        let desc = descriptor_from_query(&q).unwrap();
        assert_eq!(desc.m, 4545586519);
        assert!(desc.is_market());
    }

    #[test]
    fn test_descriptor_from_url() {
        let link = "steam://rungame/730/76561202255233023/+csgo_econ_action_preview%20\
                    S76561198084749846A6760346663D1234";
        let q = query(Some(link), None, None, None, None);
        let desc = descriptor_from_query(&q).unwrap();
        assert_eq!(desc.a, 6760346663);
    }

    #[test]
    fn test_descriptor_requires_exactly_one_head() {
        let both = query(None, Some(1), Some(42), Some(7), Some(2));
        assert!(descriptor_from_query(&both).is_err());
        let neither = query(None, None, Some(42), Some(7), None);
        assert!(descriptor_from_query(&neither).is_err());
    }

    #[test]
    fn test_flags_applied() {
        let mut q = query(None, Some(1), Some(42), Some(7), None);
        q.refresh = Some("true".into());
        q.reply = Some("false".into());
        q.low_priority = Some("1".into());
        let desc = descriptor_from_query(&q).unwrap();
        assert!(desc.refresh);
        assert!(!desc.reply);
        assert!(desc.low_priority);
    }

    #[test]
    fn test_flag_parsing() {
        assert!(flag(&Some("1".into()), false));
        assert!(flag(&Some("true".into()), false));
        assert!(!flag(&Some("0".into()), true));
        assert!(!flag(&Some("false".into()), true));
        assert!(flag(&None, true));
        assert!(!flag(&None, false));
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (InspectError::BadDescriptor("x".into()), 400),
            (InspectError::QueueFull, 429),
            (InspectError::NoBotsReady, 504),
            (InspectError::InspectTimeout, 504),
            (InspectError::TransportDrop, 504),
            (InspectError::Persistence("disk".into()), 500),
        ];
        for (err, code) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status().as_u16(), code);
        }
    }
}
