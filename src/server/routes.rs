use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{BoxError, Extension, Json, Router};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::driver::DriverHandle;
use crate::round::{BetKind, MAX_NUMBER};
use crate::session::SessionView;

use super::dto::{PlaceBetRequest, RegisterRequest, VisibilityRequest};
use super::error::ApiError;
use super::logging::log_requests;

const LOG_TARGET: &str = "server::routes";

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct ServerContext {
    pub driver: DriverHandle,
}

/// HTTP surface over a running round driver.
pub struct RouletteServer {
    router: Router,
}

impl RouletteServer {
    pub fn new(driver: DriverHandle, request_timeout: Duration) -> Self {
        let context = Arc::new(ServerContext { driver });

        let router = Router::new()
            .route("/round", get(get_round))
            .route("/round/start", post(start_round))
            .route("/round/spin", post(spin))
            .route("/bets", post(place_bet))
            .route("/register", post(register))
            .route("/visibility", post(set_visibility))
            .route("/leave", post(leave))
            .route("/events", get(stream_events))
            .layer(Extension(context))
            .layer(middleware::from_fn(log_requests))
            .layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_middleware_error))
                    .layer(TimeoutLayer::new(request_timeout)),
            )
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive());

        Self { router }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

async fn handle_middleware_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_owned())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unhandled middleware error: {err}"),
        )
    }
}

async fn get_round(Extension(context): Extension<Arc<ServerContext>>) -> Json<SessionView> {
    Json(context.driver.view())
}

async fn start_round(
    Extension(context): Extension<Arc<ServerContext>>,
) -> Result<Json<SessionView>, ApiError> {
    context.driver.start_round().await?;
    Ok(Json(context.driver.view()))
}

async fn spin(
    Extension(context): Extension<Arc<ServerContext>>,
) -> Result<Json<SessionView>, ApiError> {
    context.driver.spin().await?;
    Ok(Json(context.driver.view()))
}

async fn place_bet(
    Extension(context): Extension<Arc<ServerContext>>,
    Json(request): Json<PlaceBetRequest>,
) -> Result<Json<SessionView>, ApiError> {
    validate_bet(&request)?;
    context
        .driver
        .place_bet(request.bet_kind, request.numbers, request.amount)
        .await?;
    Ok(Json(context.driver.view()))
}

fn validate_bet(request: &PlaceBetRequest) -> Result<(), ApiError> {
    if request.amount == 0 {
        return Err(ApiError::bad_request("bet amount must be positive"));
    }
    if let Some(number) = request.numbers.iter().find(|n| **n > MAX_NUMBER) {
        return Err(ApiError::bad_request(format!(
            "{number} is not on the wheel"
        )));
    }
    if request.bet_kind == BetKind::Straight && request.numbers.len() != 1 {
        return Err(ApiError::bad_request(
            "a straight bet covers exactly one number",
        ));
    }
    Ok(())
}

async fn register(
    Extension(context): Extension<Arc<ServerContext>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<SessionView>, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("display name must not be empty"));
    }
    context
        .driver
        .register(request.name, request.initial_balance)
        .await?;
    Ok(Json(context.driver.view()))
}

async fn set_visibility(
    Extension(context): Extension<Arc<ServerContext>>,
    Json(request): Json<VisibilityRequest>,
) -> Result<Json<SessionView>, ApiError> {
    context.driver.set_visibility(request.visible).await?;
    Ok(Json(context.driver.view()))
}

async fn leave(
    Extension(context): Extension<Arc<ServerContext>>,
) -> Result<Json<SessionView>, ApiError> {
    context.driver.leave().await?;
    Ok(Json(context.driver.view()))
}

async fn stream_events(
    Extension(context): Extension<Arc<ServerContext>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream =
        BroadcastStream::new(context.driver.subscribe()).filter_map(|item| match item {
            Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(err) => {
                    warn!(target: LOG_TARGET, error = %err, "failed to encode session event");
                    None
                }
            },
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(target: LOG_TARGET, skipped, "event subscriber lagged");
                None
            }
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::ClientConfig;
    use crate::driver::RoundDriver;
    use crate::round::{RoundPhase, SessionMode};
    use crate::session::RoundSession;
    use crate::source::{InMemoryOutcomeSource, InMemorySourceConfig};
    use crate::stats::InMemoryStatsStore;
    use crate::time::TokioClock;

    fn app(mode: SessionMode) -> (Router, InMemoryOutcomeSource) {
        let clock = Arc::new(TokioClock::new(1_700_000_000_000));
        let source = InMemoryOutcomeSource::with_clock(
            InMemorySourceConfig {
                seed: Some(3),
                ..Default::default()
            },
            clock.clone(),
        );
        let config = ClientConfig::new(mode, Some("alice".to_string()));
        let session = RoundSession::new(&config, Arc::new(InMemoryStatsStore::new()));
        let (handle, _join) =
            RoundDriver::spawn(session, Arc::new(source.clone()), clock, &config);
        let server = RouletteServer::new(handle, Duration::from_secs(10));
        (server.into_router(), source)
    }

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test(start_paused = true)]
    async fn round_view_is_served() {
        let (router, _) = app(SessionMode::Solo);
        let (status, body) = call(&router, Method::GET, "/round", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "solo");
        assert_eq!(body["local_participant"], "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn solo_spin_starts_a_reveal() {
        let (router, source) = app(SessionMode::Solo);
        source.script_draws([17]);

        let (status, _) = call(
            &router,
            Method::POST,
            "/register",
            Some(json!({ "name": "Alice", "initial_balance": 1000 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &router,
            Method::POST,
            "/bets",
            Some(json!({ "bet_kind": "STRAIGHT", "numbers": [17], "amount": 50 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (status, body) = call(&router, Method::POST, "/round/spin", None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["is_reveal_in_progress"], true);
        assert_eq!(body["reveal"]["number"], 17);
        assert_eq!(source.balance_of("alice"), Some(2750));
    }

    #[tokio::test(start_paused = true)]
    async fn joined_client_cannot_start_rounds() {
        let (router, _) = app(SessionMode::Join);
        let (status, body) = call(&router, Method::POST, "/round/start", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().contains("host"));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_bets_are_refused_before_reaching_the_driver() {
        let (router, source) = app(SessionMode::Solo);
        let (status, _) = call(
            &router,
            Method::POST,
            "/bets",
            Some(json!({ "bet_kind": "STRAIGHT", "numbers": [17, 18], "amount": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &router,
            Method::POST,
            "/bets",
            Some(json!({ "bet_kind": "RED", "amount": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(source.balance_of("alice"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_changes_are_acknowledged() {
        let (router, _) = app(SessionMode::Host);
        let (status, body) = call(
            &router,
            Method::POST,
            "/visibility",
            Some(json!({ "visible": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], serde_json::to_value(RoundPhase::Waiting).unwrap());

        let (status, _) = call(
            &router,
            Method::POST,
            "/visibility",
            Some(json!({ "visible": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
