//! The API Gateway: a thin relay in front of scheduler-service. It
//! proxies the REST surface over `reqwest`, optionally verifies a
//! bearer JWT and forwards the subject as `x-user-id`, and relays the
//! shared "events" pub/sub channel straight from Redis onto a
//! WebSocket — it never talks to scheduler-service's own `/ws`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use clap::Parser;
use futures::StreamExt;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use shared::keys::EVENTS_CHANNEL;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod models;
mod state;

use models::{ApiResponse, Claims, HealthResponse, ServiceHealth};
use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "api-gateway")]
#[command(about = "Relay gateway for the scheduling kernel")]
struct Args {
    #[arg(long, env = "GATEWAY_PORT", default_value_t = 8090)]
    port: u16,

    #[arg(long, env = "SCHEDULER_SERVICE_URL", default_value = "http://127.0.0.1:8080")]
    scheduler_service_url: String,

    #[arg(long, env = "SCHEDULER__KV__URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    #[arg(long, env = "GATEWAY_JWT_SECRET")]
    jwt_secret: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    shared::tracing_setup::init(&args.log_level);

    let state = Arc::new(AppState::new(args.scheduler_service_url, &args.redis_url, args.jwt_secret)?);

    info!(port = args.port, "starting api-gateway");

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(proxy_metrics))
        .route("/api/v1/schedule", get(get_schedule))
        .route("/api/v1/schedule/backlog", get(get_backlog))
        .route("/api/v1/schedule/plan-day", post(plan_day))
        .route("/api/v1/disruption", post(post_disruption))
        .route("/api/v1/energy", post(post_energy))
        .route("/api/v1/energy/status", get(get_energy_status))
        .route("/api/v1/tasks", post(create_task))
        .route("/api/v1/tasks/:id", delete(proxy_delete_task))
        .route("/api/v1/tasks/:id/start", post(start_task))
        .route("/api/v1/tasks/:id/complete", post(complete_task))
        .route("/api/v1/drafts", post(create_draft))
        .route("/api/v1/drafts/:id", get(proxy_get_draft))
        .route("/api/v1/drafts/:id/approval", post(proxy_draft_approval))
        .route("/api/v1/profile", get(get_profile))
        .route("/api/v1/profile/linkedin", get(get_linkedin_profile))
        .route("/api/v1/schedule/intelligence", get(get_schedule_intelligence))
        .route("/ws", get(ws_relay))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let start = Instant::now();
    let upstream = match state.client.get(format!("{}/health", state.scheduler_service_url)).send().await {
        Ok(resp) if resp.status().is_success() => ServiceHealth {
            status: "healthy".to_string(),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
            last_check: chrono::Utc::now(),
        },
        _ => ServiceHealth {
            status: "unhealthy".to_string(),
            response_time_ms: None,
            last_check: chrono::Utc::now(),
        },
    };

    let mut services = HashMap::new();
    services.insert("scheduler-service".to_string(), upstream);

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: shared::VERSION.to_string(),
        services,
    })
}

/// Relays scheduler-service's Prometheus exposition text as-is — unlike
/// `forward`, the body isn't JSON, so it can't go through `ApiResponse`.
async fn proxy_metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.client.get(format!("{}/metrics", state.scheduler_service_url)).send().await {
        Ok(resp) if resp.status().is_success() => match resp.text().await {
            Ok(body) => (
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                body,
            )
                .into_response(),
            Err(err) => (StatusCode::BAD_GATEWAY, err.to_string()).into_response(),
        },
        Ok(resp) => StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY).into_response(),
        Err(err) => {
            warn!(error = %err, "upstream scheduler-service unreachable for /metrics");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Decodes an optional bearer token and returns the subject, to be
/// forwarded as `x-user-id`. Requests without a token, or when no
/// secret is configured, pass through unauthenticated.
fn extract_user_id(headers: &HeaderMap, state: &AppState) -> Option<String> {
    let secret = state.jwt_secret.as_ref()?;
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::new(Algorithm::HS256)).ok()?;
    Some(data.claims.sub)
}

async fn forward(
    state: &AppState,
    method: reqwest::Method,
    path: &str,
    headers: &HeaderMap,
    body: Option<Value>,
) -> Result<Json<ApiResponse<Value>>, (StatusCode, Json<ApiResponse<Value>>)> {
    let url = format!("{}{}", state.scheduler_service_url, path);
    let mut builder = state.client.request(method, url);
    if let Some(user_id) = extract_user_id(headers, state) {
        builder = builder.header("x-user-id", user_id);
    }
    if let Some(body) = body {
        builder = builder.json(&body);
    }

    match builder.send().await {
        Ok(resp) if resp.status().is_success() => {
            let data = resp.json::<Value>().await.unwrap_or(Value::Null);
            Ok(Json(ApiResponse::ok(data)))
        }
        Ok(resp) => {
            let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let text = resp.text().await.unwrap_or_default();
            Err((status, Json(ApiResponse::err(text))))
        }
        Err(err) => {
            warn!(error = %err, path, "upstream scheduler-service unreachable");
            Err((StatusCode::SERVICE_UNAVAILABLE, Json(ApiResponse::err(err.to_string()))))
        }
    }
}

async fn get_schedule(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    forward(&state, reqwest::Method::GET, "/api/v1/schedule", &headers, None).await.into_response()
}

async fn get_backlog(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    forward(&state, reqwest::Method::GET, "/api/v1/schedule/backlog", &headers, None).await.into_response()
}

async fn plan_day(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    forward(&state, reqwest::Method::POST, "/api/v1/schedule/plan-day", &headers, Some(body)).await.into_response()
}

async fn post_disruption(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    forward(&state, reqwest::Method::POST, "/api/v1/disruption", &headers, Some(body)).await.into_response()
}

async fn post_energy(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    forward(&state, reqwest::Method::POST, "/api/v1/energy", &headers, Some(body)).await.into_response()
}

async fn get_energy_status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    forward(&state, reqwest::Method::GET, "/api/v1/energy/status", &headers, None).await.into_response()
}

async fn create_task(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    forward(&state, reqwest::Method::POST, "/api/v1/tasks", &headers, Some(body)).await.into_response()
}

async fn proxy_delete_task(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    forward(&state, reqwest::Method::DELETE, &format!("/api/v1/tasks/{id}"), &headers, None)
        .await
        .into_response()
}

async fn start_task(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    forward(&state, reqwest::Method::POST, &format!("/api/v1/tasks/{id}/start"), &headers, None)
        .await
        .into_response()
}

async fn complete_task(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    forward(&state, reqwest::Method::POST, &format!("/api/v1/tasks/{id}/complete"), &headers, None)
        .await
        .into_response()
}

async fn create_draft(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    forward(&state, reqwest::Method::POST, "/api/v1/drafts", &headers, Some(body)).await.into_response()
}

async fn proxy_get_draft(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    forward(&state, reqwest::Method::GET, &format!("/api/v1/drafts/{id}"), &headers, None)
        .await
        .into_response()
}

async fn get_profile(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    forward(&state, reqwest::Method::GET, "/api/v1/profile", &headers, None).await.into_response()
}

async fn get_linkedin_profile(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    forward(&state, reqwest::Method::GET, "/api/v1/profile/linkedin", &headers, None).await.into_response()
}

async fn get_schedule_intelligence(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    forward(&state, reqwest::Method::GET, "/api/v1/schedule/intelligence", &headers, None).await.into_response()
}

async fn proxy_draft_approval(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    forward(&state, reqwest::Method::POST, &format!("/api/v1/drafts/{id}/approval"), &headers, Some(body))
        .await
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn state_with_secret(secret: &str) -> AppState {
        AppState::new(
            "http://127.0.0.1:8080".to_string(),
            "redis://127.0.0.1:6379",
            Some(secret.to_string()),
        )
        .unwrap()
    }

    #[test]
    fn missing_secret_skips_auth() {
        let state = AppState::new("http://127.0.0.1:8080".to_string(), "redis://127.0.0.1:6379", None).unwrap();
        let headers = HeaderMap::new();
        assert_eq!(extract_user_id(&headers, &state), None);
    }

    #[test]
    fn missing_authorization_header_yields_none() {
        let state = state_with_secret("topsecret");
        let headers = HeaderMap::new();
        assert_eq!(extract_user_id(&headers, &state), None);
    }

    #[test]
    fn valid_bearer_token_extracts_subject() {
        let state = state_with_secret("topsecret");
        let claims = Claims {
            sub: "user-42".to_string(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"topsecret")).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );

        assert_eq!(extract_user_id(&headers, &state), Some("user-42".to_string()));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let state = state_with_secret("topsecret");
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer not-a-jwt"));
        assert_eq!(extract_user_id(&headers, &state), None);
    }
}

async fn ws_relay(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| relay_events(socket, state))
}

async fn relay_events(mut socket: WebSocket, state: Arc<AppState>) {
    let conn = match state.redis_client.get_async_connection().await {
        Ok(conn) => conn,
        Err(err) => {
            warn!(error = %err, "api-gateway could not open redis connection for ws relay");
            let _ = socket.close().await;
            return;
        }
    };
    let mut pubsub = conn.into_pubsub();
    if let Err(err) = pubsub.subscribe(EVENTS_CHANNEL).await {
        warn!(error = %err, "api-gateway could not subscribe to events channel");
        return;
    }

    let mut stream = pubsub.on_message();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(msg) => {
                        let payload: String = match msg.get_payload() {
                            Ok(payload) => payload,
                            Err(_) => continue,
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if socket.send(Message::Text("{\"type\":\"heartbeat\"}".to_string())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                if matches!(incoming, Some(Ok(Message::Close(_))) | None) {
                    break;
                }
            }
        }
    }
}
