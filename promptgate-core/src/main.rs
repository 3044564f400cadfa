use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use promptgate_core::{CheckContext, GuardConfig, GuardError, GuardPipeline, GuardResult};

struct AppState {
    pipeline: GuardPipeline,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::var("PROMPTGATE_CONFIG") {
        Ok(path) => GuardConfig::from_file(&path).expect("config file must be valid"),
        Err(_) => GuardConfig::standard(),
    };
    let pipeline = GuardPipeline::from_config(config).expect("default config must build");
    let shared_state = Arc::new(AppState { pipeline });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/check/input", post(check_input))
        .route("/check/output", post(check_output))
        .with_state(shared_state);

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    println!("PromptGate listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn health_check() -> &'static str {
    "PromptGate: ONLINE"
}

#[derive(Deserialize)]
struct CheckRequest {
    content: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct OutputCheckRequest {
    input: String,
    output: String,
}

#[derive(Serialize)]
struct CheckResponse {
    allowed: bool,
    result: GuardResult,
}

async fn check_input(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, StatusCode> {
    let mut ctx = CheckContext::new(payload.content);
    if let Some(user_id) = payload.user_id {
        ctx = ctx.with_user_id(user_id);
    }
    if let Some(session_id) = payload.session_id {
        ctx = ctx.with_session_id(session_id);
    }

    match state.pipeline.check_input(&ctx).await {
        Ok(result) => Ok(Json(CheckResponse {
            allowed: !result.is_blocked(),
            result,
        })),
        Err(GuardError::Cancelled) => Err(StatusCode::REQUEST_TIMEOUT),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

async fn check_output(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OutputCheckRequest>,
) -> Result<Json<CheckResponse>, StatusCode> {
    let ctx = CheckContext::new(payload.input);
    match state.pipeline.check_output(&ctx, &payload.output).await {
        Ok(result) => Ok(Json(CheckResponse {
            allowed: !result.is_blocked(),
            result,
        })),
        Err(GuardError::Cancelled) => Err(StatusCode::REQUEST_TIMEOUT),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
