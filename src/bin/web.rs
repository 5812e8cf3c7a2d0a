use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tee_time_aggregator::{logging, store::SupabaseStore, Config, Pipeline, RunSummary};
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "web", about = "HTTP trigger for the scheduled tee time and forecast jobs")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,

    #[arg(short, long)]
    verbose: bool,
}

struct AppState {
    pipeline: Pipeline<SupabaseStore>,
    /// Latest summary per job name
    last_runs: RwLock<HashMap<&'static str, RunSummary>>,
}

type SharedState = Arc<AppState>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeResponse {
    status_code: u16,
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<RunSummary>,
}

impl InvokeResponse {
    fn from_run(result: anyhow::Result<RunSummary>) -> Self {
        match result {
            Ok(summary) => Self {
                status_code: summary.status_code(),
                success: summary.is_success(),
                message: summary.message(),
                summary: Some(summary),
            },
            Err(e) => {
                error!("Run failed: {:#}", e);
                Self {
                    status_code: 500,
                    success: false,
                    message: format!("{:#}", e),
                    summary: None,
                }
            }
        }
    }
}

impl IntoResponse for InvokeResponse {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

async fn remember(state: &AppState, response: &InvokeResponse) {
    if let Some(summary) = &response.summary {
        state
            .last_runs
            .write()
            .await
            .insert(summary.pipeline, summary.clone());
    }
}

async fn invoke_tee_times(
    State(state): State<SharedState>,
    event: Option<Json<serde_json::Value>>,
) -> InvokeResponse {
    debug!("Tee time run triggered with event {:?}", event.map(|Json(v)| v));
    let response = InvokeResponse::from_run(state.pipeline.run_tee_times().await);
    remember(&state, &response).await;
    response
}

async fn invoke_forecasts(
    State(state): State<SharedState>,
    event: Option<Json<serde_json::Value>>,
) -> InvokeResponse {
    debug!("Forecast run triggered with event {:?}", event.map(|Json(v)| v));
    let response = InvokeResponse::from_run(state.pipeline.run_forecasts().await);
    remember(&state, &response).await;
    response
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let last_runs = state.last_runs.read().await;
    Json(serde_json::json!({
        "status": "ok",
        "lastRuns": *last_runs,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let config = Config::from_env()?;
    let state = Arc::new(AppState {
        pipeline: Pipeline::from_config(&config)?,
        last_runs: RwLock::new(HashMap::new()),
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/invoke/tee-times", post(invoke_tee_times))
        .route("/invoke/forecasts", post(invoke_forecasts))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    info!("Listening on http://{}", args.bind);
    axum::serve(listener, app).await?;
    Ok(())
}
