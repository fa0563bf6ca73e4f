use crate::config::LlmConfig;
use crate::db::reflect::SchemaSnapshot;
use crate::server::guards::auth::RequireKeyAuth;
use crate::server::routes::{meta, sse, tables};

use axum::{
    Router,
    extract::Request,
    http::{HeaderName, StatusCode, Version, header::USER_AGENT},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
};
use base64::Engine as _;
use rand::RngCore;
use reqwest::header::HeaderValue;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

const MAX_REQUEST_ID_LEN: usize = 128;
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

fn generate_request_id() -> String {
    // 96 bits => 16 chars base64url (no padding).
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn format_http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/?",
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    schema: Arc<RwLock<Arc<SchemaSnapshot>>>,
    pub http: reqwest::Client,
    pub llm: Arc<LlmConfig>,
    pub service_key: Arc<str>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        snapshot: SchemaSnapshot,
        llm: LlmConfig,
        service_key: Arc<str>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("pythia/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(10 * 60))
            .http2_adaptive_window(true)
            .build()
            .expect("failed to build reqwest client");

        Self {
            pool,
            schema: Arc::new(RwLock::new(Arc::new(snapshot))),
            http,
            llm: Arc::new(llm),
            service_key,
        }
    }

    /// Current reflected schema; cheap to clone and immutable.
    pub async fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.schema.read().await.clone()
    }

    /// Publishes a freshly reflected snapshot.
    pub async fn install_snapshot(&self, snapshot: SchemaSnapshot) {
        let mut guard = self.schema.write().await;
        *guard = Arc::new(snapshot);
    }
}

async fn not_found_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn access_log(req: Request, next: Next) -> Response {
    // Capture request metadata before moving `req` into the handler stack.
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start = Instant::now();
    let mut resp = next.run(req).await;

    // Always reflect `x-request-id` for easier correlation, even if the client didn't send one.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(X_REQUEST_ID, value);
    }

    let status = resp.status();
    let latency_ms = start.elapsed().as_millis() as u64;
    let path = uri.path();
    let protocol = format_http_version(version);

    // Note: for SSE responses, `latency_ms` is time-to-first-byte (handler
    // return), not the full stream duration.
    if status.is_server_error() {
        error!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else if status.is_client_error() {
        warn!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else {
        info!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    }

    resp
}

pub fn pythia_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/tables", get(tables::list_tables))
        .route("/api/tables/{table}", get(tables::table_details))
        .route(
            "/api/tables/{table}/rows",
            get(tables::list_rows).post(tables::create_row),
        )
        .route(
            "/api/tables/{table}/rows/{id}",
            put(tables::update_row).delete(tables::delete_row),
        )
        .route("/api/schema/refresh", post(tables::refresh_schema));

    // The raw-SQL escape hatch sits behind the key guard.
    let execute = Router::new()
        .route("/api/execute", post(tables::execute_sql))
        .layer(middleware::from_extractor_with_state::<RequireKeyAuth, _>(
            state.clone(),
        ));

    let streaming = Router::new().route("/sse/llm", post(sse::stream_llm));

    Router::new()
        .route("/", get(meta::index))
        .merge(api)
        .merge(execute)
        .merge(streaming)
        .fallback(not_found_handler)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(access_log))
}
