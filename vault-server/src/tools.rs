//! JSON tool-call transport.
//!
//! The three operations are exposed as named tools behind a single
//! dispatch table built at startup. No registration at import time,
//! and the table is callable without any HTTP machinery (unit tests
//! exercise it directly). Binary payloads travel base64-encoded. Two
//! sibling endpoints: `GET /health` and `GET /metrics`.

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use vault_core::{ScoreShape, ServiceState, Transport, VaultError, VaultService};

// ---------------------------------------------------------------------------
// Dispatch table
// ---------------------------------------------------------------------------

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, VaultError>> + Send>>;
type Handler = Box<dyn Fn(Arc<VaultService>, Value) -> HandlerFuture + Send + Sync>;

struct ToolDef {
    description: &'static str,
    schema: Value,
    handler: Handler,
}

pub struct ToolRegistry {
    tools: HashMap<&'static str, ToolDef>,
}

impl ToolRegistry {
    pub fn new(score_shape: ScoreShape) -> Self {
        let mut tools = HashMap::new();

        tools.insert(
            "get_public_key",
            ToolDef {
                description: "Fetch the public key bundle for encrypt/search workers",
                schema: json!({
                    "type": "object",
                    "properties": { "token": { "type": "string" } },
                    "required": ["token"],
                }),
                handler: Box::new(|service, args| -> HandlerFuture {
                    Box::pin(get_public_key(service, args))
                }),
            },
        );

        tools.insert(
            "decrypt_scores",
            ToolDef {
                description: "Decrypt a similarity-score ciphertext into a bounded top-k list",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "token": { "type": "string" },
                        "ciphertext": { "type": "string", "description": "base64" },
                        "top_k": { "type": "integer" },
                    },
                    "required": ["token", "ciphertext"],
                }),
                handler: Box::new(move |service, args| -> HandlerFuture {
                    Box::pin(decrypt_scores(service, args, score_shape))
                }),
            },
        );

        tools.insert(
            "decrypt_metadata",
            ToolDef {
                description: "Unwrap an ordered batch of encrypted per-record metadata",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "token": { "type": "string" },
                        "items": { "type": "array", "items": { "type": "string", "description": "base64" } },
                    },
                    "required": ["token", "items"],
                }),
                handler: Box::new(|service, args| -> HandlerFuture {
                    Box::pin(decrypt_metadata(service, args))
                }),
            },
        );

        Self { tools }
    }

    pub async fn call(
        &self,
        service: Arc<VaultService>,
        name: &str,
        arguments: Value,
    ) -> Result<Value, VaultError> {
        match self.tools.get(name) {
            Some(def) => (def.handler)(service, arguments).await,
            None => Err(VaultError::InvalidInput),
        }
    }

    pub fn list(&self) -> Vec<Value> {
        let mut out: Vec<(&str, Value)> = self
            .tools
            .iter()
            .map(|(name, def)| {
                (
                    *name,
                    json!({
                        "name": name,
                        "description": def.description,
                        "input_schema": def.schema,
                    }),
                )
            })
            .collect();
        out.sort_by_key(|(name, _)| *name);
        out.into_iter().map(|(_, v)| v).collect()
    }
}

// ---------------------------------------------------------------------------
// Tool handlers
// ---------------------------------------------------------------------------

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, VaultError> {
    serde_json::from_value(args).map_err(|_| VaultError::InvalidInput)
}

fn decode_b64(data: &str) -> Result<Vec<u8>, VaultError> {
    BASE64.decode(data.as_bytes()).map_err(|_| VaultError::InvalidInput)
}

#[derive(Deserialize)]
struct GetPublicKeyArgs {
    token: String,
}

async fn get_public_key(service: Arc<VaultService>, args: Value) -> Result<Value, VaultError> {
    let args: GetPublicKeyArgs = parse_args(args)?;
    let bundle = service.get_public_key(Transport::Tool, &args.token).await?;
    Ok(json!({
        "enc_key": BASE64.encode(&bundle.enc_key),
        "eval_key": BASE64.encode(&bundle.eval_key),
        "index_name": bundle.index_name,
        "dim": bundle.dim,
    }))
}

#[derive(Deserialize)]
struct DecryptScoresArgs {
    token: String,
    ciphertext: String,
    #[serde(default)]
    top_k: i64,
}

async fn decrypt_scores(
    service: Arc<VaultService>,
    args: Value,
    shape: ScoreShape,
) -> Result<Value, VaultError> {
    let args: DecryptScoresArgs = parse_args(args)?;
    if args.top_k < 0 {
        return Err(VaultError::InvalidInput);
    }
    let top_k = args.top_k.min(u32::MAX as i64) as u32;
    let ciphertext = decode_b64(&args.ciphertext)?;
    let entries = service
        .decrypt_scores(Transport::Tool, &args.token, &ciphertext, top_k)
        .await?;
    let rendered: Vec<Value> = match shape {
        ScoreShape::Structured => entries
            .iter()
            .map(|e| json!({ "shard_idx": e.shard_idx, "row_idx": e.row_idx, "score": e.score }))
            .collect(),
        ScoreShape::Flat => entries
            .iter()
            .map(|e| json!({ "index": e.row_idx, "score": e.score }))
            .collect(),
    };
    Ok(Value::Array(rendered))
}

#[derive(Deserialize)]
struct DecryptMetadataArgs {
    token: String,
    #[serde(default)]
    items: Vec<String>,
}

async fn decrypt_metadata(service: Arc<VaultService>, args: Value) -> Result<Value, VaultError> {
    let args: DecryptMetadataArgs = parse_args(args)?;
    let items = args
        .items
        .iter()
        .map(|item| decode_b64(item))
        .collect::<Result<Vec<_>, _>>()?;
    let out = service
        .decrypt_metadata(Transport::Tool, &args.token, items)
        .await?;
    Ok(json!(out))
}

// ---------------------------------------------------------------------------
// HTTP surface
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    service: Arc<VaultService>,
    registry: Arc<ToolRegistry>,
}

pub fn router(
    service: Arc<VaultService>,
    registry: Arc<ToolRegistry>,
    max_body_bytes: usize,
) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/tools", get(list_tools))
        .route("/tools/call", post(call_tool))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .with_state(AppState { service, registry })
}

fn http_status_for(err: &VaultError) -> StatusCode {
    match err {
        VaultError::Unauthorized => StatusCode::UNAUTHORIZED,
        VaultError::InvalidInput => StatusCode::BAD_REQUEST,
        VaultError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        VaultError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        VaultError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        VaultError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        VaultError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: VaultError) -> Response {
    let status = http_status_for(&err);
    let body = json!({ "error": { "code": err.kind(), "message": err.to_string() } });
    (status, Json(body)).into_response()
}

#[derive(Deserialize)]
struct ToolCallBody {
    name: String,
    #[serde(default)]
    arguments: Value,
}

async fn call_tool(State(state): State<AppState>, Json(body): Json<ToolCallBody>) -> Response {
    match state
        .registry
        .call(state.service.clone(), &body.name, body.arguments)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(json!({ "result": result }))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tools": state.registry.list() }))
}

async fn health(State(state): State<AppState>) -> Response {
    let ready = state.service.state() == ServiceState::Ready;
    let body = json!({
        "status": if ready { "healthy" } else { state.service.state().as_str() },
        "uptime_seconds": state.service.metrics().uptime_seconds(),
        "keys_loaded": state.service.metrics().keys_loaded(),
    });
    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body)).into_response()
}

async fn metrics(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.service.metrics().render(),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Tests (registry without any transport)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use vault_core::{Config, Metrics};
    use vault_keystore::KeyStore;

    const TOKEN: &str = "t-alpha";

    async fn ready_service(dir: &std::path::Path) -> Arc<VaultService> {
        let config = Config {
            tokens: vec![TOKEN.into()],
            key_dir: dir.to_path_buf(),
            fhe_dim: 16,
            ..Config::default()
        };
        let service = Arc::new(VaultService::new(&config, Arc::new(Metrics::new())).unwrap());
        let store = Arc::new(KeyStore::load_or_init(dir, 16, None).unwrap());
        service.install_keys(store).unwrap();
        service.self_test().await.unwrap();
        service.mark_ready();
        service
    }

    fn encrypted_scores_b64(dir: &std::path::Path, entries: &[(u32, u32, f32)]) -> String {
        let raw = vault_keystore::layout::read_artifact(
            &dir.join(vault_keystore::layout::ENC_KEY_FILE),
            vault_keystore::layout::FORMAT_ENC_KEY,
        )
        .unwrap();
        let key = vault_fhe::EncryptionKey::from_bytes(&raw).unwrap();
        BASE64.encode(vault_fhe::encrypt_scores(&key, entries).to_bytes())
    }

    #[tokio::test]
    async fn registry_dispatches_without_a_transport() {
        let dir = tempfile::tempdir().unwrap();
        let service = ready_service(dir.path()).await;
        let registry = ToolRegistry::new(ScoreShape::Structured);

        let result = registry
            .call(service, "get_public_key", json!({ "token": TOKEN }))
            .await
            .unwrap();
        assert_eq!(result["dim"], 16);
        assert!(!result["enc_key"].as_str().unwrap().is_empty());
        assert!(result.get("metadata_key").is_none());
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let service = ready_service(dir.path()).await;
        let registry = ToolRegistry::new(ScoreShape::Structured);
        let err = registry
            .call(service, "export_secret_key", json!({ "token": TOKEN }))
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::InvalidInput);
    }

    #[tokio::test]
    async fn negative_top_k_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let service = ready_service(dir.path()).await;
        let registry = ToolRegistry::new(ScoreShape::Structured);
        let err = registry
            .call(
                service,
                "decrypt_scores",
                json!({ "token": TOKEN, "ciphertext": "", "top_k": -1 }),
            )
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::InvalidInput);
    }

    #[tokio::test]
    async fn score_shape_profile_changes_the_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let service = ready_service(dir.path()).await;
        let ciphertext = encrypted_scores_b64(dir.path(), &[(0, 4, 0.9), (0, 2, 0.1)]);
        let args = json!({ "token": TOKEN, "ciphertext": ciphertext, "top_k": 2 });

        let structured = ToolRegistry::new(ScoreShape::Structured)
            .call(service.clone(), "decrypt_scores", args.clone())
            .await
            .unwrap();
        assert_eq!(structured[0]["shard_idx"], 0);
        assert_eq!(structured[0]["row_idx"], 4);

        let flat = ToolRegistry::new(ScoreShape::Flat)
            .call(service, "decrypt_scores", args)
            .await
            .unwrap();
        assert_eq!(flat[0]["index"], 4);
        assert!(flat[0].get("shard_idx").is_none());
    }

    #[tokio::test]
    async fn listing_names_all_three_tools() {
        let registry = ToolRegistry::new(ScoreShape::Structured);
        let names: Vec<String> = registry
            .list()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["decrypt_metadata", "decrypt_scores", "get_public_key"]);
    }
}
