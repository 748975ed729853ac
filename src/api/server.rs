//! API Server Module
//!
//! This module implements a JSON-RPC server exposing the batch registry.
//! Every registry operation is one RPC method, named as the ledger
//! transaction it corresponds to.

use crate::{
    NewBatch, RegistryError,
    config::ApiConfig,
    query::Selector,
    registry::BatchRegistry,
    state::WorldState,
};
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

/// Shared application state that is accessible across all request handlers
///
/// The registry itself is stateless; cloning it only clones the handle to
/// the world state store.
#[derive(Clone)]
pub struct AppState<S> {
    registry: BatchRegistry<S>,
}

/// The main API server struct
///
/// Encapsulates the listener configuration and the registry it serves.
pub struct Server<S> {
    config: ApiConfig,
    state: AppState<S>,
}

impl<S: WorldState> Server<S> {
    /// Creates a new API server instance
    ///
    /// # Arguments
    /// * `config` - Listener configuration (host, port)
    /// * `registry` - The registry every RPC method is dispatched to
    pub fn new(config: ApiConfig, registry: BatchRegistry<S>) -> Self {
        Self {
            config,
            state: AppState { registry },
        }
    }

    /// Build the HTTP router
    ///
    /// - `POST /` accepts JSON-RPC 2.0 requests
    /// - `GET /health` reports liveness
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", post(handle_rpc::<S>))
            .route("/health", get(health))
            .with_state(self.state.clone())
    }

    /// Starts the API server and begins listening for incoming requests
    ///
    /// # Returns
    /// `Ok(())` when the server shuts down, or an error if binding fails
    pub async fn start(self) -> anyhow::Result<()> {
        let app = self.router();

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// JSON-RPC 2.0 request structure
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    id: Value,
}

/// JSON-RPC 2.0 response structure
///
/// Either `result` or `error` is populated, never both.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Value,
}

/// JSON-RPC error object
///
/// - `code`: `-326xx` for protocol errors, `-3200x` for registry errors
/// - `message`: Human-readable error description
/// - `data`: `{"kind": ...}` naming the registry error kind, when there is one
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self { code: -32600, message: message.into(), data: None }
    }

    fn method_not_found(method: &str) -> Self {
        Self { code: -32601, message: format!("Method not found: {}", method), data: None }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self { code: -32602, message: format!("Invalid params: {}", message.into()), data: None }
    }
}

impl From<RegistryError> for JsonRpcError {
    fn from(err: RegistryError) -> Self {
        let code = match err {
            RegistryError::AlreadyExists(_) => -32001,
            RegistryError::NotFound(_) => -32002,
            RegistryError::Serialization(_) => -32003,
            RegistryError::Storage(_) => -32004,
            RegistryError::Query(_) => -32005,
        };
        Self {
            code,
            message: err.to_string(),
            data: Some(json!({ "kind": err.kind() })),
        }
    }
}

type RpcResult = Result<Value, JsonRpcError>;

/// Liveness probe
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Main RPC request handler
///
/// Routes the request to the registry operation named by `method` and wraps
/// the outcome in a JSON-RPC response.
async fn handle_rpc<S: WorldState>(
    State(state): State<AppState<S>>,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    info!("Received RPC request: {}", request.method);

    let outcome = if request.jsonrpc != "2.0" {
        Err(JsonRpcError::invalid_request("jsonrpc must be \"2.0\""))
    } else {
        dispatch(&state.registry, &request.method, request.params).await
    };

    let response = match outcome {
        Ok(result) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id: request.id,
        },
        Err(error) => {
            warn!("RPC {} failed: {}", request.method, error.message);
            JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: None,
                error: Some(error),
                id: request.id,
            }
        }
    };

    Json(response)
}

async fn dispatch<S: WorldState>(registry: &BatchRegistry<S>, method: &str, params: Value) -> RpcResult {
    match method {
        "InitLedger" => {
            registry.init_ledger().await?;
            Ok(Value::Null)
        }
        "CreateBatch" => {
            let new_batch = create_batch_params(params)?;
            registry.create_batch(new_batch).await?;
            Ok(Value::Null)
        }
        "BatchExists" => {
            let [id] = string_args(&params, ["id"])?;
            Ok(Value::Bool(registry.batch_exists(&id).await?))
        }
        "ReadBatch" => {
            let [id] = string_args(&params, ["id"])?;
            to_result(registry.read_batch(&id).await?)
        }
        "AddAttachmentRef" => {
            let [id, attachment_ref] = string_args(&params, ["id", "attachmentRef"])?;
            registry.add_attachment_ref(&id, &attachment_ref).await?;
            Ok(Value::Null)
        }
        "QueryBatchesByActor" => {
            let [actor_id] = string_args(&params, ["actorId"])?;
            to_result(registry.query_batches_by_actor(&actor_id).await?)
        }
        "QueryBatchesByProductCategory" => {
            let [category] = string_args(&params, ["productCategory"])?;
            to_result(registry.query_batches_by_product_category(&category).await?)
        }
        "QueryBatches" => {
            if params.is_object() && !params["selector"].is_string() {
                // Structured form: the params object is the query itself
                let selector = Selector::from_value(&params)
                    .map_err(|e| RegistryError::Query(e.to_string()))?;
                to_result(registry.query_batches_with(&selector).await?)
            } else {
                let [selector] = string_args(&params, ["selector"])?;
                to_result(registry.query_batches(&selector).await?)
            }
        }
        other => Err(JsonRpcError::method_not_found(other)),
    }
}

/// Decode `CreateBatch` params
///
/// Positional form: nine strings, the last two being encoded lists.
/// Named form: a `NewBatch` object with optional list arrays.
fn create_batch_params(params: Value) -> Result<NewBatch, JsonRpcError> {
    if params.is_array() {
        let [id, batch_id, actor_id, step, product_name, product_category, timestamp, parents, attachments] =
            string_args(
                &params,
                [
                    "id",
                    "batchId",
                    "actorId",
                    "step",
                    "productName",
                    "productCategory",
                    "timestamp",
                    "parentBatches",
                    "attachmentRefs",
                ],
            )?;
        Ok(NewBatch::from_encoded(
            &id,
            &batch_id,
            &actor_id,
            &step,
            &product_name,
            &product_category,
            &timestamp,
            &parents,
            &attachments,
        )?)
    } else if params.is_object() {
        serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
    } else {
        Err(JsonRpcError::invalid_params("expected an array or object"))
    }
}

/// Extract string arguments given positionally or by name
fn string_args<const N: usize>(params: &Value, names: [&str; N]) -> Result<[String; N], JsonRpcError> {
    let values: Vec<&Value> = match params {
        Value::Array(items) if items.len() == N => items.iter().collect(),
        Value::Array(items) => {
            return Err(JsonRpcError::invalid_params(format!(
                "expected {} arguments, got {}",
                N,
                items.len()
            )));
        }
        Value::Object(obj) => names
            .iter()
            .map(|name| {
                obj.get(*name)
                    .ok_or_else(|| JsonRpcError::invalid_params(format!("missing field {}", name)))
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(JsonRpcError::invalid_params("expected an array or object")),
    };

    let mut out: [String; N] = std::array::from_fn(|_| String::new());
    for (slot, (value, name)) in out.iter_mut().zip(values.into_iter().zip(names)) {
        *slot = value
            .as_str()
            .ok_or_else(|| JsonRpcError::invalid_params(format!("{} must be a string", name)))?
            .to_string();
    }
    Ok(out)
}

fn to_result<T: Serialize>(value: T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| RegistryError::Serialization(e.to_string()).into())
}
