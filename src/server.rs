use crate::backend::{MockBackend, kind_of};
use crate::protocol::{
    ChatRequest, NewDocumentRequest, STREAM_PROTOCOL_HEADER, STREAM_PROTOCOL_VERSION, ToolInfo,
};
use crate::store::StoredDocument;
use crate::tools::ToolRegistry;
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use std::convert::Infallible;
use std::error::Error;
use std::sync::Arc;
use tracing::info;

pub struct ServerConfig {
    pub listen: String,
}

struct ServerState {
    backend: MockBackend,
    tools: ToolRegistry,
}

type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub async fn run(config: ServerConfig, backend: MockBackend) -> ServerResult<()> {
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("mockstream server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(backend)).await?;
    Ok(())
}

pub fn router(backend: MockBackend) -> axum::Router {
    let state = Arc::new(ServerState {
        backend,
        tools: ToolRegistry::builtin(),
    });

    axum::Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/documents", get(list_documents).post(add_document))
        .route("/api/tools", get(list_tools))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn chat(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let config = state.backend.response_for(&request).await;
    info!(
        response = kind_of(&config),
        attachments = request.attachments.len(),
        "chat request"
    );

    let body = state
        .backend
        .stream(config)
        .map(Ok::<String, Infallible>);

    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        STREAM_PROTOCOL_HEADER,
        HeaderValue::from_static(STREAM_PROTOCOL_VERSION),
    );
    response
}

async fn list_documents(State(state): State<Arc<ServerState>>) -> Json<Vec<StoredDocument>> {
    Json(state.backend.store().list().await)
}

async fn add_document(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<NewDocumentRequest>,
) -> Result<(StatusCode, Json<StoredDocument>), StatusCode> {
    if payload.title.trim().is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let document = state
        .backend
        .store()
        .insert(payload.title, payload.content)
        .await;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn list_tools(State(state): State<Arc<ServerState>>) -> Json<Vec<ToolInfo>> {
    Json(state.tools.list())
}
