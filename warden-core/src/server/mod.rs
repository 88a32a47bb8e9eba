//! In-sandbox action execution server.
//!
//! Runs inside the sandbox boundary when the runtime can only reach it over
//! the network. One endpoint executes actions; file CRUD endpoints mirror
//! the runtime primitives for auxiliary tooling (file browsers, debuggers).
//!
//! Error contract: `POST /execute_action` answers HTTP 200 even when the
//! action fails — the failure is encoded in the observation body. Non-200
//! responses are reserved for transport-level problems (bad auth, malformed
//! request), so callers can tell "action failed cleanly" from "the channel
//! is broken".

pub mod client;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as UrlPath, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::RuntimeConfig;
use crate::events::observation::CommandOutcome;
use crate::events::{Action, FileEntry, Observation};
use crate::runtime::slice_lines;
use crate::shell::ShellSession;
use crate::utils::path::resolve_path;
use crate::workspace::WorkspaceFs;

pub use client::ExecutionClient;

pub const API_KEY_HEADER: &str = "X-Session-API-Key";

/// Shared state: the shell session and workspace are explicit fields owned
/// by the server, constructed once at startup — no process-global mutable
/// session, so several sandboxes can coexist in one host process.
#[derive(Clone)]
pub struct ServerState {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    shell: Arc<ShellSession>,
    workspace: WorkspaceFs,
    api_key: Option<String>,
    default_timeout: Duration,
}

impl ServerState {
    pub fn new(config: &RuntimeConfig, api_key: Option<String>) -> Self {
        let workspace = WorkspaceFs::new(
            config.workspace_dir.clone(),
            config.max_file_size,
            config.allowed_extensions.clone(),
        );
        let shell = Arc::new(ShellSession::new(
            config.shell.clone(),
            config.workspace_dir.clone(),
        ));
        Self {
            inner: Arc::new(ServerInner {
                shell,
                workspace,
                api_key,
                default_timeout: Duration::from_secs(config.timeout_secs),
            }),
        }
    }

    /// Prepare the workspace and bring up the shell session.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.inner.workspace.ensure_root().await?;
        let shell = self.inner.shell.clone();
        tokio::task::spawn_blocking(move || shell.start()).await??;
        info!(workspace = %self.inner.workspace.root().display(), "execution server ready");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.inner.shell.stop();
    }
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    action: Action,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_list_path")]
    path: String,
}

fn default_list_path() -> String {
    String::from(".")
}

#[derive(Debug, Serialize, Deserialize)]
struct FileBody {
    content: String,
    #[serde(default = "default_encoding")]
    encoding: String,
}

fn default_encoding() -> String {
    String::from("utf-8")
}

/// Transport-level failure for the auxiliary file endpoints.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Build the HTTP application. `/health` stays outside the auth layer so
/// liveness probes work without the key.
pub fn router(state: ServerState) -> Router {
    let protected = Router::new()
        .route("/execute_action", axum::routing::post(execute_action))
        .route("/files", get(list_files))
        .route(
            "/file/{*path}",
            get(read_file).post(write_file).delete(delete_file),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: ServerState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    state.start().await?;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "execution server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn require_api_key(
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.inner.api_key {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected.as_str()) {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "Invalid API Key" })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn health(State(state): State<ServerState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "workspace_dir": state.inner.workspace.root().display().to_string(),
        "shell_running": state.inner.shell.is_running(),
    }))
}

/// Always HTTP 200: every handled failure is an error observation.
async fn execute_action(
    State(state): State<ServerState>,
    Json(request): Json<ActionRequest>,
) -> Json<Observation> {
    let observation = dispatch_action(&state, request.action).await;
    if !observation.success() {
        error!(
            observation_type = observation.observation_type(),
            content = observation.content(),
            "action failed"
        );
    }
    Json(observation)
}

async fn dispatch_action(state: &ServerState, action: Action) -> Observation {
    let inner = &state.inner;
    match action {
        Action::Run {
            command,
            working_dir,
            timeout_secs,
            background,
        } => {
            if background {
                run_in_shell(
                    state,
                    format!("nohup sh -c {} >/dev/null 2>&1 & echo $!", shell_quote(&command)),
                    command,
                    inner.default_timeout,
                )
                .await
            } else {
                // An explicit working_dir runs in a subshell so the session's
                // own cwd state is untouched.
                let line = match working_dir.as_deref() {
                    Some(dir) => match resolve_path(inner.workspace.root(), dir) {
                        Ok(resolved) => format!(
                            "( cd {} && {} )",
                            shell_quote(&resolved.display().to_string()),
                            command
                        ),
                        Err(err) => return Observation::error(err.to_string()),
                    },
                    None => command.clone(),
                };
                let timeout = timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(inner.default_timeout);
                run_in_shell(state, line, command, timeout).await
            }
        }
        Action::Write { path, content } => {
            match inner.workspace.write(&path, content.as_bytes()).await {
                Ok(size) => Observation::file_written(path, size),
                Err(err) => Observation::error(err.to_string()),
            }
        }
        Action::Read {
            path,
            start_line,
            end_line,
        } => match inner.workspace.read_text(&path, None, None).await {
            Ok(content) => {
                Observation::file_read(path, slice_lines(&content, start_line, end_line))
            }
            Err(err) => Observation::error(err.to_string()),
        },
        Action::Edit {
            path,
            old_str,
            new_str,
        } => match inner.workspace.edit(&path, &old_str, &new_str).await {
            Ok(()) => Observation::file_edited(path),
            Err(err) => Observation::error(err.to_string()),
        },
        Action::Delete { path } => match inner.workspace.delete(&path).await {
            Ok(()) => Observation::success_message(format!("Deleted {path}")),
            Err(err) => Observation::error(err.to_string()),
        },
        Action::CreateDirectory { path } => match inner.workspace.create_dir(&path).await {
            Ok(()) => Observation::success_message(format!("Created directory {path}")),
            Err(err) => Observation::error(err.to_string()),
        },
        Action::Search {
            query,
            path,
            file_pattern,
            case_sensitive,
        } => {
            match inner
                .workspace
                .search(&query, path.as_deref(), file_pattern.as_deref(), case_sensitive)
                .await
            {
                Ok(matches) => Observation::search_result(query, matches),
                Err(err) => Observation::error(err.to_string()),
            }
        }
        Action::Kill { process_id } => {
            run_in_shell(
                state,
                format!("kill -9 {process_id}"),
                format!("kill -9 {process_id}"),
                inner.default_timeout,
            )
            .await
        }
    }
}

/// Execute a line in the persistent shell on the blocking pool.
async fn run_in_shell(
    state: &ServerState,
    line: String,
    display_command: String,
    timeout: Duration,
) -> Observation {
    let shell = state.inner.shell.clone();
    let started = std::time::Instant::now();
    let result =
        tokio::task::spawn_blocking(move || shell.execute(&line, timeout)).await;
    match result {
        Ok(Ok((exit_code, output))) => CommandOutcome {
            command: display_command,
            exit_code,
            stdout: output,
            stderr: String::new(),
            working_dir: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .into(),
        Ok(Err(err)) => Observation::error(err.to_string()),
        Err(join_err) => Observation::error(format!("shell task failed: {join_err}")),
    }
}

fn shell_quote(text: &str) -> String {
    shell_escape::escape(std::borrow::Cow::Borrowed(text)).into_owned()
}

#[derive(Debug, Serialize)]
struct FileListResponse {
    files: Vec<FileEntry>,
}

async fn list_files(
    State(state): State<ServerState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<FileListResponse>, ApiError> {
    let files = state
        .inner
        .workspace
        .list(&query.path)
        .await
        .map_err(|err| ApiError::not_found(err.to_string()))?;
    Ok(Json(FileListResponse { files }))
}

async fn read_file(
    State(state): State<ServerState>,
    UrlPath(path): UrlPath<String>,
) -> Result<Json<FileBody>, ApiError> {
    let bytes = state
        .inner
        .workspace
        .read_bytes(&path)
        .await
        .map_err(|err| {
            let message = err.to_string();
            if message.contains("directory") {
                ApiError::bad_request(message)
            } else {
                ApiError::not_found(message)
            }
        })?;

    // UTF-8 content travels as a plain JSON string; anything else is
    // base64-encoded with an explicit marker.
    match String::from_utf8(bytes) {
        Ok(content) => Ok(Json(FileBody {
            content,
            encoding: default_encoding(),
        })),
        Err(err) => Ok(Json(FileBody {
            content: base64::engine::general_purpose::STANDARD.encode(err.as_bytes()),
            encoding: String::from("base64"),
        })),
    }
}

async fn write_file(
    State(state): State<ServerState>,
    UrlPath(path): UrlPath<String>,
    Json(body): Json<FileBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let bytes = match body.encoding.as_str() {
        "base64" => base64::engine::general_purpose::STANDARD
            .decode(body.content.as_bytes())
            .map_err(|err| ApiError::bad_request(format!("invalid base64 content: {err}")))?,
        "utf-8" => body.content.into_bytes(),
        other => {
            return Err(ApiError::bad_request(format!(
                "unsupported encoding: {other}"
            )))
        }
    };
    state
        .inner
        .workspace
        .write(&path, &bytes)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(json!({ "success": true, "path": path })))
}

async fn delete_file(
    State(state): State<ServerState>,
    UrlPath(path): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .inner
        .workspace
        .delete(&path)
        .await
        .map_err(|err| ApiError::not_found(err.to_string()))?;
    Ok(Json(json!({ "success": true, "path": path })))
}
