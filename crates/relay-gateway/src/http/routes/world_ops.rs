//! The bulk of the HTTP surface: every endpoint that resolves to one
//! round-trip through Component F against a connected world (spec.md
//! §6). Each handler does the minimum the spec assigns it — pull
//! `clientId` and whatever else identifies the operation, run the
//! script filter where §4.H names it, and delegate to
//! [`run_operation`]. The forwarding-lookup layer has already
//! short-circuited any request this replica doesn't own, so a handler
//! never needs to consult Component F's routing decision itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Extension;
use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use relay_core::{Credential, RelayError, RelayResult, ReplyKind, WorldId};
use serde_json::{Value, json};

use crate::http::error::ApiError;
use crate::http::state::AppState;
use crate::pending::SecondaryKey;
use crate::script_filter;

fn query_to_value(params: HashMap<String, String>) -> Value {
    Value::Object(params.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

fn world_id_from_value(payload: &Value) -> Option<WorldId> {
    payload.get("clientId").and_then(Value::as_str).map(WorldId::from)
}

fn without_client_id(mut payload: Value) -> Value {
    if let Value::Object(ref mut map) = payload {
        map.remove("clientId");
    }
    payload
}

/// Unifies the `selected` flag to a JSON boolean regardless of
/// whether the caller sent `true`/`false` or the string `"true"`
/// (SPEC_FULL.md §9 Open Question 4).
fn normalize_selected(payload: &mut Value) {
    let Value::Object(map) = payload else { return };
    if let Some(Value::String(s)) = map.get("selected") {
        let flag = s.eq_ignore_ascii_case("true");
        map.insert("selected".to_string(), Value::Bool(flag));
    }
}

/// Runs one operation and wraps its reply, branching on whether the
/// world itself reported failure (spec.md §4.D: a reply carrying a
/// non-empty `error` surfaces as HTTP 400 with the error and
/// correlation metadata, never as a 200). `success_status` is the code
/// to use when the reply carries no error — 201 for `/create`, 200
/// everywhere else.
async fn run_operation(
    state: &AppState,
    credential: Credential,
    kind: ReplyKind,
    payload: Value,
    secondary_key: Option<SecondaryKey>,
    deadline: Duration,
    success_status: StatusCode,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Some(world_id) = world_id_from_value(&payload) else {
        return Err(ApiError(RelayError::InvalidInput {
            message: "clientId is required".to_string(),
            how_to_use: Some("pass ?clientId=<worldId> or include \"clientId\" in the request body".to_string()),
        }));
    };
    let operation_payload = without_client_id(payload);
    let reply =
        state.router.dispatch_local(&world_id, &credential, kind, operation_payload, secondary_key, deadline).await?;

    let request_id = reply.request_id.as_ref().map(relay_core::CorrelationId::as_str);
    if let Some(error) = reply.error_message() {
        let body = json!({"error": error, "requestId": request_id, "clientId": world_id.as_str()});
        return Ok((StatusCode::BAD_REQUEST, Json(body)));
    }

    let mut body = reply.payload;
    if let Value::Object(ref mut map) = body {
        map.insert("requestId".to_string(), json!(request_id));
        map.insert("clientId".to_string(), json!(world_id.as_str()));
    }
    Ok((success_status, Json(body)))
}

fn check_macro_script(body: &Value) -> RelayResult<()> {
    if let Some(command) = body.get("command").and_then(Value::as_str) {
        script_filter::check(command)?;
    }
    Ok(())
}

// --- Reads ---

pub async fn search(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    run_operation(&state, credential, ReplyKind::Search, query_to_value(params), None, state.deadlines.default_deadline(), StatusCode::OK)
        .await
}

pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    run_operation(&state, credential, ReplyKind::Entity, query_to_value(params), None, state.deadlines.default_deadline(), StatusCode::OK)
        .await
}

pub async fn structure(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    run_operation(&state, credential, ReplyKind::Structure, query_to_value(params), None, state.deadlines.default_deadline(), StatusCode::OK)
        .await
}

pub async fn contents(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut payload = query_to_value(params);
    if let Value::Object(ref mut map) = payload {
        map.insert("path".to_string(), json!(path));
    }
    run_operation(&state, credential, ReplyKind::Contents, payload, None, state.deadlines.default_deadline(), StatusCode::OK).await
}

// --- Mutations ---

pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    check_macro_script(&body)?;
    run_operation(&state, credential, ReplyKind::Create, body, None, state.deadlines.default_deadline(), StatusCode::CREATED).await
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    check_macro_script(&body)?;
    run_operation(&state, credential, ReplyKind::Update, body, None, state.deadlines.default_deadline(), StatusCode::OK).await
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    run_operation(&state, credential, ReplyKind::Delete, body, None, state.deadlines.default_deadline(), StatusCode::OK).await
}

// --- Dice ---

pub async fn rolls(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    run_operation(&state, credential, ReplyKind::Rolls, query_to_value(params), None, state.deadlines.quick(), StatusCode::OK).await
}

pub async fn lastroll(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    run_operation(&state, credential, ReplyKind::Lastroll, query_to_value(params), None, state.deadlines.quick(), StatusCode::OK).await
}

pub async fn roll_get(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    run_operation(&state, credential, ReplyKind::Roll, query_to_value(params), None, state.deadlines.quick(), StatusCode::OK).await
}

pub async fn roll_post(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    run_operation(&state, credential, ReplyKind::Roll, body, None, state.deadlines.quick(), StatusCode::OK).await
}

// --- Sheet ---

/// Renders an entity sheet. An `Accept: text/html` caller gets a thin
/// HTML shell around the same data a JSON caller gets; asset URLs
/// inside either representation are expected to route back through
/// `/proxy-asset/*` (spec.md §6), left to the world's own rendering —
/// this handler does not rewrite them.
pub async fn sheet(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    headers: axum::http::HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<axum::response::Response, ApiError> {
    use axum::response::IntoResponse;

    let wants_html =
        headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()).is_some_and(|v| v.contains("text/html"));
    let (_, Json(body)) =
        run_operation(&state, credential, ReplyKind::ActorSheet, query_to_value(params), None, state.deadlines.default_deadline(), StatusCode::OK)
            .await?;

    if wants_html {
        let html = format!(
            "<!doctype html><html><head><meta charset=\"utf-8\"></head><body><pre>{}</pre></body></html>",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );
        Ok(([(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response())
    } else {
        Ok(Json(body).into_response())
    }
}

// --- Macros ---

pub async fn macros(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    run_operation(&state, credential, ReplyKind::Macros, query_to_value(params), None, state.deadlines.default_deadline(), StatusCode::OK)
        .await
}

pub async fn macro_execute(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path(uuid): Path<String>,
    Json(mut body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if let Some(script) = body.get("command").and_then(Value::as_str) {
        script_filter::check(script)?;
    }
    if let Value::Object(ref mut map) = body {
        map.insert("uuid".to_string(), json!(uuid));
    }
    run_operation(&state, credential, ReplyKind::MacroExecute, body, Some(("uuid".to_string(), uuid)), state.deadlines.macros(), StatusCode::OK)
        .await
}

// --- Combat ---

macro_rules! combat_post_endpoint {
    ($name:ident, $kind:expr) => {
        pub async fn $name(
            State(state): State<Arc<AppState>>,
            Extension(credential): Extension<Credential>,
            Json(body): Json<Value>,
        ) -> Result<(StatusCode, Json<Value>), ApiError> {
            run_operation(&state, credential, $kind, body, None, state.deadlines.default_deadline(), StatusCode::OK).await
        }
    };
}

pub async fn encounters(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    run_operation(&state, credential, ReplyKind::Encounters, query_to_value(params), None, state.deadlines.default_deadline(), StatusCode::OK)
        .await
}

combat_post_endpoint!(start_encounter, ReplyKind::StartEncounter);
combat_post_endpoint!(next_turn, ReplyKind::NextTurn);
combat_post_endpoint!(next_round, ReplyKind::NextRound);
combat_post_endpoint!(last_turn, ReplyKind::LastTurn);
combat_post_endpoint!(last_round, ReplyKind::LastRound);
combat_post_endpoint!(end_encounter, ReplyKind::EndEncounter);
combat_post_endpoint!(add_to_encounter, ReplyKind::AddToEncounter);
combat_post_endpoint!(remove_from_encounter, ReplyKind::RemoveFromEncounter);

// --- Entity mutations & selection ---

combat_post_endpoint!(kill, ReplyKind::Kill);
combat_post_endpoint!(increase, ReplyKind::Increase);
combat_post_endpoint!(decrease, ReplyKind::Decrease);
combat_post_endpoint!(give, ReplyKind::Give);

pub async fn select(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Json(mut body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    normalize_selected(&mut body);
    run_operation(&state, credential, ReplyKind::Select, body, None, state.deadlines.default_deadline(), StatusCode::OK).await
}

pub async fn selected(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut payload = query_to_value(params);
    normalize_selected(&mut payload);
    run_operation(&state, credential, ReplyKind::Selected, payload, None, state.deadlines.default_deadline(), StatusCode::OK).await
}

// --- File system & scripting ---

pub async fn file_system(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    run_operation(&state, credential, ReplyKind::FileSystem, query_to_value(params), None, state.deadlines.file_system(), StatusCode::OK)
        .await
}

/// `.js`-only allow-list applied to an uploaded filename, alongside
/// the path-containment check every upload goes through (spec.md §5).
fn validate_upload_filename(filename: &str) -> RelayResult<()> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(RelayError::InvalidInput {
            message: "filename must not contain path separators".to_string(),
            how_to_use: None,
        });
    }
    if !filename.to_ascii_lowercase().ends_with(".js") {
        return Err(RelayError::InvalidInput {
            message: "only .js files may be uploaded to the script store".to_string(),
            how_to_use: Some("rename the file with a .js extension".to_string()),
        });
    }
    Ok(())
}

struct UploadPayload {
    client_id: String,
    filename: String,
    bytes: Vec<u8>,
}

async fn collect_multipart_upload(mut multipart: Multipart) -> RelayResult<UploadPayload> {
    let mut client_id = None;
    let mut filename = None;
    let mut bytes = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| RelayError::InvalidInput {
        message: format!("malformed multipart body: {e}"),
        how_to_use: None,
    })? {
        match field.name().unwrap_or_default() {
            "clientId" => {
                client_id = Some(field.text().await.unwrap_or_default());
            },
            "file" => {
                filename = field.file_name().map(str::to_string);
                bytes = Some(field.bytes().await.map_err(|e| RelayError::Internal(anyhow::anyhow!(e)))?.to_vec());
            },
            _ => {},
        }
    }

    Ok(UploadPayload {
        client_id: client_id.ok_or(RelayError::InvalidInput { message: "clientId is required".to_string(), how_to_use: None })?,
        filename: filename
            .ok_or(RelayError::InvalidInput { message: "file field is required".to_string(), how_to_use: None })?,
        bytes: bytes.ok_or(RelayError::InvalidInput { message: "file field is required".to_string(), how_to_use: None })?,
    })
}

/// `multipart/form-data` upload: a `clientId` field plus a `file`
/// field (SPEC_FULL.md §9 Open Question 2). Funnels into the world's
/// `upload-file` operation as a base64 string — the relay itself never
/// writes the upload to disk; the world does.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let upload = collect_multipart_upload(multipart).await?;
    validate_upload_filename(&upload.filename)?;
    let payload = json!({
        "clientId": upload.client_id,
        "filename": upload.filename,
        "base64": BASE64.encode(&upload.bytes),
    });
    run_operation(&state, credential, ReplyKind::UploadFile, payload, None, state.deadlines.upload(), StatusCode::OK).await
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    run_operation(&state, credential, ReplyKind::DownloadFile, query_to_value(params), None, state.deadlines.download(), StatusCode::OK)
        .await
}

pub async fn execute_js(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let script = body.get("script").and_then(Value::as_str).ok_or(RelayError::InvalidInput {
        message: "script is required".to_string(),
        how_to_use: None,
    })?;
    script_filter::check(script)?;
    run_operation(&state, credential, ReplyKind::ExecuteJs, body, None, state.deadlines.execute_js(), StatusCode::OK).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_client_id_strips_only_that_key() {
        let payload = json!({"clientId": "w1", "query": "goblin"});
        let stripped = without_client_id(payload);
        assert!(stripped.get("clientId").is_none());
        assert_eq!(stripped["query"], "goblin");
    }

    #[test]
    fn normalize_selected_converts_string_true() {
        let mut payload = json!({"selected": "true"});
        normalize_selected(&mut payload);
        assert_eq!(payload["selected"], json!(true));
    }

    #[test]
    fn normalize_selected_leaves_bool_untouched() {
        let mut payload = json!({"selected": false});
        normalize_selected(&mut payload);
        assert_eq!(payload["selected"], json!(false));
    }

    #[test]
    fn validate_upload_filename_rejects_non_js() {
        assert!(validate_upload_filename("evil.exe").is_err());
        assert!(validate_upload_filename("ok.js").is_ok());
    }

    #[test]
    fn validate_upload_filename_rejects_path_traversal() {
        assert!(validate_upload_filename("../../etc/passwd.js").is_err());
    }

    #[test]
    fn check_macro_script_rejects_forbidden_command() {
        let body = json!({"command": "eval('1')"});
        assert!(check_macro_script(&body).is_err());
    }

    #[test]
    fn check_macro_script_allows_missing_command() {
        let body = json!({"name": "whatever"});
        assert!(check_macro_script(&body).is_ok());
    }
}
