use axum::{
    body::Bytes,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Form, Json,
};
use bql_core::{AccessLayer, Action, Command};
use serde::Deserialize;

use crate::error::{DbError, DbResult};
use crate::pool::WorkerPool;
use crate::router::{ok_envelope, Reply};

#[derive(Clone, Debug)]
pub struct AppState {
    pub pool: WorkerPool,
}

// ==================== Request Types ====================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScriptForm {
    pub token: String,
    pub query: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Form shared by upload-ticket and download requests.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileForm {
    pub token: String,
    pub database: String,
    pub path: String,
}

fn require(fields: &[&str]) -> DbResult<()> {
    if fields.iter().any(|field| field.is_empty()) {
        return Err(DbError::InvalidRequest("Missing parameters".to_string()));
    }
    Ok(())
}

fn reply_response(reply: Reply) -> Response {
    match reply {
        Reply::Data(data) => Json(ok_envelope(data)).into_response(),
        Reply::Bytes { data, mime } => ([(header::CONTENT_TYPE, mime)], data).into_response(),
    }
}

// ==================== Handlers ====================

pub async fn run_script(
    State(state): State<AppState>,
    Form(form): Form<ScriptForm>,
) -> Result<Json<serde_json::Value>, DbError> {
    require(&[&form.token, &form.query])?;
    let data = state.pool.run_script(&form.token, &form.query).await?;
    Ok(Json(ok_envelope(data)))
}

pub async fn get_token(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, DbError> {
    require(&[&form.username, &form.password])?;
    let cmd = Command::new(
        "login",
        Action::Login {
            username: form.username,
            password: form.password,
            duration: None,
        },
    );
    let reply = state.pool.run_command("", cmd).await?;
    Ok(reply_response(reply))
}

pub async fn get_upload_ticket(
    State(state): State<AppState>,
    Form(form): Form<FileForm>,
) -> Result<Response, DbError> {
    require(&[&form.token, &form.database, &form.path])?;
    let cmd = Command::new(
        "uploadticket",
        Action::UploadTicket {
            path: form.path,
            duration: None,
        },
    )
    .with_database(form.database);
    let reply = state.pool.run_command(&form.token, cmd).await?;
    Ok(reply_response(reply))
}

/// Stores the request body as the attachment of the file the ticket names.
pub async fn upload_file(
    State(state): State<AppState>,
    Path(ticket): Path<String>,
    body: Bytes,
) -> Result<Response, DbError> {
    let cmd = Command::new(
        "writebytes",
        Action::WriteBytes {
            ticket,
            data: body.to_vec(),
        },
    );
    let reply = state.pool.run_command("", cmd).await?;
    Ok(reply_response(reply))
}

pub async fn download_file(
    State(state): State<AppState>,
    Form(form): Form<FileForm>,
) -> Result<Response, DbError> {
    require(&[&form.token, &form.database, &form.path])?;
    let cmd = Command::new("readbytes", Action::ReadBytes { path: form.path })
        .with_database(form.database);
    let reply = state.pool.run_command(&form.token, cmd).await?;
    Ok(reply_response(reply))
}

/// Anonymous read of a public file: `json` returns its content, `bytes`
/// its attachment.
pub async fn direct_access(
    State(state): State<AppState>,
    Path((layer, database, path)): Path<(String, String, String)>,
) -> Result<Response, DbError> {
    let layer = AccessLayer::parse(&layer)
        .ok_or_else(|| DbError::InvalidRequest(format!("invalid access layer '{}'", layer)))?;
    let cmd = Command::new(
        "directaccess",
        Action::DirectAccess {
            database,
            path: format!("/{}", path),
            layer,
        },
    );
    let reply = state.pool.run_command("", cmd).await?;
    Ok(reply_response(reply))
}
