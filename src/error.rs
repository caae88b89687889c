use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bql_core::BqlError;
use thiserror::Error;

/// Errors surfaced by the engine. Each variant renders as the exact message
/// placed in the `msg` field of an error envelope.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("{message}")]
    Parse { line: usize, message: String },

    #[error("User not authorized to execute command")]
    Unauthorized,

    #[error("Authorization required")]
    AuthRequired,

    #[error("Command '{0}' not found")]
    CommandNotFound(String),

    #[error("Filter '{0}' not found")]
    FilterNotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Backend(String),

    #[error("{0}")]
    Ticket(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    InvalidRequest(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    pub fn validation(message: impl Into<String>) -> Self {
        DbError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        DbError::NotFound(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        DbError::Backend(message.into())
    }

    /// Source line of a parse error.
    pub fn line(&self) -> Option<usize> {
        match self {
            DbError::Parse { line, .. } => Some(*line),
            _ => None,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            DbError::Parse { .. } | DbError::Validation(_) | DbError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            DbError::AuthRequired | DbError::Auth(_) | DbError::Ticket(_) => {
                StatusCode::UNAUTHORIZED
            }
            DbError::Unauthorized => StatusCode::FORBIDDEN,
            DbError::CommandNotFound(_) | DbError::FilterNotFound(_) | DbError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            DbError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<BqlError> for DbError {
    fn from(err: BqlError) -> Self {
        DbError::Parse {
            line: err.line(),
            message: format!("script parse error:\n{}", err),
        }
    }
}

impl From<rocksdb::Error> for DbError {
    fn from(err: rocksdb::Error) -> Self {
        DbError::Backend(err.into())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Backend(format!("JSON error: {}", err))
    }
}

impl From<regex::Error> for DbError {
    fn from(err: regex::Error) -> Self {
        DbError::Validation(format!("invalid regex: {}", err))
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::Backend(format!("IO error: {}", err))
    }
}

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = serde_json::json!({
            "status": "error",
            "msg": self.to_string(),
        });
        if let Some(line) = self.line() {
            body["line"] = serde_json::json!(line);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DbError::CommandNotFound("database.format".to_string()).to_string(),
            "Command 'database.format' not found"
        );
        assert_eq!(
            DbError::FilterNotFound("ugly".to_string()).to_string(),
            "Filter 'ugly' not found"
        );
        assert_eq!(
            DbError::Unauthorized.to_string(),
            "User not authorized to execute command"
        );
        assert_eq!(DbError::AuthRequired.to_string(), "Authorization required");
        assert_eq!(
            DbError::validation("root directory already exists").to_string(),
            "root directory already exists"
        );
    }

    #[test]
    fn test_parse_error_keeps_line() {
        let err: DbError = BqlError::Parse {
            line: 4,
            message: "expected path in database.newdir".to_string(),
        }
        .into();
        assert_eq!(err.line(), Some(4));
        assert!(err.to_string().starts_with("script parse error:\nline[4]:"));
    }

    #[test]
    fn test_serialize_as_message() {
        let err = DbError::Ticket("Invalid ticket".to_string());
        assert_eq!(serde_json::to_string(&err).unwrap(), "\"Invalid ticket\"");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(DbError::Unauthorized.status(), StatusCode::FORBIDDEN);
        assert_eq!(DbError::AuthRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            DbError::not_found("x").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DbError::backend("disk full").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
