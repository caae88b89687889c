//! Error types for bql-core.
//!
//! Only lexing and parsing can fail here; execution errors live in the server crate.

use thiserror::Error;

/// BQL error type. Every variant carries the 1-based source line it was raised on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BqlError {
    #[error("line[{line}]: Parsing error: {message}")]
    Lex { line: usize, message: String },

    #[error("line[{line}]: {message}")]
    Parse { line: usize, message: String },
}

impl BqlError {
    pub fn line(&self) -> usize {
        match self {
            BqlError::Lex { line, .. } | BqlError::Parse { line, .. } => *line,
        }
    }
}

/// Result type for BQL operations
pub type BqlResult<T> = Result<T, BqlError>;

impl serde::Serialize for BqlError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BqlError::Parse {
            line: 3,
            message: "expected path in database.newdir; got ';'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "line[3]: expected path in database.newdir; got ';'"
        );

        let err = BqlError::Lex {
            line: 1,
            message: "unclosed comment".to_string(),
        };
        assert_eq!(err.to_string(), "line[1]: Parsing error: unclosed comment");
        assert_eq!(err.line(), 1);
    }

    #[test]
    fn test_serialize_as_string() {
        let err = BqlError::Parse {
            line: 2,
            message: "no command".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"line[2]: no command\"");
    }
}
