//! Status results returned by every ledger operation.
//!
//! Business outcomes (missing student, lost write) are values the caller must
//! branch on; the ledger never lets a store fault escape as anything else.
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerFailure {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    WriteConflict(String),
}

impl LedgerFailure {
    /// HTTP-style status code the caller maps to a page outcome.
    pub fn code(&self) -> u16 {
        match self {
            LedgerFailure::NotFound(_) => 404,
            LedgerFailure::WriteConflict(_) => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            LedgerFailure::NotFound(message) | LedgerFailure::WriteConflict(message) => message,
        }
    }
}

pub type StatusResult<T> = Result<T, LedgerFailure>;

/// Render a status result as `{ok, content, code?}` for the HTTP layer.
pub fn status_body<T: Serialize>(result: &StatusResult<T>) -> Value {
    match result {
        Ok(content) => json!({
            "ok": true,
            "content": serde_json::to_value(content).unwrap_or(Value::Null),
        }),
        Err(failure) => json!({
            "ok": false,
            "content": failure.message(),
            "code": failure.code(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_codes() {
        assert_eq!(LedgerFailure::NotFound("x".into()).code(), 404);
        assert_eq!(LedgerFailure::WriteConflict("x".into()).code(), 500);
    }

    #[test]
    fn status_body_shapes() {
        let ok: StatusResult<u32> = Ok(7);
        assert_eq!(status_body(&ok), json!({ "ok": true, "content": 7 }));

        let missing: StatusResult<u32> = Err(LedgerFailure::NotFound("Student 9 not found.".into()));
        assert_eq!(
            status_body(&missing),
            json!({ "ok": false, "content": "Student 9 not found.", "code": 404 })
        );
    }
}
