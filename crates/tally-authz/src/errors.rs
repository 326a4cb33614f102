use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    #[error("invalid permission format: '{0}'")]
    MalformedPermission(String),
}

pub type AuthzResult<T> = Result<T, AuthzError>;
