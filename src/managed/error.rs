use super::types::ManagedHandle;
use thiserror::Error;

/// Failures at the managed boundary. Public entry points log these and fall back to an empty result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("managed runtime is not ready")]
    NotReady,
    #[error("class '{0}' not found in the loaded assembly")]
    ClassNotFound(String),
    #[error("method '{class}::{method}' taking {arity} argument(s) not found")]
    MethodNotFound { class: String, method: String, arity: usize },
    #[error("handle {0} does not reference a live object")]
    InvalidHandle(ManagedHandle),
    #[error("{class}::{method} threw: {message}")]
    ManagedException { class: String, method: String, message: String },
    #[error("field '{field}' not found on {class}")]
    FieldNotFound { class: String, field: String },
    #[error("property '{property}' not found on {class}")]
    PropertyNotFound { class: String, property: String },
    #[error("'{member}' on {class} is declared as {declared}, not {requested}")]
    TypeMismatch { class: String, member: String, declared: String, requested: String },
    #[error("value of type {found} cannot be read as {expected}")]
    ValueMismatch { expected: String, found: String },
    #[error("unsupported element kind '{0}'")]
    Unsupported(String),
    #[error("character {0:?} does not fit a 16-bit code unit")]
    CharOutOfRange(char),
}
