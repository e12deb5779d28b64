use crate::CommandKind;
use thiserror::Error;

pub type Result<T, E = RegistryError> = core::result::Result<T, E>;

/// Validation failures reported by the registry. None of these leave partial
/// state behind: a rejected call never touches the device entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid command: {0}")]
    UnknownCommand(String),
    #[error("{command} requires numeric {field}")]
    InvalidParams {
        command: CommandKind,
        field: &'static str,
    },
    #[error("{0} is required")]
    MissingField(&'static str),
}

impl RegistryError {
    /// Name of the offending field, when the error is tied to one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            RegistryError::InvalidParams { field, .. } => Some(field),
            RegistryError::MissingField(field) => Some(field),
            RegistryError::UnknownCommand(_) => None,
        }
    }
}
