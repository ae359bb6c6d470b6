use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A field of an inbound batch or stored record failed validation.
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),
}
