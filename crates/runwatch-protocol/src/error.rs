/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The line holds no record.
    #[error("empty record")]
    EmptyRecord,

    /// The line is not a JSON object.
    #[error("record is not a JSON object")]
    NotAnObject,

    /// JSON serialization/deserialization error (including unknown record
    /// kinds and missing fields).
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A mandatory record field is empty.
    #[error("record field `{0}` is empty")]
    EmptyField(&'static str),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
