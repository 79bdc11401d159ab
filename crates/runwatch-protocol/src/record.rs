use std::borrow::Cow;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Maximum length (in characters) of a value representation sent over the
/// trace channel.
pub const MAX_REPR_LEN: usize = 100;

/// Function arguments, by name, in declaration order.
pub type Args = IndexMap<String, String>;

/// A record exchanged over the trace channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TraceRecord {
    /// A function was called.
    Call(CallRecord),

    /// A function returned.
    Return(ReturnRecord),

    /// An exception was raised.
    Exception(ExceptionRecord),
}

impl TraceRecord {
    /// Parses a single line of the trace channel.
    ///
    /// Surrounding whitespace (including the line terminator) is ignored.
    pub fn parse_line(line: &str) -> crate::Result<Self> {
        let line = line.trim();

        if line.is_empty() {
            return Err(Error::EmptyRecord);
        }

        if !line.starts_with('{') {
            return Err(Error::NotAnObject);
        }

        let record: Self = serde_json::from_str(line)?;

        if let Self::Call(ref call) = record {
            if call.function_name.is_empty() {
                return Err(Error::EmptyField("function_name"));
            }
            if call.filename.is_empty() {
                return Err(Error::EmptyField("filename"));
            }
        }

        Ok(record)
    }

    /// Serializes the record as a single line, without its terminator.
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the wire discriminator of this record.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Call(_) => "call",
            Self::Return(_) => "return",
            Self::Exception(_) => "exception",
        }
    }
}

impl From<CallRecord> for TraceRecord {
    fn from(call: CallRecord) -> Self {
        Self::Call(call)
    }
}

impl From<ReturnRecord> for TraceRecord {
    fn from(ret: ReturnRecord) -> Self {
        Self::Return(ret)
    }
}

impl From<ExceptionRecord> for TraceRecord {
    fn from(exception: ExceptionRecord) -> Self {
        Self::Exception(exception)
    }
}

/// Function call record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Name of the called function.
    pub function_name: String,

    /// Source file of the called function.
    pub filename: String,

    /// Source line of the called function.
    pub line_no: u32,

    /// Argument representations.
    #[serde(default)]
    pub args: Args,

    /// Call ID chosen by the producer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<u64>,

    /// ID of the calling function, if known by the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
}

impl CallRecord {
    /// Creates a call record without arguments nor IDs.
    pub fn new(function_name: impl Into<String>, filename: impl Into<String>, line_no: u32) -> Self {
        Self {
            function_name: function_name.into(),
            filename: filename.into(),
            line_no,
            args: Args::new(),
            call_id: None,
            parent_id: None,
        }
    }

    /// Adds an argument, truncating its representation to [MAX_REPR_LEN].
    pub fn arg(mut self, name: impl Into<String>, value: &str) -> Self {
        self.args
            .insert(name.into(), truncate_repr(value, MAX_REPR_LEN).into_owned());
        self
    }

    /// Sets an explicit call ID.
    pub const fn call_id(mut self, call_id: u64) -> Self {
        self.call_id = Some(call_id);
        self
    }

    /// Sets an explicit parent call ID.
    pub const fn parent_id(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Function return record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRecord {
    /// Name of the returning function.
    #[serde(default)]
    pub function_name: String,

    /// Representation of the returned value.
    #[serde(default)]
    pub return_value: String,

    /// ID of the matching call, if known by the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<u64>,
}

impl ReturnRecord {
    /// Creates a return record matched against the innermost open call.
    pub fn new(function_name: impl Into<String>, return_value: &str) -> Self {
        Self {
            function_name: function_name.into(),
            return_value: truncate_repr(return_value, MAX_REPR_LEN).into_owned(),
            call_id: None,
        }
    }

    /// Matches the return against a specific call.
    pub const fn call_id(mut self, call_id: u64) -> Self {
        self.call_id = Some(call_id);
        self
    }
}

/// Exception record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    /// Type name of the exception.
    pub exception_type: String,

    /// Exception message.
    pub message: String,

    /// Frame summaries, outermost first.
    #[serde(default, rename = "traceback")]
    pub frames: Vec<String>,
}

impl ExceptionRecord {
    /// Creates an exception record without frames.
    pub fn new(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: message.into(),
            frames: Vec::new(),
        }
    }

    /// Appends a frame summary.
    pub fn frame(mut self, frame: impl Into<String>) -> Self {
        self.frames.push(frame.into());
        self
    }

    /// Describes a Rust error as an exception.
    ///
    /// The chain of error sources is reported as frames.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let mut frames = Vec::new();
        let mut source = err.source();

        while let Some(e) = source {
            frames.push(e.to_string());
            source = e.source();
        }

        Self {
            exception_type: short_type_name(std::any::type_name::<E>()).to_owned(),
            message: err.to_string(),
            frames,
        }
    }
}

fn short_type_name(name: &str) -> &str {
    let name = name.split('<').next().unwrap_or(name);
    name.rsplit("::").next().unwrap_or(name)
}

/// Truncates a value representation to `max_len` characters, marking the cut
/// with `...`.
pub fn truncate_repr(value: &str, max_len: usize) -> Cow<'_, str> {
    if value.chars().count() <= max_len {
        return Cow::Borrowed(value);
    }

    let mut truncated: String = value.chars().take(max_len.saturating_sub(3)).collect();
    truncated.push_str("...");

    Cow::Owned(truncated)
}
