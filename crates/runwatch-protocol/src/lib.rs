//! This crate defines the trace channel shared by a traced worker process and
//! the runwatch supervisor.
//!
//! The channel is line-oriented: every record is one self-contained JSON
//! object terminated by a newline, whose `type` field selects the record kind.
//!
//! ```text
//! {"type":"call","function_name":"f","filename":"a.py","line_no":10,"args":{"x":"1"},"call_id":1}
//! {"type":"return","function_name":"f","return_value":"2","call_id":1}
//! {"type":"exception","exception_type":"ValueError","message":"bad","traceback":[]}
//! ```
//!
//! Two sides are provided:
//! - [TraceRecord::parse_line] for the consumer (the supervisor's tailer),
//!   which must skip any line it cannot parse.
//! - [RecordWriter] for producers, which flushes after every record and never
//!   lets a channel failure reach the traced program.

mod error;
mod record;
mod writer;

pub use self::error::{Error, Result};
pub use self::record::{Args, CallRecord, ExceptionRecord, ReturnRecord, TraceRecord};
pub use self::record::{MAX_REPR_LEN, truncate_repr};
pub use self::writer::RecordWriter;

/// Environment variable set to `1` in the worker when tracing is enabled.
pub const TRACE_ENABLED_ENV: &str = "RUNWATCH_TRACE";

/// Environment variable holding the path of the trace channel.
pub const TRACE_PATH_ENV: &str = "RUNWATCH_TRACE_PATH";
