use std::fmt;
use std::time::SystemTime;

use runwatch_protocol::Args;

/// Function call event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    /// Name of the called function.
    pub function_name: String,

    /// Source file of the called function.
    pub filename: String,

    /// Source line of the called function.
    pub line_no: u32,

    /// Truncated argument representations, in declaration order.
    pub args: Args,

    /// Unique ID of this call (within its generation).
    pub call_id: u64,

    /// ID of the calling function, if any.
    pub parent_id: Option<u64>,

    /// Time at which the event was collected.
    pub timestamp: SystemTime,

    /// Generation the event belongs to.
    pub generation: u64,
}

/// Function return event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnEvent {
    /// Name of the returning function.
    pub function_name: String,

    /// Truncated representation of the returned value.
    pub return_value: String,

    /// ID of the call this return closes.
    pub call_id: u64,

    /// Time at which the event was collected.
    pub timestamp: SystemTime,

    /// Generation the event belongs to.
    pub generation: u64,
}

/// Exception event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEvent {
    /// Type name of the exception.
    pub exception_type: String,

    /// Exception message.
    pub message: String,

    /// Frame summaries, outermost first.
    pub frames: Vec<String>,

    /// Time at which the event was collected.
    pub timestamp: SystemTime,

    /// Generation the event belongs to.
    pub generation: u64,
}

/// Line of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Line content, without terminator.
    pub content: String,

    /// Origin of the line.
    pub stream: OutputStream,

    /// Time at which the event was collected.
    pub timestamp: SystemTime,

    /// Generation the event belongs to.
    pub generation: u64,
}

/// Origin of an [OutputLine].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Standard output of the worker.
    Stdout,

    /// Standard error of the worker.
    Stderr,

    /// Message emitted by the supervisor itself.
    System,
}

impl OutputStream {
    /// Returns the tag of this stream.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::System => "system",
        }
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of an [Event].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [CallEvent].
    Call,

    /// See [ReturnEvent].
    Return,

    /// See [ExceptionEvent].
    Exception,

    /// See [OutputLine].
    Output,
}

impl EventKind {
    /// Returns the name of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Return => "return",
            Self::Exception => "exception",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event delivered to the live consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A function was called.
    Call(CallEvent),

    /// A function returned.
    Return(ReturnEvent),

    /// An exception was raised.
    Exception(ExceptionEvent),

    /// A line of output was produced.
    Output(OutputLine),
}

impl Event {
    /// Returns the kind of this event.
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Call(_) => EventKind::Call,
            Self::Return(_) => EventKind::Return,
            Self::Exception(_) => EventKind::Exception,
            Self::Output(_) => EventKind::Output,
        }
    }

    /// Returns the generation this event belongs to.
    pub const fn generation(&self) -> u64 {
        match self {
            Self::Call(e) => e.generation,
            Self::Return(e) => e.generation,
            Self::Exception(e) => e.generation,
            Self::Output(e) => e.generation,
        }
    }

    /// Returns the time at which this event was collected.
    pub const fn timestamp(&self) -> SystemTime {
        match self {
            Self::Call(e) => e.timestamp,
            Self::Return(e) => e.timestamp,
            Self::Exception(e) => e.timestamp,
            Self::Output(e) => e.timestamp,
        }
    }
}
