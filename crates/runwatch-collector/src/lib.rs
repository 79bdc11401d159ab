//! This crate aggregates the execution events of a traced worker process into
//! a single, ordered and cancellable event stream.
//!
//! The [Collector] is fed concurrently by several producers (output readers,
//! the trace channel tailer, the process monitor). It reconstructs the
//! caller/callee relationships of function calls with a collector-side call
//! stack, records every event in typed history lists, and queues it for the
//! live consumer.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use runwatch_collector::{Collector, OutputStream};
//! use runwatch_protocol::{CallRecord, ReturnRecord};
//!
//! #[tokio::main]
//! async fn main() {
//!     let collector = Arc::new(Collector::new());
//!
//!     let sink = collector.sink();
//!     sink.add_call(CallRecord::new("f", "a.py", 10));
//!     sink.add_return(ReturnRecord::new("f", "None"));
//!     sink.add_output("done", OutputStream::Stdout);
//!
//!     while let Some(event) = collector.try_next_event() {
//!         println!("{}", event.kind());
//!     }
//! }
//! ```
//!
//! # Generations
//!
//! Each [clear](Collector::clear) starts a new generation. Producers write
//! through an [EventSink], which is bound to the generation that was current
//! when it was created: once the collector moves on, everything written
//! through an outdated sink is dropped.

mod collector;
mod event;
mod sink;
mod stack;

pub use self::collector::Collector;
pub use self::event::{CallEvent, Event, EventKind, ExceptionEvent, OutputLine, OutputStream};
pub use self::event::ReturnEvent;
pub use self::sink::EventSink;
