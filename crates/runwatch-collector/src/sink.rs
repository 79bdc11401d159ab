use std::sync::Arc;

use runwatch_protocol::{CallRecord, ExceptionRecord, ReturnRecord, TraceRecord};

use crate::{Collector, OutputStream};

/// Write handle onto a [Collector], bound to one generation.
///
/// Once the collector has been [cleared](Collector::clear), every event
/// written through this sink is dropped.
#[derive(Clone)]
pub struct EventSink {
    collector: Arc<Collector>,
    generation: u64,
}

impl EventSink {
    pub(crate) const fn new(collector: Arc<Collector>, generation: u64) -> Self {
        Self {
            collector,
            generation,
        }
    }

    /// Returns the generation this sink is bound to.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns whether the events written through this sink are still
    /// recorded.
    pub fn is_current(&self) -> bool {
        self.collector.generation() == self.generation
    }

    /// Returns the collector this sink writes to.
    pub const fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// See [Collector::add_call].
    pub fn add_call(&self, call: CallRecord) -> Option<u64> {
        self.collector.record_call(Some(self.generation), call)
    }

    /// See [Collector::add_return].
    pub fn add_return(&self, ret: ReturnRecord) -> Option<u64> {
        self.collector.record_return(Some(self.generation), ret)
    }

    /// See [Collector::add_exception].
    ///
    /// Returns whether the exception was recorded.
    pub fn add_exception(&self, exception: ExceptionRecord) -> bool {
        self.collector
            .record_exception(Some(self.generation), exception)
    }

    /// See [Collector::add_output].
    ///
    /// Returns whether the line was recorded.
    pub fn add_output(&self, content: impl Into<String>, stream: OutputStream) -> bool {
        self.collector
            .record_output(Some(self.generation), content.into(), stream)
    }

    /// Records a record read from the trace channel.
    ///
    /// Returns whether the record was recorded.
    pub fn add_record(&self, record: TraceRecord) -> bool {
        match record {
            TraceRecord::Call(call) => self.add_call(call).is_some(),
            TraceRecord::Return(ret) => self.add_return(ret).is_some(),
            TraceRecord::Exception(exception) => self.add_exception(exception),
        }
    }
}
