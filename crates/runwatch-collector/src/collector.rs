use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use futures_util::Stream;
use runwatch_protocol::{CallRecord, ExceptionRecord, ReturnRecord};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::event::{CallEvent, Event, ExceptionEvent, OutputLine, OutputStream, ReturnEvent};
use crate::sink::EventSink;
use crate::stack::CallStack;

/// Aggregator of the execution events of a traced worker.
///
/// Every operation is atomic with respect to the others: the whole state
/// (history, call stack, live queue, counters) sits behind a single lock,
/// which is never held while a consumer is waiting for events.
///
/// None of the recording operations can fail. Input that would break the
/// collector invariants (e.g., a return for a call that isn't open) is
/// dropped.
pub struct Collector {
    state: Mutex<CollectorState>,
    event_ready: Notify,
    cancel: CancellationToken,
}

struct CollectorState {
    /// Current generation.
    generation: u64,

    /// Next call ID to assign.
    next_call_id: u64,

    /// Open calls.
    stack: CallStack,

    calls: Vec<CallEvent>,
    returns: Vec<ReturnEvent>,
    exceptions: Vec<ExceptionEvent>,
    output: Vec<OutputLine>,

    /// Events not yet delivered to the live consumer.
    queue: VecDeque<Event>,

    /// Whether new events are kept out of the live queue.
    dispatch_paused: bool,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    /// Creates an empty collector, at generation 0.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CollectorState {
                generation: 0,
                next_call_id: 1,
                stack: CallStack::default(),
                calls: Vec::new(),
                returns: Vec::new(),
                exceptions: Vec::new(),
                output: Vec::new(),
                queue: VecDeque::new(),
                dispatch_paused: false,
            }),
            event_ready: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Creates a write handle bound to the current generation.
    pub fn sink(self: &Arc<Self>) -> EventSink {
        let generation = self.lock().generation;
        EventSink::new(self.clone(), generation)
    }

    /// Records a function call.
    ///
    /// The call ID supplied by the record is adopted (and the internal counter
    /// moves past it), otherwise the next counter value is assigned. Without
    /// an explicit parent, the innermost open call is the parent.
    ///
    /// Returns the ID of the recorded call, or `None` if the record was
    /// dropped because its ID was already used.
    pub fn add_call(&self, call: CallRecord) -> Option<u64> {
        self.record_call(None, call)
    }

    /// Records a function return.
    ///
    /// A return carrying a call ID closes that call wherever it is in the call
    /// stack, and is dropped if that call isn't open. A return without call ID
    /// closes the innermost open call, and is dropped if there is none.
    ///
    /// Returns the ID of the closed call, if the return was recorded.
    pub fn add_return(&self, ret: ReturnRecord) -> Option<u64> {
        self.record_return(None, ret)
    }

    /// Records an exception. The call stack is left untouched.
    pub fn add_exception(&self, exception: ExceptionRecord) {
        self.record_exception(None, exception);
    }

    /// Records a line of output.
    pub fn add_output(&self, content: impl Into<String>, stream: OutputStream) {
        self.record_output(None, content.into(), stream);
    }

    pub(crate) fn record_call(&self, generation: Option<u64>, call: CallRecord) -> Option<u64> {
        let mut state = self.lock();

        if !state.accepts(generation) {
            return None;
        }

        let call_id = match call.call_id {
            Some(call_id) if call_id < state.next_call_id => {
                tracing::debug!(call_id, function = %call.function_name, "call ID reused, dropped");
                return None;
            }
            Some(call_id) => call_id,
            None => state.next_call_id,
        };
        state.next_call_id = call_id.saturating_add(1);

        let parent_id = call.parent_id.or_else(|| state.stack.top());

        let event = CallEvent {
            function_name: call.function_name,
            filename: call.filename,
            line_no: call.line_no,
            args: call.args,
            call_id,
            parent_id,
            timestamp: SystemTime::now(),
            generation: state.generation,
        };

        state.stack.register_call(call_id);
        state.calls.push(event.clone());
        self.dispatch(state, Event::Call(event));

        Some(call_id)
    }

    pub(crate) fn record_return(&self, generation: Option<u64>, ret: ReturnRecord) -> Option<u64> {
        let mut state = self.lock();

        if !state.accepts(generation) {
            return None;
        }

        let Some(call_id) = state.stack.register_return(ret.call_id) else {
            tracing::debug!(
                call_id = ret.call_id,
                function = %ret.function_name,
                "return without open call, dropped"
            );
            return None;
        };

        let event = ReturnEvent {
            function_name: ret.function_name,
            return_value: ret.return_value,
            call_id,
            timestamp: SystemTime::now(),
            generation: state.generation,
        };

        state.returns.push(event.clone());
        self.dispatch(state, Event::Return(event));

        Some(call_id)
    }

    pub(crate) fn record_exception(
        &self,
        generation: Option<u64>,
        exception: ExceptionRecord,
    ) -> bool {
        let mut state = self.lock();

        if !state.accepts(generation) {
            return false;
        }

        let event = ExceptionEvent {
            exception_type: exception.exception_type,
            message: exception.message,
            frames: exception.frames,
            timestamp: SystemTime::now(),
            generation: state.generation,
        };

        state.exceptions.push(event.clone());
        self.dispatch(state, Event::Exception(event));

        true
    }

    pub(crate) fn record_output(
        &self,
        generation: Option<u64>,
        content: String,
        stream: OutputStream,
    ) -> bool {
        let mut state = self.lock();

        if !state.accepts(generation) {
            return false;
        }

        let event = OutputLine {
            content,
            stream,
            timestamp: SystemTime::now(),
            generation: state.generation,
        };

        state.output.push(event.clone());
        self.dispatch(state, Event::Output(event));

        true
    }

    /// Appends an event to the live queue (unless dispatch is paused), and
    /// wakes up a waiting consumer once the lock is released.
    fn dispatch(&self, mut state: MutexGuard<'_, CollectorState>, event: Event) {
        if state.dispatch_paused {
            return;
        }

        state.queue.push_back(event);
        drop(state);

        self.event_ready.notify_one();
    }

    /// Waits for the next event of the live queue.
    ///
    /// Returns `None` once the collector is [cancelled](Self::cancel) and the
    /// queue is drained.
    pub async fn next_event(&self) -> Option<Event> {
        loop {
            let notified = self.event_ready.notified();
            tokio::pin!(notified);

            // register interest before checking the queue, so that an event
            // pushed in between is not missed
            notified.as_mut().enable();

            if let Some(event) = self.lock().queue.pop_front() {
                return Some(event);
            }

            if self.cancel.is_cancelled() {
                return None;
            }

            tokio::select! {
                _ = &mut notified => (),
                _ = self.cancel.cancelled() => (),
            }
        }
    }

    /// Returns the next event of the live queue, if any, without waiting.
    pub fn try_next_event(&self) -> Option<Event> {
        self.lock().queue.pop_front()
    }

    /// Returns the live queue as a stream of events.
    ///
    /// The stream ends once the collector is [cancelled](Self::cancel) and the
    /// queue is drained.
    pub fn events(self: Arc<Self>) -> impl Stream<Item = Event> + Send + 'static {
        futures_util::stream::unfold(self, |collector| async move {
            let event = collector.next_event().await?;
            Some((event, collector))
        })
    }

    /// Wipes the history, the call stack and the live queue, resets the call
    /// ID counter and starts a new generation.
    ///
    /// Returns the new generation.
    pub fn clear(&self) -> u64 {
        let mut state = self.lock();

        state.calls.clear();
        state.returns.clear();
        state.exceptions.clear();
        state.output.clear();
        state.stack.clear();
        state.queue.clear();
        state.next_call_id = 1;
        state.generation += 1;

        tracing::debug!(generation = state.generation, "collector cleared");

        state.generation
    }

    /// Pauses or resumes the dispatch of new events to the live queue.
    ///
    /// While paused, events are still recorded in the history (and the call
    /// stack is kept up to date), but the live consumer doesn't see them.
    pub fn set_dispatch_paused(&self, paused: bool) {
        self.lock().dispatch_paused = paused;
    }

    /// Returns whether the dispatch to the live queue is paused.
    pub fn is_dispatch_paused(&self) -> bool {
        self.lock().dispatch_paused
    }

    /// Cancels the collector: waiting consumers are woken up, and
    /// [next_event](Self::next_event) returns `None` once the queue is
    /// drained.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns whether the collector was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the current generation.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Returns the number of events waiting in the live queue.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Returns the recorded calls.
    pub fn calls(&self) -> Vec<CallEvent> {
        self.lock().calls.clone()
    }

    /// Returns the recorded returns.
    pub fn returns(&self) -> Vec<ReturnEvent> {
        self.lock().returns.clone()
    }

    /// Returns the recorded exceptions.
    pub fn exceptions(&self) -> Vec<ExceptionEvent> {
        self.lock().exceptions.clone()
    }

    /// Returns the recorded output lines.
    pub fn output(&self) -> Vec<OutputLine> {
        self.lock().output.clone()
    }

    /// Returns the IDs of the open calls, outermost first.
    pub fn call_stack(&self) -> Vec<u64> {
        self.lock().stack.to_vec()
    }

    /// Returns the number of open calls.
    pub fn depth(&self) -> usize {
        self.lock().stack.depth()
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CollectorState {
    /// Returns whether an event tagged with `generation` may be recorded.
    fn accepts(&self, generation: Option<u64>) -> bool {
        match generation {
            Some(generation) if generation != self.generation => {
                tracing::trace!(
                    stale = generation,
                    current = self.generation,
                    "event from previous generation, dropped"
                );
                false
            }
            _ => true,
        }
    }
}
