type CallId = u64;

/// Collector-side call stack.
///
/// It only keeps the IDs of the calls which haven't returned yet, innermost
/// last. It is used to infer the caller of new calls and to match returns
/// which don't carry a call ID.
#[derive(Debug, Default)]
pub struct CallStack {
    open: Vec<CallId>,
}

impl CallStack {
    /// Returns the innermost open call.
    pub fn top(&self) -> Option<CallId> {
        self.open.last().copied()
    }

    /// Updates the stack with a new call.
    pub fn register_call(&mut self, call_id: CallId) {
        self.open.push(call_id);
    }

    /// Updates the stack with a function return.
    ///
    /// An explicit call ID closes that call wherever it is in the stack,
    /// otherwise the innermost call is closed.
    ///
    /// It returns the ID of the closed call, or `None` if there is no matching
    /// open call.
    pub fn register_return(&mut self, call_id: Option<CallId>) -> Option<CallId> {
        match call_id {
            Some(call_id) => {
                let pos = self.open.iter().rposition(|id| *id == call_id)?;
                Some(self.open.remove(pos))
            }
            None => self.open.pop(),
        }
    }

    /// Returns the open calls, outermost first.
    pub fn to_vec(&self) -> Vec<CallId> {
        self.open.clone()
    }

    /// Returns the number of open calls.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn clear(&mut self) {
        self.open.clear();
    }
}
