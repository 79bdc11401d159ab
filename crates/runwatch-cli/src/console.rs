use std::collections::HashMap;
use std::io::{self, Write};

use runwatch_collector::{CallEvent, Event, ExceptionEvent, OutputLine, ReturnEvent};

const INDENT: &str = "  ";

/// Line-oriented printer of execution events.
///
/// Calls and returns are indented by their call depth.
pub struct Console<W> {
    out: W,

    /// Depth of the calls seen so far.
    depths: HashMap<u64, usize>,

    generation: u64,
}

impl<W: Write> Console<W> {
    /// Creates a console printing into `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            depths: HashMap::new(),
            generation: 0,
        }
    }

    /// Prints an event, on a single line (several for exceptions).
    pub fn write_event(&mut self, event: &Event) -> io::Result<()> {
        if event.generation() != self.generation {
            self.depths.clear();
            self.generation = event.generation();
            writeln!(self.out, "--- restarted (run #{}) ---", self.generation + 1)?;
        }

        match event {
            Event::Call(call) => self.write_call(call)?,
            Event::Return(ret) => self.write_return(ret)?,
            Event::Exception(exception) => self.write_exception(exception)?,
            Event::Output(line) => self.write_output(line)?,
        }

        self.out.flush()
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_call(&mut self, call: &CallEvent) -> io::Result<()> {
        let depth = call
            .parent_id
            .and_then(|parent| self.depths.get(&parent))
            .map_or(0, |depth| depth + 1);

        self.depths.insert(call.call_id, depth);

        let args = call
            .args
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");

        writeln!(
            self.out,
            "{}-> {}({args})  [{}:{}]",
            INDENT.repeat(depth),
            call.function_name,
            call.filename,
            call.line_no,
        )
    }

    fn write_return(&mut self, ret: &ReturnEvent) -> io::Result<()> {
        let depth = self.depths.remove(&ret.call_id).unwrap_or_default();

        writeln!(
            self.out,
            "{}<- {} = {}",
            INDENT.repeat(depth),
            ret.function_name,
            ret.return_value,
        )
    }

    fn write_exception(&mut self, exception: &ExceptionEvent) -> io::Result<()> {
        writeln!(
            self.out,
            "!! {}: {}",
            exception.exception_type, exception.message
        )?;

        for frame in &exception.frames {
            writeln!(self.out, "{INDENT}{frame}")?;
        }

        Ok(())
    }

    fn write_output(&mut self, line: &OutputLine) -> io::Result<()> {
        writeln!(self.out, "[{}] {}", line.stream, line.content)
    }
}
