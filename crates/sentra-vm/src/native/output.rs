//! Program output sink
//!
//! `Print` and the `log` builtin write whole lines here. Embedders and
//! tests swap stdout for an in-memory buffer.

use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
enum Sink {
    Stdout,
    Buffer(Vec<String>),
}

/// Shared handle to the VM's output
#[derive(Debug, Clone)]
pub struct Output(Rc<RefCell<Sink>>);

impl Output {
    /// Write to the process's standard output
    pub fn stdout() -> Self {
        Output(Rc::new(RefCell::new(Sink::Stdout)))
    }

    /// Collect lines in memory
    pub fn capture() -> Self {
        Output(Rc::new(RefCell::new(Sink::Buffer(Vec::new()))))
    }

    /// Switch this sink (and every clone of it) to an empty buffer
    pub fn start_capture(&self) {
        *self.0.borrow_mut() = Sink::Buffer(Vec::new());
    }

    pub fn write_line(&self, line: &str) {
        match &mut *self.0.borrow_mut() {
            Sink::Stdout => println!("{}", line),
            Sink::Buffer(lines) => lines.push(line.to_string()),
        }
    }

    /// Captured lines so far (always empty for stdout)
    pub fn lines(&self) -> Vec<String> {
        match &*self.0.borrow() {
            Sink::Stdout => Vec::new(),
            Sink::Buffer(lines) => lines.clone(),
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Output::stdout()
    }
}
