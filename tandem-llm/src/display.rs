//! Display sinks - where the text of the current turn is shown
//!
//! A sink is a placeholder: every write replaces what was shown before.

use std::io::Write;

/// A full-replacement write target for the text of one turn
pub trait DisplaySink {
    /// Show `text` in place of whatever was shown before
    fn replace(&mut self, text: &str);

    /// Show an error description in place of the turn text
    fn diagnostic(&mut self, message: &str) {
        self.replace(message);
    }

    /// Forget the previous turn; called before a new turn starts
    fn clear(&mut self) {}
}

impl<S: DisplaySink + ?Sized> DisplaySink for &mut S {
    fn replace(&mut self, text: &str) {
        (**self).replace(text);
    }

    fn diagnostic(&mut self, message: &str) {
        (**self).diagnostic(message);
    }

    fn clear(&mut self) {
        (**self).clear();
    }
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
    fn replace(&mut self, text: &str) {
        (**self).replace(text);
    }

    fn diagnostic(&mut self, message: &str) {
        (**self).diagnostic(message);
    }

    fn clear(&mut self) {
        (**self).clear();
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn replace(&mut self, _text: &str) {}
}

/// One write received by a [`MemorySink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Replace(String),
    Diagnostic(String),
    Clear,
}

/// Records every write, for tests and headless runs
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Vec<SinkEvent>,
    current: String,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// What is shown right now
    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    /// Text of every `replace` write, in order
    pub fn updates(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Replace(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn diagnostics(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Diagnostic(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl DisplaySink for MemorySink {
    fn replace(&mut self, text: &str) {
        self.current = text.to_string();
        self.events.push(SinkEvent::Replace(self.current.clone()));
    }

    fn diagnostic(&mut self, message: &str) {
        self.current = message.to_string();
        self.events.push(SinkEvent::Diagnostic(self.current.clone()));
    }

    fn clear(&mut self) {
        self.current.clear();
        self.events.push(SinkEvent::Clear);
    }
}

/// Streams a labelled turn to a terminal.
///
/// A terminal cannot redraw freely, so when the new text extends what is
/// already shown only the new suffix is printed. Anything else starts a
/// fresh block under the label.
pub struct TerminalSink<W: Write = std::io::Stdout> {
    label: String,
    out: W,
    shown: String,
    header_printed: bool,
}

impl TerminalSink {
    pub fn stdout(label: impl Into<String>) -> Self {
        Self::new(label, std::io::stdout())
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(label: impl Into<String>, out: W) -> Self {
        Self {
            label: label.into(),
            out,
            shown: String::new(),
            header_printed: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn header(&mut self) {
        if !self.header_printed {
            // Best effort, like println!
            let _ = writeln!(self.out, "\n── {} ──", self.label);
            self.header_printed = true;
        }
    }

    fn end_block(&mut self) {
        if self.header_printed && !self.shown.is_empty() && !self.shown.ends_with('\n') {
            let _ = writeln!(self.out);
        }
    }
}

impl<W: Write> DisplaySink for TerminalSink<W> {
    fn replace(&mut self, text: &str) {
        if let Some(suffix) = text.strip_prefix(self.shown.as_str()) {
            self.header();
            let _ = write!(self.out, "{}", suffix);
        } else {
            self.end_block();
            self.header_printed = false;
            self.header();
            let _ = write!(self.out, "{}", text);
        }
        let _ = self.out.flush();
        self.shown = text.to_string();
    }

    fn diagnostic(&mut self, message: &str) {
        self.end_block();
        self.header();
        let _ = writeln!(self.out, "[error] {}", message);
        let _ = self.out.flush();
        self.shown.clear();
        self.header_printed = false;
    }

    fn clear(&mut self) {
        self.end_block();
        self.shown.clear();
        self.header_printed = false;
    }
}
