//! Progress reporting to the terminal.
//!
//! Mirrors the engine's own events: the CLI doesn't decide what happened, it
//! just narrates what the engine already told it.

/// A sink for human-facing progress messages. Exists so tests can swap in a
/// silent or capturing implementation instead of writing to stderr.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Writes every message to stderr with a level prefix, leaving stdout free
/// for machine-readable output (tables, JSON).
pub struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}
