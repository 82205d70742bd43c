//! The logging/diagnostics seam shared by the compiler and the VM.
//!
//! Grounded on the donor workspace's `Reporter`/`Phase`/`Report` trio
//! (`src/reporter.rs`): a small trait the driver implements to decide
//! where diagnostics go, so the compiler and VM never touch stdio directly.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Compile,
    Runtime,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Compile => write!(f, "compile error"),
            Phase::Runtime => write!(f, "runtime error"),
        }
    }
}

/// A single diagnostic. `Compile` carries the offending lexeme (`None` means
/// the error was reported at end-of-file); `Runtime` carries the top-to-bottom
/// call-frame trace described in §7 of the spec.
#[derive(Debug, Clone)]
pub enum Report {
    Compile {
        line: u32,
        at: Option<String>,
        message: String,
    },
    Runtime {
        message: String,
        trace: Vec<String>,
    },
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Compile { line, at, message } => match at {
                Some(lexeme) => write!(f, "[line {line}] Error at '{lexeme}': {message}"),
                None => write!(f, "[line {line}] Error at end: {message}"),
            },
            Report::Runtime { message, trace } => {
                writeln!(f, "{message}")?;
                for (i, frame) in trace.iter().enumerate() {
                    if i + 1 == trace.len() {
                        write!(f, "{frame}")?;
                    } else {
                        writeln!(f, "{frame}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

pub trait Reporter {
    fn report(&mut self, report: Report);
}

/// Collects diagnostics in memory instead of writing them anywhere; used by
/// tests that want to assert on what was reported without capturing stdio.
#[derive(Default)]
pub struct VecReporter {
    pub reports: Vec<Report>,
}

impl Reporter for VecReporter {
    fn report(&mut self, report: Report) {
        self.reports.push(report);
    }
}

impl VecReporter {
    pub fn had_error(&self) -> bool {
        !self.reports.is_empty()
    }
}
