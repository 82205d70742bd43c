//! Terminal-facing `Reporter`. Grounded on the donor's `colored::Colorize`
//! diagnostic formatting (`compiler/src/error.rs`'s `"خطأ ترجمي: "` prefix
//! style) but generalized to the two phases this workspace actually reports.

use colored::Colorize;
use vmcore::diagnostics::{Report, Reporter};

#[derive(Default)]
pub struct CliReporter;

impl CliReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for CliReporter {
    fn report(&mut self, report: Report) {
        eprintln!("{}", report.to_string().red());
    }
}
