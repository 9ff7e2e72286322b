//! Exit code logic for the downloader process.
//!
//! Single responsibility: map the batch report to the process exit outcome.

use std::process::ExitCode;

use msr_core::Report;

/// How the run ended, as seen by the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every job succeeded and the catalog walk was complete.
    Success,
    /// Some jobs succeeded, but others failed or were never attempted.
    Partial,
    /// Nothing succeeded and something failed, or the run could not start.
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::from(1),
            ProcessExit::Partial => ExitCode::from(2),
        }
    }
}

/// Determines the process exit outcome from succeeded and failed job counts.
///
/// `incomplete` marks a run that left work out without a failed record, such
/// as a catalog walk that ended early or skipped entries.
pub(crate) fn determine_exit_outcome(
    succeeded: usize,
    failed: usize,
    incomplete: bool,
) -> ProcessExit {
    if failed == 0 && !incomplete {
        ProcessExit::Success
    } else if succeeded > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

/// Exit outcome for a finished batch.
pub(crate) fn exit_outcome_for(report: &Report) -> ProcessExit {
    let summary = report.summary();
    determine_exit_outcome(summary.succeeded, summary.failed, report.is_incomplete())
}
