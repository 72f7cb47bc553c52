use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use tracing::debug;

use crate::drivers::progress::ProgressBoard;
use crate::error::Error;
use crate::nultest::nullifiable;
use crate::record::{NULLIF, SetRecord};

/// Options for one weed pass.
#[derive(Clone, Copy, Debug)]
pub struct WeedOptions {
    /// Worker thread count.
    pub threads: usize,
    /// Only feed sets whose M-value lies in this range to the tester;
    /// the rest stay untouched. `None` tests every unmarked set.
    pub bounds: Option<(u64, u64)>,
}

impl Default for WeedOptions {
    fn default() -> Self {
        WeedOptions {
            threads: 1,
            bounds: None,
        }
    }
}

/// Outcome counters for a weed pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct WeedReport {
    /// Unmarked sets fed to the tester.
    pub tested: u64,
    /// Sets the tester condemned, now marked `NULLIF`.
    pub weeded: u64,
    /// Sets that survived the tester.
    pub passed: u64,
    /// Unmarked sets skipped by the bounds filter.
    pub skipped: u64,
}

/// Runs the exhaustive tester over every still-unmarked set of `rec`
/// and marks the ones that turn out nullifiable.
///
/// A record whose generation inputs were complete comes out of this
/// with its unmarked remainder exactly the innullifiable sets. The
/// shared passed counter doubles as the third progress-snapshot word.
pub fn weed(
    rec: &SetRecord,
    opts: &WeedOptions,
    progress: Option<&ProgressBoard>,
) -> Result<WeedReport, Error> {
    if opts.threads < 1 {
        return Err(Error::InvalidInput("at least one worker thread is needed"));
    }
    if let Some((lo, hi)) = opts.bounds {
        if lo > hi {
            return Err(Error::InvalidInput("weed bounds are inverted"));
        }
    }
    debug!(
        size = rec.size(),
        total = rec.total(),
        threads = opts.threads,
        "weed pass starting"
    );

    let workers = opts.threads;
    let stride = workers as u64;
    let fallback_passed = AtomicU64::new(0);
    let passed = progress.map_or(&fallback_passed, |board| board.aux());

    let report = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for w in 0..workers {
            let cell = progress.map(|board| board.cell(w));
            let passed = &passed;
            handles.push(scope.spawn(move || -> Result<WeedReport, Error> {
                let mut local = WeedReport::default();
                let mut fault: Option<Error> = None;
                rec.query_parallel(NULLIF, 0, stride, w as u64, cell, |set, _| {
                    if fault.is_some() {
                        return;
                    }
                    if let Some((lo, hi)) = opts.bounds {
                        let m_value = set[set.len() - 1];
                        if m_value < lo || m_value > hi {
                            local.skipped += 1;
                            return;
                        }
                    }
                    local.tested += 1;
                    if nullifiable(set) {
                        match rec.mark(set, NULLIF) {
                            Ok(_) => local.weeded += 1,
                            Err(e) => fault = Some(e),
                        }
                    } else {
                        local.passed += 1;
                        passed.fetch_add(1, Ordering::Relaxed);
                    }
                })?;
                match fault {
                    Some(e) => Err(e),
                    None => Ok(local),
                }
            }));
        }
        let mut merged = WeedReport::default();
        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(local)) => {
                    merged.tested += local.tested;
                    merged.weeded += local.weeded;
                    merged.passed += local.passed;
                    merged.skipped += local.skipped;
                }
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(merged),
        }
    })?;

    debug!(
        tested = report.tested,
        weeded = report.weeded,
        passed = report.passed,
        "weed pass finished"
    );
    Ok(report)
}
