use std::thread;

use tracing::debug;

use crate::drivers::progress::ProgressBoard;
use crate::error::Error;
use crate::expand::Expander;
use crate::record::{NULLIF, ONLY_SUP, SetRecord};

/// Options for one generation pass.
#[derive(Clone, Copy, Debug)]
pub struct GenerationOptions {
    /// Mark every in-range superset of each nullifiable source set.
    pub supersets: bool,
    /// Mark every in-range mutation of each nullifiable source set.
    pub mutations: bool,
    /// Mutate even sets whose nullifiability came only from a superset
    /// inheritance. Off, such sets are skipped: their mutations were
    /// already reachable from the smaller ancestor's expansion.
    pub thorough: bool,
    /// Worker thread count.
    pub threads: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        GenerationOptions {
            supersets: true,
            mutations: true,
            thorough: false,
            threads: 1,
        }
    }
}

/// Outcome counters for a generation pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenerationReport {
    /// Nullifiable source sets fed to the expander.
    pub expanded: u64,
    /// Destination marks that set at least one new bit.
    pub marked: u64,
}

/// Carries nullifiability one set size forward: every set marked
/// `NULLIF` in `src` has its expansions marked in `dest`.
///
/// Supersets land with `NULLIF | ONLY_SUP`, fresh mutations with plain
/// `NULLIF`, so the next generation can tell inherited marks from new
/// patterns. When the destination carries a fixed tail, emitted sets are
/// pinned to the M-value slice anchored by its top fixed value;
/// otherwise the destination's own M-range bounds the expansion.
pub fn generate(
    src: &SetRecord,
    dest: &SetRecord,
    opts: &GenerationOptions,
    progress: Option<&ProgressBoard>,
) -> Result<GenerationReport, Error> {
    if dest.size() != src.size() + 1 {
        return Err(Error::InvalidInput(
            "destination must hold sets one longer than the source",
        ));
    }
    if opts.threads < 1 {
        return Err(Error::InvalidInput("at least one worker thread is needed"));
    }

    let (min_m, max_m) = match dest.fixed() {
        [] => (dest.min_m(), dest.max_m()),
        fixed => {
            let anchor = fixed[fixed.len() - 1];
            (anchor, anchor)
        }
    };
    let expander = Expander::new(min_m, max_m);
    debug!(
        src_size = src.size(),
        dest_size = dest.size(),
        min_m,
        max_m,
        threads = opts.threads,
        "generation pass starting"
    );

    let workers = opts.threads;
    let stride = workers as u64;
    let report = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for w in 0..workers {
            let cell = progress.map(|board| board.cell(w));
            let expander = &expander;
            handles.push(scope.spawn(move || -> Result<GenerationReport, Error> {
                let mut local = GenerationReport::default();
                let mut fault: Option<Error> = None;
                src.query_parallel(NULLIF, NULLIF, stride, w as u64, cell, |set, byte| {
                    if fault.is_some() {
                        return;
                    }
                    local.expanded += 1;
                    let mut newly = 0u64;
                    let mut mark_err: Option<Error> = None;
                    let mut mark = |s: &[u64], mask: u8| match dest.mark(s, mask) {
                        Ok(true) => newly += 1,
                        Ok(false) => {}
                        Err(e) => {
                            if mark_err.is_none() {
                                mark_err = Some(e);
                            }
                        }
                    };
                    let mut step = || -> Result<(), Error> {
                        if opts.supersets {
                            expander.supersets(set, |sup| mark(sup, NULLIF | ONLY_SUP))?;
                        }
                        if opts.mutations && (opts.thorough || byte & ONLY_SUP == 0) {
                            expander.mutate_additive(set, |mutant| mark(mutant, NULLIF))?;
                            expander.mutate_multiplicative(set, |mutant| mark(mutant, NULLIF))?;
                        }
                        Ok(())
                    };
                    let outcome = step();
                    local.marked += newly;
                    if let Err(e) = outcome.and(mark_err.map_or(Ok(()), Err)) {
                        fault = Some(e);
                    }
                })?;
                match fault {
                    Some(e) => Err(e),
                    None => Ok(local),
                }
            }));
        }
        let mut merged = GenerationReport::default();
        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(local)) => {
                    merged.expanded += local.expanded;
                    merged.marked += local.marked;
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
        expanded = report.expanded,
        marked = report.marked,
        "generation pass finished"
    );
    Ok(report)
}
