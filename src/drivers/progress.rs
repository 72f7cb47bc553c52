use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;

/// Shared progress state for one drive pass.
///
/// Each worker owns one cell and stores the number of scan entries it
/// has visited; readers take best-effort snapshots, so plain relaxed
/// loads and stores are all that is needed. The auxiliary counter backs
/// whatever the third snapshot word means for the pass (sets passed for
/// a weed, nothing for a generation unless requested).
pub struct ProgressBoard {
    cells: Vec<AtomicU64>,
    total: u64,
    aux: AtomicU64,
}

impl ProgressBoard {
    /// A board for `workers` cells over a scan of `total` entries.
    pub fn new(workers: usize, total: u64) -> Self {
        ProgressBoard {
            cells: (0..workers).map(|_| AtomicU64::new(0)).collect(),
            total,
            aux: AtomicU64::new(0),
        }
    }

    /// The cell owned by worker `w`.
    pub fn cell(&self, w: usize) -> &AtomicU64 {
        &self.cells[w]
    }

    /// The auxiliary counter.
    pub fn aux(&self) -> &AtomicU64 {
        &self.aux
    }

    /// Entries visited so far, summed over all workers.
    pub fn elapsed(&self) -> u64 {
        self.cells
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Total entries the pass will visit.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Writes the snapshot payload: elapsed, total and `third` as three
    /// little-endian 64-bit words.
    pub fn write_snapshot<W: Write>(&self, writer: &mut W, third: u64) -> Result<(), Error> {
        writer.write_all(&self.elapsed().to_le_bytes())?;
        writer.write_all(&self.total.to_le_bytes())?;
        writer.write_all(&third.to_le_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Truncates `path` and rewrites the snapshot payload into it.
    pub fn snapshot_to_path(&self, path: &Path, third: u64) -> Result<(), Error> {
        let mut file = File::create(path)?;
        self.write_snapshot(&mut file, third)
    }
}
