use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use crate::combinadics::{binomial, increment, index_to_set, is_ascending, set_to_index};
use crate::error::Error;

/// Longest fixed tail a record may carry.
pub const MAX_FIXED: usize = 4;

/// Entries between two progress-cell refreshes during a scan.
pub const PROGRESS_PERIOD: u64 = 4096;

/// Bytes reserved at the head of a record file for caller metadata.
pub const RESERVED_LEN: usize = 0x0800;

/// A dense map from addressable sets to atomic mark bytes.
///
/// Every set tracked by a record has total length `size` and splits into
/// a *variable segment* of `var_size` strictly ascending values, whose
/// largest value (the M-value) lies in `min_m..=max_m`, and a constant
/// *fixed tail* appended to every enumerated set. The variable segments
/// are enumerated in combinadic rank order, which keeps all sets sharing
/// an M-value contiguous.
///
/// Records start out unbound (no byte region); [`SetRecord::alloc`] or an
/// import binds them to a concrete region. Marking is an atomic fetch-OR,
/// so `&SetRecord` is all a worker thread needs to mark or scan.
pub struct SetRecord {
    size: usize,
    var_size: usize,
    min_m: u64,
    max_m: u64,
    fixed: Vec<u64>,
    bytes: Box<[AtomicU8]>,
    /// Rank of the first addressable variable segment, C(min_m - 1, var_size).
    base: u64,
    /// Opaque leading region of the file image, owned by the drivers.
    reserved: Mutex<Box<[u8]>>,
}

impl SetRecord {
    /// Creates an unbound record for sets of total length `size`.
    ///
    /// The record addresses nothing until [`SetRecord::alloc`] or
    /// [`SetRecord::import`](Self::import) binds it to a region.
    pub fn new(size: usize) -> Result<Self, Error> {
        if size < 1 {
            return Err(Error::InvalidInput("record set size must be at least 1"));
        }
        Ok(SetRecord {
            size,
            var_size: size,
            min_m: size as u64,
            max_m: size as u64 - 1,
            fixed: Vec::new(),
            bytes: Box::new([]),
            base: 0,
            reserved: Mutex::new(vec![0u8; RESERVED_LEN].into_boxed_slice()),
        })
    }

    /// Binds the record to a region and zeroes its bytes.
    ///
    /// `min_m` is raised to `var_size` if below it, and `max_m < min_m`
    /// collapses to the empty region. The fixed tail must be strictly
    /// ascending, start above `max_m`, hold at most [`MAX_FIXED`] values
    /// and fill exactly the gap between `var_size` and the record size.
    ///
    /// On success any prior binding is replaced; on failure it is kept.
    pub fn alloc(
        &mut self,
        var_size: usize,
        min_m: u64,
        max_m: u64,
        fixed: &[u64],
    ) -> Result<(), Error> {
        if var_size < 1 {
            return Err(Error::InvalidInput("variable segment must be non-empty"));
        }
        if fixed.len() > MAX_FIXED {
            return Err(Error::InvalidInput("fixed segment longer than four values"));
        }
        if var_size + fixed.len() != self.size {
            return Err(Error::InvalidInput(
                "variable and fixed segments must add up to the record size",
            ));
        }
        let min_m = min_m.max(var_size as u64);
        let max_m = if max_m < min_m { min_m - 1 } else { max_m };
        if !fixed.is_empty() {
            let ascending = fixed.windows(2).all(|w| w[0] < w[1]);
            if !ascending || fixed[0] <= max_m {
                return Err(Error::InvalidInput(
                    "fixed values must ascend strictly above the M-value range",
                ));
            }
        }

        let base = binomial(min_m.saturating_sub(1), var_size as u64);
        let total = binomial(max_m, var_size as u64) - base;
        let len = usize::try_from(total).map_err(|_| Error::Alloc(total))?;
        let mut bytes: Vec<AtomicU8> = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| Error::Alloc(total))?;
        bytes.resize_with(len, || AtomicU8::new(0));

        self.var_size = var_size;
        self.min_m = min_m;
        self.max_m = max_m;
        self.fixed = fixed.to_vec();
        self.bytes = bytes.into_boxed_slice();
        self.base = base;
        Ok(())
    }

    /// Total set length tracked by the record.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Length of the enumerated variable segment.
    pub fn var_size(&self) -> usize {
        self.var_size
    }

    /// Lower bound on the variable segment's M-value.
    pub fn min_m(&self) -> u64 {
        self.min_m
    }

    /// Upper bound on the variable segment's M-value.
    pub fn max_m(&self) -> u64 {
        self.max_m
    }

    /// Number of fixed-tail values.
    pub fn fixed_size(&self) -> usize {
        self.fixed.len()
    }

    /// The fixed tail appended to every addressable set.
    pub fn fixed(&self) -> &[u64] {
        &self.fixed
    }

    /// Number of addressable sets.
    pub fn total(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Copy of the reserved metadata region of the file image.
    pub fn metadata(&self) -> Box<[u8]> {
        self.lock_reserved().clone()
    }

    /// Overwrites the reserved metadata region, zero-padding to its
    /// full length. Input beyond [`RESERVED_LEN`] is rejected.
    pub fn set_metadata(&self, data: &[u8]) -> Result<(), Error> {
        if data.len() > RESERVED_LEN {
            return Err(Error::InvalidInput("metadata exceeds the reserved region"));
        }
        let mut region = self.lock_reserved();
        region.fill(0);
        region[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn lock_reserved(&self) -> std::sync::MutexGuard<'_, Box<[u8]>> {
        self.reserved.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn bytes(&self) -> &[AtomicU8] {
        &self.bytes
    }

    pub(super) fn install(
        &mut self,
        var_size: usize,
        min_m: u64,
        max_m: u64,
        fixed: Vec<u64>,
        bytes: Box<[AtomicU8]>,
        reserved: Box<[u8]>,
    ) {
        self.base = binomial(min_m.saturating_sub(1), var_size as u64);
        self.var_size = var_size;
        self.min_m = min_m;
        self.max_m = max_m;
        self.fixed = fixed;
        self.bytes = bytes;
        *self.lock_reserved() = reserved;
    }

    /// ORs `mask` into the byte for `set`.
    ///
    /// Returns `Ok(true)` when at least one bit of `mask` was newly set,
    /// `Ok(false)` when the byte already carried all of `mask` or the set
    /// is valid but not addressable here (M-value outside the range, or a
    /// fixed-tail mismatch). A set that is not strictly ascending or has
    /// the wrong length is an error.
    pub fn mark(&self, set: &[u64], mask: u8) -> Result<bool, Error> {
        if set.len() != self.size {
            return Err(Error::InvalidInput("set length differs from record size"));
        }
        if !is_ascending(set) {
            return Err(Error::InvalidInput("set must ascend strictly from 1 or above"));
        }
        let m_value = set[self.var_size - 1];
        if m_value < self.min_m || m_value > self.max_m {
            return Ok(false);
        }
        if set[self.var_size..] != self.fixed[..] {
            return Ok(false);
        }
        let offset = set_to_index(&set[..self.var_size]) - self.base;
        let prev = self.bytes[offset as usize].fetch_or(mask, Ordering::Relaxed);
        Ok(prev & mask != mask)
    }

    /// Scans every addressable set in rank order and reports the ones
    /// whose byte matches, returning the match count.
    ///
    /// With `mask != 0` a byte matches when its masked bits equal the
    /// masked `bits` exactly. With `mask == 0`, `bits` acts as an
    /// any-of-these filter, and `bits == 0` matches every set.
    ///
    /// `out` receives the full set (fixed tail included) and the byte; the
    /// slice is only valid for the duration of the call. `progress`, when
    /// given, is refreshed with the number of visited entries every
    /// [`PROGRESS_PERIOD`] entries and once at the end.
    pub fn query<F>(&self, mask: u8, bits: u8, progress: Option<&AtomicU64>, out: F) -> u64
    where
        F: FnMut(&[u64], u8),
    {
        self.scan(mask, bits, 1, 0, progress, out)
    }

    /// Like [`SetRecord::query`], but visits only entries whose rank
    /// offset is `offset` modulo `stride`, so `stride` workers with
    /// offsets `0..stride` cover the record exactly once.
    pub fn query_parallel<F>(
        &self,
        mask: u8,
        bits: u8,
        stride: u64,
        offset: u64,
        progress: Option<&AtomicU64>,
        out: F,
    ) -> Result<u64, Error>
    where
        F: FnMut(&[u64], u8),
    {
        if stride == 0 || offset >= stride {
            return Err(Error::InvalidInput("scan offset must lie below the stride"));
        }
        Ok(self.scan(mask, bits, stride, offset, progress, out))
    }

    fn scan<F>(
        &self,
        mask: u8,
        bits: u8,
        stride: u64,
        offset: u64,
        progress: Option<&AtomicU64>,
        mut out: F,
    ) -> u64
    where
        F: FnMut(&[u64], u8),
    {
        let total = self.total();
        if offset >= total {
            if let Some(cell) = progress {
                cell.store(0, Ordering::Relaxed);
            }
            return 0;
        }

        // Build the first set from its rank, then step the cursor; the
        // cascade in `increment` is what keeps long scans cheap.
        let mut cur = vec![0u64; self.size];
        cur[self.var_size..].copy_from_slice(&self.fixed);
        index_to_set(self.base + offset, &mut cur[..self.var_size]);

        let mut count = 0u64;
        let mut visited = 0u64;
        let mut i = offset;
        loop {
            let byte = self.bytes[i as usize].load(Ordering::Relaxed);
            if byte_matches(byte, mask, bits) {
                out(&cur, byte);
                count += 1;
            }
            visited += 1;
            if visited % PROGRESS_PERIOD == 0 {
                if let Some(cell) = progress {
                    cell.store(visited, Ordering::Relaxed);
                }
            }
            i += stride;
            if i >= total {
                break;
            }
            increment(&mut cur[..self.var_size], stride);
        }
        if let Some(cell) = progress {
            cell.store(visited, Ordering::Relaxed);
        }
        count
    }
}

fn byte_matches(byte: u8, mask: u8, bits: u8) -> bool {
    if mask != 0 {
        byte & mask == bits & mask
    } else if bits != 0 {
        byte & bits != 0
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MARKED, NULLIF, ONLY_SUP};

    fn bound(size: usize, var_size: usize, min_m: u64, max_m: u64, fixed: &[u64]) -> SetRecord {
        let mut rec = SetRecord::new(size).unwrap();
        rec.alloc(var_size, min_m, max_m, fixed).unwrap();
        rec
    }

    #[test]
    fn new_rejects_zero_size() {
        assert!(SetRecord::new(0).is_err());
    }

    #[test]
    fn unbound_record_is_empty() {
        let rec = SetRecord::new(3).unwrap();
        assert_eq!(rec.total(), 0);
        assert_eq!(rec.query(0, 0, None, |_, _| {}), 0);
        assert_eq!(rec.mark(&[1, 2, 3], NULLIF).unwrap(), false);
    }

    #[test]
    fn alloc_counts_the_region() {
        // All size-3 sets with M-value 3..=10.
        let rec = bound(3, 3, 1, 10, &[]);
        assert_eq!(rec.min_m(), 3, "min_m normalizes up to var_size");
        assert_eq!(rec.total(), binomial(10, 3));

        // A single M-value block.
        let rec = bound(3, 3, 10, 10, &[]);
        assert_eq!(rec.total(), binomial(10, 3) - binomial(9, 3));
    }

    #[test]
    fn alloc_collapses_inverted_range_to_empty() {
        let rec = bound(2, 2, 9, 3, &[]);
        assert_eq!(rec.total(), 0);
        assert_eq!(rec.query(0, 0, None, |_, _| {}), 0);
    }

    #[test]
    fn alloc_validates_fixed_tail() {
        let mut rec = SetRecord::new(6).unwrap();
        // too long
        assert!(rec.alloc(1, 1, 4, &[5, 6, 7, 8, 9]).is_err());
        // wrong arity
        assert!(rec.alloc(2, 2, 4, &[5]).is_err());
        // not ascending
        assert!(rec.alloc(2, 2, 4, &[9, 8, 7, 6]).is_err());
        // must clear max_m
        assert!(rec.alloc(2, 2, 4, &[4, 6, 7, 8]).is_err());
        assert!(rec.alloc(2, 2, 4, &[5, 6, 7, 8]).is_ok());
    }

    #[test]
    fn size_one_records_enumerate_single_values() {
        let rec = bound(1, 1, 1, 12, &[]);
        assert_eq!(rec.total(), 12);
        let mut seen = Vec::new();
        rec.query(0, 0, None, |set, _| seen.push(set[0]));
        assert_eq!(seen, (1..=12).collect::<Vec<u64>>());
    }

    #[test]
    fn mark_then_query_round_trip() {
        let rec = bound(3, 3, 3, 9, &[]);
        assert_eq!(rec.mark(&[2, 4, 7], NULLIF).unwrap(), true);
        assert_eq!(rec.mark(&[2, 4, 7], NULLIF).unwrap(), false, "no new bit");
        assert_eq!(rec.mark(&[2, 4, 7], MARKED).unwrap(), true, "second bit is new");

        let mut hits = Vec::new();
        let count = rec.query(NULLIF, NULLIF, None, |set, byte| {
            hits.push((set.to_vec(), byte));
        });
        assert_eq!(count, 1);
        assert_eq!(hits, vec![(vec![2, 4, 7], MARKED)]);
    }

    #[test]
    fn mark_rejects_malformed_sets() {
        let rec = bound(3, 3, 3, 9, &[]);
        assert!(rec.mark(&[4, 2, 7], NULLIF).is_err());
        assert!(rec.mark(&[2, 2, 7], NULLIF).is_err());
        assert!(rec.mark(&[2, 4], NULLIF).is_err());
        assert!(rec.mark(&[0, 4, 7], NULLIF).is_err());
    }

    #[test]
    fn mark_skips_unaddressable_sets() {
        let rec = bound(3, 3, 5, 7, &[]);
        // M-value below and above the range
        assert_eq!(rec.mark(&[1, 2, 4], NULLIF).unwrap(), false);
        assert_eq!(rec.mark(&[1, 2, 9], NULLIF).unwrap(), false);
        // in range
        assert_eq!(rec.mark(&[1, 2, 6], NULLIF).unwrap(), true);
    }

    #[test]
    fn fixed_tail_gates_addressability() {
        let rec = bound(4, 2, 2, 6, &[8, 9]);
        assert_eq!(rec.total(), binomial(6, 2) - binomial(1, 2));
        assert_eq!(rec.mark(&[3, 5, 8, 9], NULLIF).unwrap(), true);
        // tail mismatch is a silent skip
        assert_eq!(rec.mark(&[3, 5, 7, 9], NULLIF).unwrap(), false);
        assert_eq!(rec.mark(&[3, 5, 8, 10], NULLIF).unwrap(), false);

        let mut hits = Vec::new();
        rec.query(NULLIF, NULLIF, None, |set, _| hits.push(set.to_vec()));
        assert_eq!(hits, vec![vec![3, 5, 8, 9]]);
    }

    #[test]
    fn query_visits_every_set_once() {
        let rec = bound(3, 3, 3, 10, &[]);
        let mut seen = Vec::new();
        let count = rec.query(0, 0, None, |set, _| seen.push(set.to_vec()));
        assert_eq!(count, rec.total());
        assert_eq!(seen.len() as u64, rec.total());
        // rank order, no duplicates
        for pair in seen.windows(2) {
            assert!(set_to_index(&pair[0]) < set_to_index(&pair[1]));
        }
    }

    #[test]
    fn query_masked_and_wildcard_matching() {
        let rec = bound(2, 2, 2, 8, &[]);
        rec.mark(&[1, 3], NULLIF).unwrap();
        rec.mark(&[2, 5], ONLY_SUP).unwrap();
        rec.mark(&[4, 7], MARKED).unwrap();

        // exact masked equality
        assert_eq!(rec.query(MARKED, NULLIF, None, |_, _| {}), 1);
        // any-of wildcard
        assert_eq!(rec.query(0, MARKED, None, |_, _| {}), 3);
        assert_eq!(rec.query(0, ONLY_SUP, None, |_, _| {}), 2);
        // fully unmarked
        assert_eq!(rec.query(NULLIF, 0, None, |_, _| {}), rec.total() - 2);
    }

    #[test]
    fn parallel_scans_partition_the_record() {
        let rec = bound(3, 3, 3, 10, &[]);
        rec.mark(&[1, 2, 4], NULLIF).unwrap();
        rec.mark(&[3, 5, 9], NULLIF).unwrap();
        rec.mark(&[4, 6, 10], NULLIF).unwrap();

        let mut whole = Vec::new();
        let full = rec.query(NULLIF, NULLIF, None, |set, _| whole.push(set.to_vec()));
        whole.sort();

        for workers in [1u64, 2, 3, 4, 8] {
            let mut merged = Vec::new();
            let mut counts = 0;
            for w in 0..workers {
                counts += rec
                    .query_parallel(NULLIF, NULLIF, workers, w, None, |set, _| {
                        merged.push(set.to_vec())
                    })
                    .unwrap();
            }
            merged.sort();
            assert_eq!(counts, full, "{} workers", workers);
            assert_eq!(merged, whole, "{} workers", workers);
        }
    }

    #[test]
    fn parallel_scan_rejects_bad_offsets() {
        let rec = bound(2, 2, 2, 6, &[]);
        assert!(rec.query_parallel(0, 0, 4, 4, None, |_, _| {}).is_err());
        assert!(rec.query_parallel(0, 0, 0, 0, None, |_, _| {}).is_err());
    }

    #[test]
    fn progress_cell_reaches_the_visit_count() {
        let rec = bound(2, 2, 2, 120, &[]);
        let cell = AtomicU64::new(0);
        rec.query(0, 0, Some(&cell), |_, _| {});
        assert_eq!(cell.load(Ordering::Relaxed), rec.total());

        let cell = AtomicU64::new(0);
        rec.query_parallel(0, 0, 3, 1, Some(&cell), |_, _| {}).unwrap();
        let expected = (rec.total() - 1).div_ceil(3);
        assert_eq!(cell.load(Ordering::Relaxed), expected);
    }

    #[test]
    fn concurrent_marks_are_not_lost() {
        use std::thread;

        let rec = bound(3, 3, 3, 12, &[]);
        let all: Vec<Vec<u64>> = {
            let mut v = Vec::new();
            rec.query(0, 0, None, |set, _| v.push(set.to_vec()));
            v
        };
        let all = &all;
        thread::scope(|s| {
            for chunk in all.chunks(all.len().div_ceil(4)) {
                let rec = &rec;
                s.spawn(move || {
                    for set in chunk {
                        rec.mark(set, NULLIF).unwrap();
                    }
                });
            }
            // disjoint masks on the same bytes from yet another thread
            let rec = &rec;
            s.spawn(move || {
                for set in all {
                    rec.mark(set, ONLY_SUP).unwrap();
                }
            });
        });
        assert_eq!(rec.query(MARKED, MARKED, None, |_, _| {}), rec.total());
    }

    #[test]
    fn metadata_round_trips_and_is_bounded() {
        let rec = bound(2, 2, 2, 6, &[]);
        rec.set_metadata(b"note\n").unwrap();
        let meta = rec.metadata();
        assert_eq!(&meta[..5], b"note\n");
        assert_eq!(meta.len(), RESERVED_LEN);
        assert!(rec.set_metadata(&vec![0u8; RESERVED_LEN + 1]).is_err());
    }
}
