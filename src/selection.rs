//! Replacement selection.
//!
//! Builds the initial sorted runs keeping at most `ways` records in memory. Every emitted record is replaced
//! by the next input record. A replacement that is not smaller than the last emitted record still fits in
//! the current run and joins the active heap, a smaller one is deferred to the next run through the overflow
//! heap. On random input this produces runs about twice as long as the memory budget.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io;

use log;

use crate::run::{Run, RunCodec, RunStore};
use crate::sort::{SortError, MIN_WAYS};
use crate::tokenizer::Tokenizer;
use crate::Record;

/// Replacement selection run generator.
pub struct ReplacementSelector<'a, C: RunCodec> {
    store: &'a RunStore<C>,
    /// Maximum number of records held in memory.
    ways: usize,

    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    active: BinaryHeap<Reverse<Record>>,
    overflow: BinaryHeap<Reverse<Record>>,
    peak_resident: usize,
}

impl<'a, C: RunCodec> ReplacementSelector<'a, C> {
    /// Creates a run generator creating runs in `store` and holding at most `ways` records in memory.
    /// Fails with [`SortError::InvalidWays`] if `ways` is less than [`MIN_WAYS`].
    pub fn new(store: &'a RunStore<C>, ways: usize) -> Result<Self, SortError> {
        if ways < MIN_WAYS {
            return Err(SortError::InvalidWays(ways));
        }

        // heaps grow with the input, `ways` may be far larger than the input itself
        return Ok(ReplacementSelector {
            store,
            ways,
            active: BinaryHeap::new(),
            overflow: BinaryHeap::new(),
            peak_resident: 0,
        });
    }

    /// Returns the highest number of records held in memory at once.
    pub fn peak_resident(&self) -> usize {
        self.peak_resident
    }

    fn resident(&self) -> usize {
        self.active.len() + self.overflow.len()
    }

    fn track_resident(&mut self) {
        let resident = self.resident();
        debug_assert!(resident <= self.ways);
        self.peak_resident = self.peak_resident.max(resident);
    }

    /// Splits the input into sorted runs.
    /// Returns the runs in the order they were produced and the number of input records.
    ///
    /// # Arguments
    /// * `input` - Text stream of whitespace separated integers
    pub fn generate_runs<R: io::BufRead>(&mut self, input: R) -> Result<(Vec<Run>, u64), SortError> {
        let mut tokens = Tokenizer::new(input);
        let mut records: u64 = 0;
        let mut runs = Vec::new();

        while self.active.len() < self.ways {
            match tokens.next_int()? {
                Some(record) => {
                    self.active.push(Reverse(record));
                    records += 1;
                }
                None => break,
            }
        }
        self.track_resident();

        if self.active.is_empty() {
            log::debug!("input is empty, no runs generated");
            return Ok((runs, records));
        }

        let mut run = self.store.writer()?;
        while let Some(Reverse(last_emitted)) = self.active.pop() {
            run.push(last_emitted)?;

            if let Some(record) = tokens.next_int()? {
                records += 1;
                if record >= last_emitted {
                    self.active.push(Reverse(record));
                } else {
                    self.overflow.push(Reverse(record));
                }
                self.track_resident();
            }

            if self.active.is_empty() {
                let finished = run.finish()?;
                log::debug!("run #{} saved ({} records)", runs.len() + 1, finished.records());
                runs.push(finished);

                if self.overflow.is_empty() {
                    break;
                }
                // the deferred records start the next run
                std::mem::swap(&mut self.active, &mut self.overflow);
                run = self.store.writer()?;
            }
        }

        return Ok((runs, records));
    }
}
