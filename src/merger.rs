//! Binary heap merger.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::error::Error;
use std::fs;
use std::path::Path;

use log;

use crate::run::{Run, RunCodec, RunStore};
use crate::sort::{SortError, MIN_WAYS};

/// Merge frontier entry: the current head of a source tagged by the source index.
/// Entries are ordered by value, equal values by source index, in reverse so that
/// [`BinaryHeap`] pops the smallest one first.
#[derive(Debug, PartialEq, Eq)]
struct MergeEntry<T> {
    value: T,
    source: usize,
}

impl<T: Ord> Ord for MergeEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .value
            .cmp(&self.value)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl<T: Ord> PartialOrd for MergeEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Binary heap merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of items,
/// *n* is the number of chunks (inputs).
/// Equal items are returned in the order of the inputs they come from.
pub struct BinaryHeapMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: IntoIterator<Item = Result<T, E>>,
{
    items: BinaryHeap<MergeEntry<T>>,
    chunks: Vec<C::IntoIter>,
    initiated: bool,
}

impl<T, E, C> BinaryHeapMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: IntoIterator<Item = Result<T, E>>,
{
    /// Creates an instance of a binary heap merger using chunks as inputs.
    /// Chunk items should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `chunks` - Chunks to be merged in a single sorted one
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| c.into_iter()));
        let items = BinaryHeap::with_capacity(chunks.len());

        return BinaryHeapMerger {
            chunks,
            items,
            initiated: false,
        };
    }
}

impl<T, E, C> Iterator for BinaryHeapMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: IntoIterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            for (idx, chunk) in self.chunks.iter_mut().enumerate() {
                if let Some(item) = chunk.next() {
                    match item {
                        Ok(item) => self.items.push(MergeEntry { value: item, source: idx }),
                        Err(err) => return Some(Err(err)),
                    }
                }
            }
            self.initiated = true;
        }

        let MergeEntry { value, source } = self.items.pop()?;
        if let Some(item) = self.chunks[source].next() {
            match item {
                Ok(item) => self.items.push(MergeEntry { value: item, source }),
                Err(err) => return Some(Err(err)),
            }
        }

        return Some(Ok(value));
    }
}

/// P-way run merger.
/// Repeatedly merges groups of up to `ways` runs until a single run is left.
pub struct RunMerger<'a, C: RunCodec> {
    store: &'a RunStore<C>,
    ways: usize,
}

impl<'a, C: RunCodec> RunMerger<'a, C> {
    /// Creates a merger reading and creating runs in `store` and merging up to `ways` runs at once.
    /// Fails with [`SortError::InvalidWays`] if `ways` is less than [`MIN_WAYS`].
    pub fn new(store: &'a RunStore<C>, ways: usize) -> Result<Self, SortError> {
        if ways < MIN_WAYS {
            return Err(SortError::InvalidWays(ways));
        }

        return Ok(RunMerger { store, ways });
    }

    /// Merges `runs` into a single sorted file saved at `output`.
    /// Returns the number of merge passes performed.
    ///
    /// No runs result in an empty output file, a single run is moved to `output` without merging.
    pub fn merge(&self, runs: Vec<Run>, output: &Path) -> Result<usize, SortError> {
        let mut runs = runs;
        let mut passes = 0;

        while runs.len() > 1 {
            passes += 1;
            log::debug!("merge pass {} started ({} runs)", passes, runs.len());

            let mut merged = Vec::new();
            let mut pending = runs.into_iter();
            loop {
                let group = Vec::from_iter(pending.by_ref().take(self.ways));
                if group.is_empty() {
                    break;
                }
                merged.push(self.merge_group(group)?);
            }

            log::info!("merge pass {} done ({} runs left)", passes, merged.len());
            runs = merged;
        }

        match runs.pop() {
            Some(run) => self.store.persist(run, output)?,
            None => {
                fs::File::create(output).map_err(SortError::IO)?;
            }
        }

        return Ok(passes);
    }

    /// Merges up to `ways` runs into a new one. The merged runs are deleted.
    pub fn merge_group(&self, runs: Vec<Run>) -> Result<Run, SortError> {
        debug_assert!(runs.len() <= self.ways);

        let mut readers = Vec::with_capacity(runs.len());
        for run in runs {
            readers.push(self.store.reader(run)?);
        }

        let mut writer = self.store.writer()?;
        for record in BinaryHeapMerger::new(readers) {
            writer.push(record?)?;
        }

        return Ok(writer.finish()?);
    }
}
