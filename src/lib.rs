//! `pway-sort` is an external integer sort built on replacement selection and p-way merging.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! Sorting is done in two phases, both limited by the same parameter `p` (the number of "ways"):
//!
//! * **Replacement selection:**
//!   at most `p` records are held in memory. The smallest one is written to the current run and replaced
//!   with the next input record. Records too small for the current run are deferred to the next one, so
//!   runs are usually about twice as long as the memory budget.
//! * **P-way merge:**
//!   runs are merged in groups of up to `p` using a min-heap until a single run is left. At most `p + 1`
//!   run files are open at any time.
//!
//! Input is a text stream of integers separated by any whitespace, output is a text file with one integer
//! per line.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use env_logger;
//! use log;
//!
//! use pway_sort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();
//!
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_ways(64)
//!         .with_tmp_dir(Path::new("./"))
//!         .build()
//!         .unwrap();
//!
//!     let report = sorter.sort_file(Path::new("input.txt"), Path::new("output.txt")).unwrap();
//!
//!     println!("{}", report);
//! }
//! ```

pub mod merger;
pub mod run;
pub mod selection;
pub mod sort;
pub mod tokenizer;

/// Sorted record type.
pub type Record = i64;

pub use merger::{BinaryHeapMerger, RunMerger};
pub use run::{RmpRunCodec, Run, RunCodec, RunError, RunStore, TextRunCodec};
pub use selection::ReplacementSelector;
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortReport};
pub use tokenizer::{TokenizeError, Tokenizer};
