//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use crate::merger::RunMerger;
use crate::run::{RunCodec, RunError, RunStore, TextRunCodec};
use crate::selection::ReplacementSelector;
use crate::tokenizer::TokenizeError;

/// Smallest number of ways a sorter can be configured with.
pub const MIN_WAYS: usize = 2;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Number of ways is less than [`MIN_WAYS`].
    InvalidWays(usize),
    /// Read/write buffer size is zero.
    InvalidBufSize,
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Common I/O error.
    IO(io::Error),
    /// Input data stream error.
    InputError(TokenizeError),
    /// Run file error.
    RunError(RunError),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::InvalidWays(_) => None,
            SortError::InvalidBufSize => None,
            SortError::TempDir(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::InputError(err) => Some(err),
            SortError::RunError(err) => Some(err),
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidWays(ways) => {
                write!(f, "number of ways must be at least {}, got {}", MIN_WAYS, ways)
            }
            SortError::InvalidBufSize => write!(f, "read/write buffer size must be positive"),
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
            SortError::RunError(err) => write!(f, "run processing failed: {}", err),
        }
    }
}

impl From<TokenizeError> for SortError {
    fn from(err: TokenizeError) -> Self {
        SortError::InputError(err)
    }
}

impl From<RunError> for SortError {
    fn from(err: RunError) -> Self {
        SortError::RunError(err)
    }
}

/// Sorting summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortReport {
    /// Number of sorted records.
    pub records: u64,
    /// Number of ways (memory budget in records and merge fan-in).
    pub ways: usize,
    /// Number of runs generated by replacement selection.
    pub runs: usize,
    /// Number of merge passes.
    pub passes: usize,
    /// Highest number of records held in memory at once.
    pub peak_resident: usize,
    /// Highest number of simultaneously open run and output files, the input stream excluded.
    pub peak_open_runs: usize,
}

impl Display for SortReport {
    /// Renders the report header followed by the counters, each left-justified to 5 characters.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#Regs Ways #Runs #Parses")?;
        write!(f, "{:<5} {:<5} {:<5} {:<5}", self.records, self.ways, self.runs, self.passes)
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
pub struct ExternalSorterBuilder<C = TextRunCodec>
where
    C: RunCodec,
{
    /// Number of records held in memory and number of runs merged at once.
    ways: usize,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,

    /// Run codec type.
    run_codec_type: PhantomData<C>,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }
}

impl<C> ExternalSorterBuilder<C>
where
    C: RunCodec,
{
    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<C>, SortError> {
        ExternalSorter::new(self.ways, self.tmp_dir.as_deref(), self.rw_buf_size)
    }

    /// Sets number of ways: the number of records held in memory while runs are generated
    /// and the number of runs merged at once.
    pub fn with_ways(mut self, ways: usize) -> ExternalSorterBuilder<C> {
        self.ways = ways;
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<C> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets run file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<C> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets run file codec.
    pub fn with_run_codec<D: RunCodec>(self) -> ExternalSorterBuilder<D> {
        ExternalSorterBuilder {
            ways: self.ways,
            tmp_dir: self.tmp_dir,
            rw_buf_size: self.rw_buf_size,
            run_codec_type: PhantomData,
        }
    }
}

impl<C> Default for ExternalSorterBuilder<C>
where
    C: RunCodec,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            ways: MIN_WAYS,
            tmp_dir: None,
            rw_buf_size: None,
            run_codec_type: PhantomData,
        }
    }
}

/// External sorter.
/// Sorts whitespace separated integers using replacement selection followed by p-way merge passes.
pub struct ExternalSorter<C = TextRunCodec>
where
    C: RunCodec,
{
    /// Number of records held in memory and number of runs merged at once.
    ways: usize,
    /// Run files storage.
    store: RunStore<C>,
    /// Input file read buffer size.
    rw_buf_size: Option<usize>,
}

impl<C> ExternalSorter<C>
where
    C: RunCodec,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `ways` - Number of records held in memory while runs are generated and number of runs merged at once.
    ///   Must be at least [`MIN_WAYS`].
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Input and run files read/write buffer size. Must be positive.
    pub fn new(ways: usize, tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> Result<Self, SortError> {
        if ways < MIN_WAYS {
            return Err(SortError::InvalidWays(ways));
        }
        if rw_buf_size == Some(0) {
            return Err(SortError::InvalidBufSize);
        }

        return Ok(ExternalSorter {
            ways,
            store: RunStore::new(tmp_path, rw_buf_size).map_err(SortError::TempDir)?,
            rw_buf_size,
        });
    }

    /// Returns the number of ways.
    pub fn ways(&self) -> usize {
        self.ways
    }

    /// Sorts integers read from `input` and saves them to `output`, one per line.
    ///
    /// # Arguments
    /// * `input` - Text stream of whitespace separated integers
    /// * `output` - Path the sorted file is saved at. An existing file is replaced.
    pub fn sort<R>(&self, input: R, output: &Path) -> Result<SortReport, SortError>
    where
        R: io::BufRead,
    {
        self.store.open_files().reset_peak();

        log::info!("generating initial runs (ways: {})", self.ways);
        let mut selector = ReplacementSelector::new(&self.store, self.ways)?;
        let (runs, records) = selector.generate_runs(input)?;
        let initial_runs = runs.len();
        log::info!("{} records split into {} runs", records, initial_runs);

        let passes = RunMerger::new(&self.store, self.ways)?.merge(runs, output)?;
        log::info!("sorted data saved to {} ({} merge passes)", output.display(), passes);

        return Ok(SortReport {
            records,
            ways: self.ways,
            runs: initial_runs,
            passes,
            peak_resident: selector.peak_resident(),
            peak_open_runs: self.store.open_files().peak(),
        });
    }

    /// Sorts integers of the `input` file and saves them to `output`, one per line.
    pub fn sort_file(&self, input: &Path, output: &Path) -> Result<SortReport, SortError> {
        let file = fs::File::open(input).map_err(SortError::IO)?;
        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        self.sort(reader, output)
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::Cursor;
    use std::path::Path;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{ExternalSorter, ExternalSorterBuilder, SortError, SortReport};
    use crate::run::RmpRunCodec;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn read_output(path: &Path) -> Vec<i64> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| line.parse().unwrap())
            .collect()
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_external_sorter(tmp_dir: tempfile::TempDir, #[case] msgpack: bool) {
        let input_sorted = Vec::from_iter((0..1000).map(|item| item / 3 - 100));

        let mut input_shuffled = input_sorted.clone();
        input_shuffled.shuffle(&mut rand::thread_rng());
        let input = input_shuffled
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .chunks(7)
            .map(|line| line.join(" "))
            .collect::<Vec<_>>()
            .join("\n");

        let output = tmp_dir.path().join("output.txt");
        let builder = ExternalSorterBuilder::new()
            .with_ways(4)
            .with_rw_buf_size(64)
            .with_tmp_dir(tmp_dir.path());
        let report = if msgpack {
            let sorter = builder.with_run_codec::<RmpRunCodec>().build().unwrap();
            sorter.sort(Cursor::new(input), &output).unwrap()
        } else {
            let sorter = builder.build().unwrap();
            sorter.sort(Cursor::new(input), &output).unwrap()
        };

        assert_eq!(read_output(&output), input_sorted);
        assert_eq!(report.records, 1000);
        assert_eq!(report.ways, 4);
        assert!(report.runs > 1);
        assert!(report.passes >= 1);
        assert!(report.peak_resident <= 4);
        assert!(report.peak_open_runs <= 5);
    }

    #[rstest]
    fn test_worked_example(tmp_dir: tempfile::TempDir) {
        let output = tmp_dir.path().join("output.txt");
        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_ways(3)
            .with_tmp_dir(tmp_dir.path())
            .build()
            .unwrap();

        let report = sorter.sort(Cursor::new("5 3 8 1 9 2 7\n"), &output).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "1\n2\n3\n5\n7\n8\n9\n");
        assert_eq!((report.records, report.ways, report.runs, report.passes), (7, 3, 2, 1));
        assert_eq!(report.to_string(), "#Regs Ways #Runs #Parses\n7     3     2     1    ");
    }

    #[rstest]
    #[case("", 0, 0)]
    #[case("17", 1, 1)]
    #[case("1 2\n2 3 5", 5, 1)]
    fn test_no_merge_needed(
        tmp_dir: tempfile::TempDir,
        #[case] input: &str,
        #[case] records: u64,
        #[case] runs: usize,
    ) {
        let output = tmp_dir.path().join("output.txt");
        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_ways(5)
            .with_tmp_dir(tmp_dir.path())
            .build()
            .unwrap();

        let report = sorter.sort(Cursor::new(input), &output).unwrap();

        let expected = Vec::from_iter(input.split_whitespace().map(|token| token.parse::<i64>().unwrap()));
        assert_eq!(read_output(&output), expected);
        assert_eq!(
            report,
            SortReport {
                records,
                ways: 5,
                runs,
                passes: 0,
                peak_resident: records as usize,
                peak_open_runs: runs,
            }
        );
    }

    #[rstest]
    fn test_sort_file(tmp_dir: tempfile::TempDir) {
        let input = tmp_dir.path().join("input.txt");
        let output = tmp_dir.path().join("output.txt");
        fs::write(&input, "10 -1 7\n3\n\n-20 4 4\n").unwrap();

        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_ways(2)
            .with_tmp_dir(tmp_dir.path())
            .build()
            .unwrap();
        let report = sorter.sort_file(&input, &output).unwrap();

        assert_eq!(read_output(&output), vec![-20, -1, 3, 4, 4, 7, 10]);
        assert_eq!(report.records, 7);
        assert!(report.peak_open_runs <= 3);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    fn test_invalid_ways(tmp_dir: tempfile::TempDir, #[case] ways: usize) {
        let result: Result<ExternalSorter, _> = ExternalSorterBuilder::new()
            .with_ways(ways)
            .with_tmp_dir(tmp_dir.path())
            .build();

        assert!(matches!(result, Err(SortError::InvalidWays(w)) if w == ways));
    }

    #[rstest]
    fn test_invalid_rw_buf_size(tmp_dir: tempfile::TempDir) {
        let result: Result<ExternalSorter, _> = ExternalSorterBuilder::new()
            .with_rw_buf_size(0)
            .with_tmp_dir(tmp_dir.path())
            .build();

        assert!(matches!(result, Err(SortError::InvalidBufSize)));
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    fn test_small_rw_buf_size(tmp_dir: tempfile::TempDir, #[case] buf_size: usize) {
        let input = tmp_dir.path().join("input.txt");
        let output = tmp_dir.path().join("output.txt");
        fs::write(&input, "300 -12 7
45 0
").unwrap();

        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_ways(2)
            .with_rw_buf_size(buf_size)
            .with_tmp_dir(tmp_dir.path())
            .build()
            .unwrap();
        let report = sorter.sort_file(&input, &output).unwrap();

        assert_eq!(report.records, 5);
        assert_eq!(read_output(&output), vec![-12, 0, 7, 45, 300]);
    }

    #[rstest]
    fn test_ways_exceed_input(tmp_dir: tempfile::TempDir) {
        let output = tmp_dir.path().join("output.txt");
        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_ways(usize::MAX / 2)
            .with_tmp_dir(tmp_dir.path())
            .build()
            .unwrap();

        let report = sorter.sort(Cursor::new("3 1 2"), &output).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "1\n2\n3\n");
        assert_eq!((report.records, report.runs, report.passes), (3, 1, 0));
    }

    #[rstest]
    fn test_invalid_input_leaves_no_output(tmp_dir: tempfile::TempDir) {
        let output = tmp_dir.path().join("output.txt");
        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_ways(2)
            .with_tmp_dir(tmp_dir.path())
            .build()
            .unwrap();

        let result = sorter.sort(Cursor::new("4 3 2 1 0 -1 zero"), &output);

        assert!(matches!(result, Err(SortError::InputError(_))));
        assert!(!output.exists());
    }

    #[rstest]
    fn test_missing_input_file(tmp_dir: tempfile::TempDir) {
        let sorter: ExternalSorter = ExternalSorterBuilder::new().with_tmp_dir(tmp_dir.path()).build().unwrap();

        let result = sorter.sort_file(&tmp_dir.path().join("missing.txt"), &tmp_dir.path().join("output.txt"));

        assert!(matches!(result, Err(SortError::IO(_))));
    }
}
