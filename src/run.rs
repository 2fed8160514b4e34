//! Run files.
//!
//! A run is a sorted sequence of records stored in a temporary file. Runs are written once, read once and
//! deleted as soon as their reader is dropped. [`RunStore`] owns the scratch directory all the runs are
//! created in, so any run left behind (for example after a failure) is removed together with the store.

use std::cell::Cell;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::path::Path;
use std::rc::Rc;

use log;
use tempfile;

use crate::tokenizer::{TokenizeError, Tokenizer};
use crate::Record;

/// Run file error.
#[derive(Debug)]
pub enum RunError {
    /// Common I/O error.
    IO(io::Error),
    /// Record serialization error.
    SerializationError(rmp_serde::encode::Error),
    /// Record deserialization error.
    DeserializationError(rmp_serde::decode::Error),
    /// Text run parsing error.
    ParseError(TokenizeError),
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            RunError::IO(err) => err,
            RunError::SerializationError(err) => err,
            RunError::DeserializationError(err) => err,
            RunError::ParseError(err) => err,
        })
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            RunError::IO(err) => write!(f, "run file I/O operation failed: {}", err),
            RunError::SerializationError(err) => write!(f, "run record serialization error: {}", err),
            RunError::DeserializationError(err) => write!(f, "run record deserialization error: {}", err),
            RunError::ParseError(err) => write!(f, "run record parsing error: {}", err),
        }
    }
}

impl From<io::Error> for RunError {
    fn from(err: io::Error) -> Self {
        RunError::IO(err)
    }
}

/// Run codec interface. Defines how records are laid out in a run file and provides a way to read them back.
pub trait RunCodec: Sized + Iterator<Item = Result<Record, RunError>> {
    /// Whether a run file is already in the sorted output format (one decimal integer per line),
    /// so the final run can be moved to the output path as is.
    const PLAIN_TEXT: bool;

    /// Creates a decoder reading records from a run file.
    fn new(reader: io::Take<io::BufReader<fs::File>>) -> Self;

    /// Appends a record to a run file.
    fn write(writer: &mut io::BufWriter<fs::File>, record: Record) -> Result<(), RunError>;
}

/// Text run codec. Stores one decimal integer per line, the same format the sorted output uses.
pub struct TextRunCodec {
    tokens: Tokenizer<io::Take<io::BufReader<fs::File>>>,
}

impl RunCodec for TextRunCodec {
    const PLAIN_TEXT: bool = true;

    fn new(reader: io::Take<io::BufReader<fs::File>>) -> Self {
        TextRunCodec {
            tokens: Tokenizer::new(reader),
        }
    }

    fn write(writer: &mut io::BufWriter<fs::File>, record: Record) -> Result<(), RunError> {
        writeln!(writer, "{}", record)?;
        return Ok(());
    }
}

impl Iterator for TextRunCodec {
    type Item = Result<Record, RunError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.tokens
            .next()
            .map(|result| result.map_err(RunError::ParseError))
    }
}

/// RMP (Rust MessagePack) run codec.
/// It uses MessagePack as a record serialization format which is faster to decode than text.
/// For more information see https://msgpack.org/.
pub struct RmpRunCodec {
    reader: io::Take<io::BufReader<fs::File>>,
}

impl RunCodec for RmpRunCodec {
    const PLAIN_TEXT: bool = false;

    fn new(reader: io::Take<io::BufReader<fs::File>>) -> Self {
        RmpRunCodec { reader }
    }

    fn write(writer: &mut io::BufWriter<fs::File>, record: Record) -> Result<(), RunError> {
        rmp_serde::encode::write(writer, &record).map_err(RunError::SerializationError)
    }
}

impl Iterator for RmpRunCodec {
    type Item = Result<Record, RunError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.limit() == 0 {
            None
        } else {
            match rmp_serde::decode::from_read(&mut self.reader) {
                Ok(record) => Some(Ok(record)),
                Err(err) => Some(Err(RunError::DeserializationError(err))),
            }
        }
    }
}

#[derive(Default)]
struct OpenFilesState {
    current: Cell<usize>,
    peak: Cell<usize>,
}

/// Gauge of files the store currently has open: runs being written or read and the output file
/// while the final run is converted or copied. The caller's input stream is not counted, it adds
/// one descriptor on top of the gauge while runs are generated.
#[derive(Clone, Default)]
pub struct OpenFiles {
    state: Rc<OpenFilesState>,
}

impl OpenFiles {
    /// Returns the number of files open right now.
    pub fn current(&self) -> usize {
        self.state.current.get()
    }

    /// Returns the highest number of simultaneously open files since the last reset.
    pub fn peak(&self) -> usize {
        self.state.peak.get()
    }

    /// Lowers the peak to the current number of open run files.
    pub fn reset_peak(&self) {
        self.state.peak.set(self.state.current.get());
    }

    fn acquire(&self) -> OpenFileGuard {
        let current = self.state.current.get() + 1;
        self.state.current.set(current);
        if current > self.state.peak.get() {
            self.state.peak.set(current);
        }

        return OpenFileGuard {
            state: Rc::clone(&self.state),
        };
    }
}

/// Holds a slot of the [`OpenFiles`] gauge while a run file is open.
struct OpenFileGuard {
    state: Rc<OpenFilesState>,
}

impl Drop for OpenFileGuard {
    fn drop(&mut self) {
        self.state.current.set(self.state.current.get() - 1);
    }
}

/// Finished run. The run file is deleted when the handle is dropped.
pub struct Run {
    path: tempfile::TempPath,
    len: u64,
}

impl Run {
    /// Returns the run file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of records in the run.
    pub fn records(&self) -> u64 {
        self.len
    }
}

/// Writer of a new run. Records must be pushed in non-decreasing order.
pub struct RunWriter<C: RunCodec> {
    writer: io::BufWriter<fs::File>,
    path: tempfile::TempPath,
    len: u64,
    guard: OpenFileGuard,

    codec: PhantomData<C>,
}

impl<C: RunCodec> RunWriter<C> {
    /// Appends a record to the run.
    pub fn push(&mut self, record: Record) -> Result<(), RunError> {
        C::write(&mut self.writer, record)?;
        self.len += 1;

        return Ok(());
    }

    /// Flushes and closes the run file.
    pub fn finish(self) -> Result<Run, RunError> {
        let RunWriter {
            writer, path, len, guard, ..
        } = self;

        let file = writer.into_inner().map_err(|err| err.into_error())?;
        drop(file);
        drop(guard);

        return Ok(Run { path, len });
    }
}

/// Reader of a run. Consumes the run: the file is closed and deleted when the reader is dropped.
pub struct RunReader<C: RunCodec> {
    codec: C,
    // dropped after the codec so that the file is closed before it is deleted
    _path: tempfile::TempPath,
    _guard: OpenFileGuard,
}

impl<C: RunCodec> Iterator for RunReader<C> {
    type Item = Result<Record, RunError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.codec.next()
    }
}

/// Scratch directory the runs are created in.
pub struct RunStore<C: RunCodec = TextRunCodec> {
    /// Directory to be used to store run files.
    dir: tempfile::TempDir,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Open run files gauge.
    open_files: OpenFiles,

    codec: PhantomData<C>,
}

impl<C: RunCodec> RunStore<C> {
    /// Creates a new run store.
    ///
    /// # Arguments
    /// * `tmp_path` - Directory the scratch directory is created in. If the parameter is [`None`] default OS
    ///   temporary directory will be used.
    /// * `rw_buf_size` - Run files read/write buffer size. A zero size is rejected with
    ///   [`io::ErrorKind::InvalidInput`].
    pub fn new(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> io::Result<Self> {
        if rw_buf_size == Some(0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "read/write buffer size must be positive",
            ));
        }

        let dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(RunStore {
            dir,
            rw_buf_size,
            open_files: OpenFiles::default(),
            codec: PhantomData,
        });
    }

    /// Returns the scratch directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the open run files gauge.
    pub fn open_files(&self) -> &OpenFiles {
        &self.open_files
    }

    /// Creates a new uniquely named run file and returns its writer.
    pub fn writer(&self) -> Result<RunWriter<C>, RunError> {
        let tmp_file = tempfile::Builder::new()
            .prefix("run_")
            .suffix(".tmp")
            .tempfile_in(self.dir.path())?;
        let guard = self.open_files.acquire();

        let (file, path) = tmp_file.into_parts();
        let writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        return Ok(RunWriter {
            writer,
            path,
            len: 0,
            guard,
            codec: PhantomData,
        });
    }

    /// Opens a run for reading.
    pub fn reader(&self, run: Run) -> Result<RunReader<C>, RunError> {
        let file = fs::File::open(&run.path)?;
        let guard = self.open_files.acquire();

        let file_len = file.metadata()?.len();
        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(RunReader {
            codec: C::new(reader.take(file_len)),
            _path: run.path,
            _guard: guard,
        });
    }

    /// Places the final run at `output` as a text file with one record per line.
    /// Plain text runs are renamed (or copied if renaming is not possible, e.g. across file systems),
    /// other formats are converted.
    pub fn persist(&self, run: Run, output: &Path) -> Result<(), RunError> {
        if !C::PLAIN_TEXT {
            log::debug!("converting final run to {}", output.display());
            let _output_guard = self.open_files.acquire();
            let mut writer = io::BufWriter::new(fs::File::create(output)?);
            for record in self.reader(run)? {
                TextRunCodec::write(&mut writer, record?)?;
            }
            writer.flush()?;

            return Ok(());
        }

        if let Err(err) = run.path.persist(output) {
            log::warn!(
                "final run can't be renamed to {} ({}), copying it",
                output.display(),
                err.error
            );
            let _input_guard = self.open_files.acquire();
            let _output_guard = self.open_files.acquire();
            fs::copy(&err.path, output)?;
        }

        return Ok(());
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use super::{RmpRunCodec, Run, RunCodec, RunError, RunStore, TextRunCodec};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn write_run<C: RunCodec>(store: &RunStore<C>, records: &[i64]) -> Run {
        let mut writer = store.writer().unwrap();
        for record in records {
            writer.push(*record).unwrap();
        }
        writer.finish().unwrap()
    }

    fn check_run<C: RunCodec>(tmp_dir: &tempfile::TempDir) {
        let store: RunStore<C> = RunStore::new(Some(tmp_dir.path()), Some(16)).unwrap();
        let saved = Vec::from_iter(-50..50);

        let run = write_run(&store, &saved);
        assert_eq!(run.records(), 100);

        let restored: Result<Vec<i64>, RunError> = store.reader(run).unwrap().collect();
        assert_eq!(restored.unwrap(), saved);
    }

    #[rstest]
    fn test_text_run(tmp_dir: tempfile::TempDir) {
        check_run::<TextRunCodec>(&tmp_dir);
    }

    #[rstest]
    fn test_rmp_run(tmp_dir: tempfile::TempDir) {
        check_run::<RmpRunCodec>(&tmp_dir);
    }

    #[rstest]
    fn test_zero_rw_buf_size(tmp_dir: tempfile::TempDir) {
        let result: std::io::Result<RunStore> = RunStore::new(Some(tmp_dir.path()), Some(0));

        assert_eq!(result.err().map(|err| err.kind()), Some(std::io::ErrorKind::InvalidInput));
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_text_run_layout(tmp_dir: tempfile::TempDir) {
        let store: RunStore = RunStore::new(Some(tmp_dir.path()), None).unwrap();
        let run = write_run(&store, &[-3, 0, 7]);

        assert_eq!(fs::read_to_string(run.path()).unwrap(), "-3\n0\n7\n");
    }

    #[rstest]
    fn test_run_deleted_after_read(tmp_dir: tempfile::TempDir) {
        let store: RunStore = RunStore::new(Some(tmp_dir.path()), None).unwrap();
        let run = write_run(&store, &[1, 2, 3]);
        let path = run.path().to_path_buf();
        assert!(path.exists());

        let mut reader = store.reader(run).unwrap();
        assert_eq!(reader.next().unwrap().unwrap(), 1);
        drop(reader);

        assert!(!path.exists());
    }

    #[rstest]
    fn test_store_cleanup(tmp_dir: tempfile::TempDir) {
        let store: RunStore = RunStore::new(Some(tmp_dir.path()), None).unwrap();
        let run = write_run(&store, &[1, 2, 3]);
        let store_path = store.path().to_path_buf();
        std::mem::forget(run);

        drop(store);

        assert!(!store_path.exists());
    }

    #[rstest]
    fn test_open_files_gauge(tmp_dir: tempfile::TempDir) {
        let store: RunStore = RunStore::new(Some(tmp_dir.path()), None).unwrap();

        let first = write_run(&store, &[1]);
        let second = write_run(&store, &[2]);
        assert_eq!(store.open_files().current(), 0);
        assert_eq!(store.open_files().peak(), 1);

        let first = store.reader(first).unwrap();
        let second = store.reader(second).unwrap();
        let writer = store.writer().unwrap();
        assert_eq!(store.open_files().current(), 3);

        drop(first);
        drop(second);
        drop(writer);
        assert_eq!(store.open_files().current(), 0);
        assert_eq!(store.open_files().peak(), 3);

        store.open_files().reset_peak();
        assert_eq!(store.open_files().peak(), 0);
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn test_persist(tmp_dir: tempfile::TempDir, #[case] plain_text: bool) {
        let output = tmp_dir.path().join("output.txt");

        if plain_text {
            let store: RunStore<TextRunCodec> = RunStore::new(Some(tmp_dir.path()), None).unwrap();
            let run = write_run(&store, &[1, 2, 2, 10]);
            store.persist(run, &output).unwrap();
        } else {
            let store: RunStore<RmpRunCodec> = RunStore::new(Some(tmp_dir.path()), None).unwrap();
            let run = write_run(&store, &[1, 2, 2, 10]);
            store.persist(run, &output).unwrap();
        }

        assert_eq!(fs::read_to_string(&output).unwrap(), "1\n2\n2\n10\n");
    }

    #[rstest]
    fn test_persist_counts_output_file(tmp_dir: tempfile::TempDir) {
        let output = tmp_dir.path().join("output.txt");
        let store: RunStore<RmpRunCodec> = RunStore::new(Some(tmp_dir.path()), None).unwrap();
        let run = write_run(&store, &[4, 5]);
        store.open_files().reset_peak();

        store.persist(run, &output).unwrap();

        // the final run being read plus the output being written
        assert_eq!(store.open_files().peak(), 2);
        assert_eq!(store.open_files().current(), 0);
    }
}
