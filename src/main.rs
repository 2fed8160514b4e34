use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use pway_sort::sort::MIN_WAYS;
use pway_sort::{ExternalSorterBuilder, RmpRunCodec, RunCodec, SortError, SortReport, TextRunCodec};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let run_format: RunFormat = arg_parser.value_of_t_or_exit("run_format");
    let ways: usize = arg_parser.value_of_t("ways").expect("value is pre-validated");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let rw_buf_size: Option<usize> = arg_parser.value_of("rw_buf_size").map(|size| {
        size.parse::<ByteSize>().expect("value is pre-validated").as_u64() as usize
    });

    let input = path::Path::new(arg_parser.value_of("input").expect("value is required"));
    let output = path::Path::new(arg_parser.value_of("output").expect("value is required"));

    let mut sorter_builder = ExternalSorterBuilder::new().with_ways(ways);
    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }
    if let Some(rw_buf_size) = rw_buf_size {
        sorter_builder = sorter_builder.with_rw_buf_size(rw_buf_size);
    }

    let result = match run_format {
        RunFormat::Text => sort(sorter_builder.with_run_codec::<TextRunCodec>(), input, output),
        RunFormat::Msgpack => sort(sorter_builder.with_run_codec::<RmpRunCodec>(), input, output),
    };

    match result {
        Ok(report) => println!("{}", report),
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    }
}

fn sort<C: RunCodec>(
    sorter_builder: ExternalSorterBuilder<C>,
    input: &path::Path,
    output: &path::Path,
) -> Result<SortReport, SortError> {
    let sorter = sorter_builder.build()?;
    sorter.sort_file(input, output)
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum RunFormat {
    Text,
    Msgpack,
}

impl RunFormat {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        RunFormat::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for RunFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <RunFormat as clap::ArgEnum>::from_str(s, false)
    }
}

/// Parses command line arguments. Any usage error terminates the process with exit code 1.
fn build_arg_parser() -> clap::ArgMatches {
    let result = clap::Command::new("pway-sort")
        .about("external integer sorter (replacement selection + p-way merge)")
        .allow_negative_numbers(true)
        .arg(
            clap::Arg::new("ways")
                .help("number of records held in memory and number of runs merged at once")
                .required(true)
                .index(1)
                .validator(|v| match v.parse::<usize>() {
                    Ok(ways) if ways >= MIN_WAYS => Ok(()),
                    _ => Err(format!("p must be an integer >= {}", MIN_WAYS)),
                }),
        )
        .arg(
            clap::Arg::new("input")
                .help("file to be sorted")
                .required(true)
                .index(2),
        )
        .arg(
            clap::Arg::new("output")
                .help("result file")
                .required(true)
                .index(3),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("warn")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("rw_buf_size")
                .short('b')
                .long("rw-buf-size")
                .help("run files read/write buffer size")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(size) if size.as_u64() == 0 => Err(String::from("Buffer size must be positive")),
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Buffer size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("run_format")
                .short('f')
                .long("run-format")
                .help("temporary run files format")
                .takes_value(true)
                .default_value("text")
                .possible_values(RunFormat::possible_values()),
        )
        .try_get_matches();

    match result {
        Ok(matches) => matches,
        Err(err) => match err.kind() {
            clap::ErrorKind::DisplayHelp | clap::ErrorKind::DisplayVersion => err.exit(),
            _ => {
                let _ = err.print();
                process::exit(1);
            }
        },
    }
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
