use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Instant;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use mzumc::{FeatureFinder, FeatureFinderError, LogProgress, PeakSource, ProgressRecord};

use crate::config::{DataFilters, Settings, UMCCreationOptions};
use crate::mass_range::MassRange;
use crate::pek::PekReader;
use crate::reader::IsosCsvReader;
use crate::write::{write_output, ChannelSink, OutputPaths};

pub const BUFFER_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum MZUMCerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Input file {} does not exist", .0.display())]
    InputNotFound(PathBuf),
    #[error("The input file format for {} was not recognized, expected an isos CSV or PEK file", .0.display())]
    UnknownInputFormat(PathBuf),
    #[error("Required column {0} is missing")]
    MissingColumn(String),
    #[error("Failed to parse {column} on row {row}: {text:?}")]
    ParseError {
        row: usize,
        column: String,
        text: String,
    },
    #[error("Failed to load configuration: {0}")]
    ConfigError(
        #[source]
        #[from]
        Box<figment::Error>,
    ),
    #[error(transparent)]
    FeatureFinderError(#[from] FeatureFinderError),
    #[error("Failed to build the thread pool: {0}")]
    ThreadPoolError(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
}

impl From<figment::Error> for MZUMCerError {
    fn from(value: figment::Error) -> Self {
        Self::ConfigError(Box::new(value))
    }
}

/// The peak list formats that can be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    IsosCsv,
    Pek,
}

impl InputFormat {
    pub fn infer_from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        if name.ends_with(".csv") {
            Some(Self::IsosCsv)
        } else if name.ends_with(".pek") {
            Some(Self::Pek)
        } else {
            None
        }
    }
}

fn default_output_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_threads() -> i32 {
    -1
}

fn default_write_buffer_size() -> usize {
    BUFFER_SIZE
}

/// Find LC-MS features in a deisotoped peak list.
///
/// Read an isos CSV or PEK file, group peaks observed over many scans into
/// features by single linkage clustering, and write out a feature table and a
/// feature to peak mapping table.
#[derive(Parser, Debug, Deserialize, Serialize)]
#[command(author, version)]
pub struct MZUMCer {
    /// The path to read the input peaks from, an isos CSV or PEK file, optionally gzipped
    #[arg()]
    pub input_file: PathBuf,

    /// The directory to write the output tables to
    #[arg(short = 'o', long = "output-directory", default_value = ".")]
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzumcer.toml` in the working directory.
    /// Environment variables prefixed with `MZUMCER_` will be read too.
    #[arg(long = "config-file")]
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// The number of completed segments to hold in the write queue
    #[arg(short = 'w', long="write-buffer-size", default_value_t=BUFFER_SIZE)]
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(
        short='t',
        long="threads",
        default_value_t=-1,
    )]
    #[serde(default = "default_threads")]
    pub threads: i32,

    /// The monoisotopic mass range to process, denoted (start?)-(stop?)
    #[arg(
        short='m',
        long="mass-range",
        value_parser=MassRange::from_str,
        value_name="START-END",
        long_help=r#"The monoisotopic mass range to process, denoted (start?)-(stop?)

If a start is not specified, processing begins from 0 Da.
If a stop is not specified, all masses above the start are processed.
"#
    )]
    #[serde(default)]
    pub mass_range: Option<MassRange>,

    /// The minimum number of peaks a feature must have
    #[arg(short = 'n', long = "min-feature-length")]
    #[serde(default)]
    pub min_feature_length: Option<usize>,

    /// Process the mass range in segments of this many Daltons
    #[arg(short = 'c', long = "chunk-size")]
    #[serde(default)]
    pub chunk_size: Option<f64>,

    #[arg(skip)]
    #[serde(default)]
    pub data_filters: DataFilters,

    #[arg(skip)]
    #[serde(default)]
    pub umc_creation: UMCCreationOptions,
}

impl MZUMCer {
    fn create_threadpool(&self) -> Result<rayon::ThreadPool, MZUMCerError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        debug!("Using {} cores", num_threads);
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?)
    }

    /// Merge the settings from every source, lowest precedence first: the tables on
    /// this struct, `mzumcer.toml`, the configuration file, the environment and
    /// finally the command line flags.
    pub fn load_settings(&self) -> Result<Settings, MZUMCerError> {
        let defaults = Settings {
            data_filters: self.data_filters.clone(),
            umc_creation: self.umc_creation.clone(),
        };
        let mut config = Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file("mzumcer.toml"));
        if let Some(path) = self.config_file.as_ref() {
            info!("Reading configuration from {}", path.display());
            config = config.merge(Toml::file_exact(path));
        }
        config = config.merge(Env::prefixed("MZUMCER_").split("__"));
        let mut settings: Settings = config.extract()?;

        if let Some(mass_range) = self.mass_range {
            settings.data_filters.mono_mass_start = mass_range.start;
            settings.data_filters.mono_mass_end = if mass_range.is_bounded() {
                mass_range.end
            } else {
                0.0
            };
        }
        if let Some(min_feature_length) = self.min_feature_length {
            settings.umc_creation.min_feature_length = min_feature_length;
        }
        if let Some(chunk_size) = self.chunk_size {
            settings.data_filters.process_in_chunks = true;
            settings.data_filters.chunk_size = chunk_size;
        }
        if let Ok(text) = toml::to_string(&settings) {
            debug!("Effective settings:\n{text}");
        }
        Ok(settings)
    }

    /// [`MZUMCer::load_settings`], then the adjustments the input file calls for
    pub fn settings_for_input(&self, format: InputFormat) -> Result<Settings, MZUMCerError> {
        let mut settings = self.load_settings()?;
        if format == InputFormat::Pek
            && settings.umc_creation.wiff_pek_weights
            && PekReader::new(&self.input_file).is_from_wiff()?
        {
            info!("Using the wiff PEK weights and constraints");
            settings.umc_creation.apply_wiff_pek_weights();
        }
        Ok(settings)
    }

    pub fn main(&self) -> Result<(), MZUMCerError> {
        info!(
            "mzumcer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file.display());
        info!("Output: {}", self.output_directory.display());

        if !self.input_file.exists() {
            return Err(MZUMCerError::InputNotFound(self.input_file.clone()));
        }
        let format = InputFormat::infer_from_path(&self.input_file)
            .ok_or_else(|| MZUMCerError::UnknownInputFormat(self.input_file.clone()))?;
        debug!("Detected {format:?} from path");

        let settings = self.settings_for_input(format)?;
        settings.log();
        let finder = settings.feature_finder()?;

        let record = self
            .create_threadpool()?
            .install(|| self.reader_then(format, &finder))?;
        record.log();
        Ok(())
    }

    fn reader_then(
        &self,
        format: InputFormat,
        finder: &FeatureFinder,
    ) -> Result<ProgressRecord, MZUMCerError> {
        match format {
            InputFormat::IsosCsv => {
                let mut reader = IsosCsvReader::new(&self.input_file);
                let record = self.run_workflow(finder, &mut reader)?;
                Ok(record + reader.counts)
            }
            InputFormat::Pek => {
                let mut reader = PekReader::new(&self.input_file);
                let record = self.run_workflow(finder, &mut reader)?;
                Ok(record + reader.counts)
            }
        }
    }

    fn run_workflow<S: PeakSource<Error = MZUMCerError>>(
        &self,
        finder: &FeatureFinder,
        source: &mut S,
    ) -> Result<ProgressRecord, MZUMCerError> {
        let (send_features, recv_features) =
            crossbeam_channel::bounded(self.write_buffer_size.max(1));
        let paths = OutputPaths::from_input(&self.input_file, &self.output_directory);

        let start = Instant::now();
        let write_task = thread::spawn(move || write_output(paths, recv_features));

        let mut sink = ChannelSink::new(send_features);
        let mut observer = LogProgress::default();
        let result = finder.run(source, &mut sink, &mut observer);
        drop(sink);
        let processing_elapsed = start.elapsed();

        match write_task.join() {
            Ok(o) => {
                let n_written = o?;
                debug!("Wrote {n_written} features");
            }
            Err(e) => {
                warn!("Failed to join writer task: {e:?}");
            }
        }
        let record = result?;

        let elapsed = start.elapsed();
        info!("Elapsed Time: {:0.3?}", processing_elapsed);
        if (elapsed.as_secs_f64() - processing_elapsed.as_secs_f64()) > 2.0 {
            info!("Total Elapsed Time: {:0.3?}", elapsed);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_infer_format() {
        assert_eq!(
            InputFormat::infer_from_path(Path::new("run_isos.csv")),
            Some(InputFormat::IsosCsv)
        );
        assert_eq!(
            InputFormat::infer_from_path(Path::new("run_isos.CSV.gz")),
            Some(InputFormat::IsosCsv)
        );
        assert_eq!(
            InputFormat::infer_from_path(Path::new("data/run.pek")),
            Some(InputFormat::Pek)
        );
        assert_eq!(InputFormat::infer_from_path(Path::new("run.mzML")), None);
    }

    #[test]
    fn test_cli_overrides() -> Result<(), MZUMCerError> {
        let args = MZUMCer::parse_from([
            "mzumcer",
            "run_isos.csv",
            "--mass-range",
            "400-2000",
            "-n",
            "4",
            "-c",
            "500",
        ]);
        let settings = args.load_settings()?;
        assert_eq!(settings.data_filters.mono_mass_start, 400.0);
        assert_eq!(settings.data_filters.mono_mass_end, 2000.0);
        assert!(settings.data_filters.process_in_chunks);
        assert_eq!(settings.data_filters.chunk_size, 500.0);
        assert_eq!(settings.umc_creation.min_feature_length, 4);

        let finder = settings.feature_finder()?;
        let segments = finder.segments.unwrap();
        assert_eq!(segments.segments().len(), 4);
        Ok(())
    }

    #[test]
    fn test_wiff_pek_settings() -> Result<(), MZUMCerError> {
        let dir = std::env::temp_dir().join("mzumcer-driver-test");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("run.pek");
        std::fs::write(&path, "Filename: run.wiff 3\n")?;

        let mut args = MZUMCer::parse_from([std::ffi::OsStr::new("mzumcer"), path.as_os_str()]);
        let settings = args.settings_for_input(InputFormat::Pek)?;
        assert_eq!(settings.umc_creation.mono_mass_constraint, 50.0);

        args.umc_creation.wiff_pek_weights = true;
        let settings = args.settings_for_input(InputFormat::Pek)?;
        assert_eq!(settings.umc_creation.mono_mass_constraint, 25.0);
        assert_eq!(settings.umc_creation.scan_weight, 0.01);

        let settings = args.settings_for_input(InputFormat::IsosCsv)?;
        assert_eq!(settings.umc_creation.mono_mass_constraint, 50.0);
        Ok(())
    }
}
