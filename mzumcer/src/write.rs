use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info};

use mzumc::{FeatureSink, SegmentOutput, UMC};

use crate::driver::MZUMCerError;

const FEATURE_HEADER: [&str; 13] = [
    "Feature_Index",
    "Monoisotopic_Mass",
    "Average_Mono_Mass",
    "UMC_MW_Min",
    "UMC_MW_Max",
    "Scan_Start",
    "Scan_End",
    "Scan",
    "UMC_Member_Count",
    "Max_Abundance",
    "Abundance",
    "Class_Rep_MZ",
    "Class_Rep_Charge",
];

const MAPPING_HEADER: [&str; 2] = ["Feature_Index", "Peak_Index"];

/// The input file name without its directory or any of the known peak list suffixes
pub fn output_base_name(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    for suffix in ["_isos.csv", ".csv", ".pek"] {
        if let Some(stem) = name.strip_suffix(suffix) {
            return stem.to_string();
        }
    }
    name.to_string()
}

/// Where the feature and mapping tables of a run are written
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub directory: PathBuf,
    pub base_name: String,
}

impl OutputPaths {
    pub fn new(directory: PathBuf, base_name: String) -> Self {
        Self {
            directory,
            base_name,
        }
    }

    pub fn from_input(input: &Path, directory: &Path) -> Self {
        Self::new(directory.to_path_buf(), output_base_name(input))
    }

    fn stem(&self, segment: Option<usize>) -> String {
        match segment {
            Some(k) => format!("{}_chunk{k}", self.base_name),
            None => self.base_name.clone(),
        }
    }

    pub fn features_path(&self, segment: Option<usize>) -> PathBuf {
        self.directory
            .join(format!("{}_LCMSFeatures.txt", self.stem(segment)))
    }

    pub fn mapping_path(&self, segment: Option<usize>) -> PathBuf {
        self.directory
            .join(format!("{}_LCMSFeatureToPeakMap.txt", self.stem(segment)))
    }
}

fn tab_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(false)
        .from_writer(writer)
}

/// Write one row per feature, with real numbers to four decimal places
pub fn write_features<W: Write>(writer: W, features: &[UMC]) -> io::Result<()> {
    let mut writer = tab_writer(writer);
    writer.write_record(FEATURE_HEADER)?;
    for f in features {
        writer.write_record([
            f.id.to_string(),
            format!("{:.4}", f.median_mono_mass),
            format!("{:.4}", f.mean_mono_mass),
            format!("{:.4}", f.min_mono_mass),
            format!("{:.4}", f.max_mono_mass),
            f.start_scan.to_string(),
            f.stop_scan.to_string(),
            f.max_abundance_scan.to_string(),
            f.member_count.to_string(),
            format!("{:.4}", f.max_abundance),
            format!("{:.4}", f.sum_abundance),
            format!("{:.4}", f.representative_mz),
            f.representative_charge.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one row per (feature id, source line) pair
pub fn write_mapping<W: Write>(writer: W, mapping: &[(usize, usize)]) -> io::Result<()> {
    let mut writer = tab_writer(writer);
    writer.write_record(MAPPING_HEADER)?;
    for (feature_id, source_line) in mapping {
        writer.write_record([feature_id.to_string(), source_line.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write both tables for a single [`SegmentOutput`]
pub fn write_segment(paths: &OutputPaths, output: &SegmentOutput) -> io::Result<()> {
    let path = paths.features_path(output.segment);
    debug!("Writing {} features to {}", output.len(), path.display());
    write_features(io::BufWriter::new(fs::File::create(path)?), &output.features)?;

    let path = paths.mapping_path(output.segment);
    write_mapping(io::BufWriter::new(fs::File::create(path)?), &output.mapping)?;
    Ok(())
}

/// Write each [`SegmentOutput`] received until the sending side hangs up,
/// returning the number of features written.
pub fn write_output(paths: OutputPaths, receiver: Receiver<SegmentOutput>) -> io::Result<usize> {
    fs::create_dir_all(&paths.directory)?;
    let mut n_features = 0;
    let mut n_outputs = 0;
    while let Ok(output) = receiver.recv() {
        write_segment(&paths, &output)?;
        n_features += output.len();
        n_outputs += 1;
        match output.segment {
            Some(k) => info!(
                "Wrote chunk {k} | Features={} Total={n_features} | {} items in the write queue",
                output.len(),
                receiver.len()
            ),
            None => info!("Wrote {} features", output.len()),
        }
    }
    debug!("Finished writing {n_outputs} outputs");
    Ok(n_features)
}

/// Forwards completed outputs to a writer thread
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<SegmentOutput>,
}

impl ChannelSink {
    pub fn new(sender: Sender<SegmentOutput>) -> Self {
        Self { sender }
    }
}

impl FeatureSink for ChannelSink {
    type Error = MZUMCerError;

    fn emit(&mut self, output: SegmentOutput) -> Result<(), Self::Error> {
        self.sender.send(output).map_err(|e| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("The feature writer stopped early: {e}"),
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    fn feature(id: usize) -> UMC {
        UMC {
            id,
            member_count: 2,
            min_mono_mass: 1000.0,
            max_mono_mass: 1000.02,
            mean_mono_mass: 1000.01,
            median_mono_mass: 1000.01,
            start_scan: 4,
            stop_scan: 9,
            max_abundance_scan: 7,
            max_abundance: 2500.5,
            sum_abundance: 4000.25,
            representative_mz: 501.012345,
            representative_charge: 2,
        }
    }

    #[test]
    fn test_base_name() {
        assert_eq!(output_base_name(Path::new("/data/run_01_isos.csv")), "run_01");
        assert_eq!(output_base_name(Path::new("run_01_isos.csv.gz")), "run_01");
        assert_eq!(output_base_name(Path::new("run.csv")), "run");
        assert_eq!(output_base_name(Path::new("scans.pek")), "scans");
        assert_eq!(output_base_name(Path::new("peaks.txt")), "peaks.txt");

        let paths = OutputPaths::from_input(Path::new("a/run_isos.csv"), Path::new("out"));
        assert_eq!(paths.features_path(None), Path::new("out/run_LCMSFeatures.txt"));
        assert_eq!(
            paths.mapping_path(Some(3)),
            Path::new("out/run_chunk3_LCMSFeatureToPeakMap.txt")
        );
    }

    #[test]
    fn test_write_features() -> io::Result<()> {
        let mut buffer = Vec::new();
        write_features(&mut buffer, &[feature(0), feature(1)])?;
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], FEATURE_HEADER.join("\t"));
        assert_eq!(
            lines[2],
            "1\t1000.0100\t1000.0100\t1000.0000\t1000.0200\t4\t9\t7\t2\t2500.5000\t4000.2500\t501.0123\t2"
        );
        Ok(())
    }

    #[test]
    fn test_write_mapping() -> io::Result<()> {
        let mut buffer = Vec::new();
        write_mapping(&mut buffer, &[(0, 3), (0, 5), (1, 4)])?;
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "Feature_Index\tPeak_Index\n0\t3\n0\t5\n1\t4\n");
        Ok(())
    }

    #[test]
    fn test_channel_sink() -> Result<(), MZUMCerError> {
        let directory = std::env::temp_dir().join("mzumcer-write-test");
        let paths = OutputPaths::new(directory.clone(), "sink".to_string());
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let task = {
            let paths = paths.clone();
            thread::spawn(move || write_output(paths, receiver))
        };

        let mut sink = ChannelSink::new(sender);
        for k in 0..2 {
            sink.emit(SegmentOutput {
                segment: Some(k),
                offset: k,
                features: vec![feature(k)],
                mapping: vec![(k, k * 2), (k, k * 2 + 1)],
            })?;
        }
        drop(sink);
        let n_features = task.join().unwrap()?;
        assert_eq!(n_features, 2);

        let text = fs::read_to_string(paths.mapping_path(Some(1)))?;
        assert_eq!(text, "Feature_Index\tPeak_Index\n1\t2\n1\t3\n");
        assert!(paths.features_path(Some(0)).exists());
        Ok(())
    }
}
