//! Read the legacy block-structured ".pek" peak report.
//!
//! A report is a series of blocks, one per scan. Each starts with a `Filename:` line
//! that ends in the scan number, followed eventually by a column header line and
//! tab separated peak rows.
use std::io::{self, prelude::*};
use std::path::PathBuf;

use tracing::{debug, warn};

use mzumc::{
    IsotopePeak, PeakFilter, PeakSource, PeakStore, ProgressObserver, ProgressRecord, Stage,
    StageProgress,
};

use crate::driver::MZUMCerError;
use crate::reader::{admit, open_input, parse_field};

const FILENAME_TAG: &str = "Filename:";
const START_TAG: &str =
    "CS,  Abundance,   m/z,   Fit,    Average MW, Monoisotopic MW,    Most abundant MW";
const LABELED_START_TAG: &str =
    "CS,  Abundance,   m/z,   Fit,    Average MW, Monoisotopic MW,    Most abundant MW,   Imono,   I+2";
const STOP_TAG: &str = "Processing stop time:";

const COLUMNS: [&str; 9] = [
    "CS",
    "Abundance",
    "m/z",
    "Fit",
    "Average MW",
    "Monoisotopic MW",
    "Most abundant MW",
    "Imono",
    "I+2",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    SeekFilename,
    SeekHeader,
    Rows,
}

/// The scan number at the end of a `Filename:` line. Reports generated from
/// `.wiff` files put the `wiff` extension between the last `.` and the scan.
fn scan_from_filename(line: &str, from_wiff: bool) -> Option<i32> {
    let index = line.rfind('.').map(|i| i + 1).unwrap_or(0);
    let tail = &line[index..];
    let tail = if from_wiff {
        tail.get(5..).unwrap_or_default()
    } else {
        tail
    };
    tail.trim().parse().ok()
}

fn is_wiff_filename(line: &str) -> bool {
    let index = line.rfind('.').map(|i| i + 1).unwrap_or(0);
    line[index..].to_ascii_lowercase().starts_with("wiff")
}

fn parse_row(
    line: &str,
    scan: i32,
    labeled: bool,
    line_number: usize,
) -> Result<IsotopePeak, MZUMCerError> {
    let tokens: Vec<&str> = line.split('\t').collect();
    let get = |i: usize| -> Result<f64, MZUMCerError> {
        Ok(parse_field::<f64>(tokens.get(i).copied(), line_number, COLUMNS[i])?.unwrap_or_default())
    };

    let charge = parse_field::<i32>(tokens.first().copied(), line_number, COLUMNS[0])?
        .unwrap_or_default();
    let fit = parse_field::<f32>(tokens.get(3).copied(), line_number, COLUMNS[3])?
        .unwrap_or_default();
    let mut peak = IsotopePeak::new(scan, charge, get(1)?, get(2)?, fit, get(4)?, get(5)?, get(6)?);
    if labeled {
        peak.mono_abundance = Some(get(7)?);
        peak.mono_plus2_abundance = Some(get(8)?);
    }
    Ok(peak)
}

/// Reads a ".pek" report, optionally gzip compressed.
///
/// Each peak's source line is its zero-based position among all the peak rows in
/// the report. Parse errors report the one-based line of the file.
#[derive(Debug, Clone)]
pub struct PekReader {
    pub path: PathBuf,
    /// Row tallies summed over every load
    pub counts: ProgressRecord,
}

impl PekReader {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            counts: ProgressRecord::default(),
        }
    }

    /// Whether the first block of the report names a `.wiff` file
    pub fn is_from_wiff(&self) -> io::Result<bool> {
        let (handle, _) = open_input(&self.path)?;
        for line in io::BufReader::new(handle).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.starts_with(FILENAME_TAG) {
                return Ok(is_wiff_filename(trimmed));
            }
        }
        Ok(false)
    }
}

impl PeakSource for PekReader {
    type Error = MZUMCerError;

    #[tracing::instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    fn load(
        &mut self,
        filter: &PeakFilter,
        observer: &mut dyn ProgressObserver,
    ) -> Result<PeakStore, Self::Error> {
        let (handle, bytes) = open_input(&self.path)?;
        let reader = io::BufReader::with_capacity(65535, handle);

        let mut progress = StageProgress::new(observer, Stage::Loading, bytes.total as usize);
        let mut store = PeakStore::new();
        let mut counts = ProgressRecord::default();
        let mut non_positive = 0;

        let mut state = BlockState::SeekFilename;
        let mut first_block = true;
        let mut from_wiff = false;
        let mut labeled = false;
        let mut scan = 0;
        let mut n_rows = 0;

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            match state {
                BlockState::SeekFilename => {
                    if !trimmed.starts_with(FILENAME_TAG) {
                        continue;
                    }
                    if first_block && is_wiff_filename(trimmed) {
                        debug!("Reading a report generated from a wiff file");
                        from_wiff = true;
                    }
                    scan = scan_from_filename(trimmed, from_wiff).ok_or_else(|| {
                        MZUMCerError::ParseError {
                            row: i + 1,
                            column: FILENAME_TAG.to_string(),
                            text: trimmed.to_string(),
                        }
                    })?;
                    state = BlockState::SeekHeader;
                }
                BlockState::SeekHeader => {
                    if !trimmed.starts_with(START_TAG) {
                        continue;
                    }
                    if first_block {
                        labeled = trimmed.starts_with(LABELED_START_TAG);
                        first_block = false;
                    }
                    state = BlockState::Rows;
                }
                BlockState::Rows => {
                    if trimmed.is_empty() {
                        continue;
                    }
                    let leads_with_digit = trimmed.chars().next().is_some_and(|c| c.is_ascii_digit());
                    if trimmed.starts_with(STOP_TAG) || !leads_with_digit {
                        state = BlockState::SeekFilename;
                        continue;
                    }
                    let peak = parse_row(&line, scan, labeled, i + 1)?.with_source_line(n_rows);
                    n_rows += 1;
                    admit(peak, filter, &mut store, &mut counts, &mut non_positive)?;
                    if n_rows % 10_000 == 0 {
                        progress.update(bytes.consumed());
                    }
                }
            }
        }
        progress.finish();

        if non_positive > 0 {
            warn!("Rejected {non_positive} peaks with a non-positive abundance");
        }
        debug!("Accepted {} of {} peaks", store.len(), counts.peaks_read);
        self.counts += counts;
        Ok(store)
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    fn report(labeled: bool, wiff: bool) -> String {
        let header = if labeled { LABELED_START_TAG } else { START_TAG };
        let extra = if labeled { "\t800\t200" } else { "" };
        let name = if wiff { "sample.wiff 12" } else { "sample.12" };
        let name2 = if wiff { "sample.wiff 13" } else { "sample.13" };
        format!(
            "Filename: {name}\n\
Some preamble\n\
{header}\n\
2\t15000\t501.2567\t0.02\t1000.9876\t1000.4987\t1001.0012{extra}\n\
\n\
1\t9000\t400.1\t\t399.3\t399.0927\t399.1{extra}\n\
Processing stop time: 12:00\n\
Filename: {name2}\n\
{header}\n\
2\t16000\t501.2570\t0.03\t1000.9880\t1000.4993\t1001.0019{extra}\n\
3\t100\t334.5\t0.01\t1000.0\t1000.4\t1000.5{extra}\n\
\n"
        )
    }

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("mzumcer-pek-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_scan_from_filename() {
        assert_eq!(scan_from_filename("Filename: C:\\data\\run.42", false), Some(42));
        assert!(is_wiff_filename("Filename: run.wiff 7"));
        assert_eq!(scan_from_filename("Filename: run.wiff 7", true), Some(7));
        assert_eq!(scan_from_filename("Filename: run", false), None);
    }

    #[test]
    fn test_read_report() {
        let path = write_temp("plain.pek", &report(false, false));
        let mut reader = PekReader::new(&path);
        let store = reader.load(&PeakFilter::default(), &mut ()).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store[0].scan, 12);
        assert_eq!(store[0].mono_mass, 1000.4987);
        assert_eq!(store[0].mono_abundance, None);
        assert_eq!(store[1].scan, 12);
        assert_eq!(store[1].source_line, 1);
        assert_eq!(store[1].fit, 0.0);
        assert_eq!(store[2].scan, 13);
        assert_eq!(store[2].source_line, 2);

        assert_eq!(reader.counts.peaks_read, 4);
        assert_eq!(reader.counts.peaks_rejected, 1);
    }

    #[test]
    fn test_read_labeled_wiff() {
        let path = write_temp("labeled.pek", &report(true, true));
        let mut reader = PekReader::new(&path);
        let store = reader.load(&PeakFilter::permissive(), &mut ()).unwrap();
        assert_eq!(store.len(), 4);
        assert_eq!(store[0].scan, 12);
        assert_eq!(store[3].scan, 13);
        assert_eq!(store[0].mono_abundance, Some(800.0));
        assert_eq!(store[0].mono_plus2_abundance, Some(200.0));
    }

    #[test]
    fn test_detect_wiff() -> io::Result<()> {
        let reader = PekReader::new(write_temp("detect_wiff.pek", &report(false, true)));
        assert!(reader.is_from_wiff()?);
        let reader = PekReader::new(write_temp("detect_plain.pek", &report(false, false)));
        assert!(!reader.is_from_wiff()?);
        let reader = PekReader::new(write_temp("detect_empty.pek", ""));
        assert!(!reader.is_from_wiff()?);
        Ok(())
    }

    #[test]
    fn test_malformed_row() {
        let text = format!("Filename: x.1\n{START_TAG}\n2\t15000\tabc\t0.02\t1000.9\t1000.4\t1001.0\n");
        let path = write_temp("malformed.pek", &text);
        let mut reader = PekReader::new(&path);
        match reader.load(&PeakFilter::default(), &mut ()) {
            Err(MZUMCerError::ParseError { row, column, .. }) => {
                assert_eq!(row, 3);
                assert_eq!(column, "m/z");
            }
            other => panic!("Expected a parse error, got {other:?}"),
        }
    }
}
