//! Read deisotoped peak tables ("isos" CSV files) into a [`PeakStore`]
use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use csv::StringRecord;
use flate2::read::GzDecoder;
use tracing::{debug, warn};

use mzumc::{
    IsotopePeak, PeakFilter, PeakSource, PeakStore, ProgressObserver, ProgressRecord, Stage,
    StageProgress,
};

use crate::driver::MZUMCerError;

/// Counts the bytes read through it so progress can be reported against the size
/// of the file on disk, compressed or not
struct CountingReader<R> {
    inner: R,
    consumed: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// How far through an input file a reader has progressed
#[derive(Debug, Clone)]
pub(crate) struct ByteProgress {
    consumed: Arc<AtomicU64>,
    pub total: u64,
}

impl ByteProgress {
    pub fn consumed(&self) -> usize {
        self.consumed.load(Ordering::Relaxed) as usize
    }
}

pub(crate) fn is_gzipped(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Open `path` for reading, decompressing it if it ends in `.gz`
pub(crate) fn open_input(path: &Path) -> io::Result<(Box<dyn Read + Send>, ByteProgress)> {
    let handle = fs::File::open(path)?;
    let total = handle.metadata()?.len();
    let consumed = Arc::new(AtomicU64::new(0));
    let counted = CountingReader {
        inner: handle,
        consumed: consumed.clone(),
    };
    let reader: Box<dyn Read + Send> = if is_gzipped(path) {
        Box::new(GzDecoder::new(io::BufReader::new(counted)))
    } else {
        Box::new(counted)
    };
    Ok((reader, ByteProgress { consumed, total }))
}

/// Parse `text` as a `T`, treating blank text as missing
pub(crate) fn parse_field<T: FromStr>(
    text: Option<&str>,
    row: usize,
    column: &str,
) -> Result<Option<T>, MZUMCerError> {
    match text.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(|_| MZUMCerError::ParseError {
            row,
            column: column.to_string(),
            text: s.to_string(),
        }),
    }
}

/// Tally one row against `filter`, pushing it into `store` when accepted
pub(crate) fn admit(
    peak: IsotopePeak,
    filter: &PeakFilter,
    store: &mut PeakStore,
    counts: &mut ProgressRecord,
    non_positive: &mut usize,
) -> Result<(), MZUMCerError> {
    counts.peaks_read += 1;
    if !(peak.abundance > 0.0 && peak.abundance.is_finite()) {
        *non_positive += 1;
        counts.peaks_rejected += 1;
    } else if filter.accepts(&peak) {
        store.push(peak)?;
    } else {
        counts.peaks_rejected += 1;
    }
    Ok(())
}

/// Split one line of an isos table on commas. The tables are never quoted.
fn split_record(line: &str) -> StringRecord {
    let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
    StringRecord::from(line.split(',').collect::<Vec<&str>>())
}

const LC_SCAN_COLUMN: &str = "scan_num";
const IMS_FRAME_COLUMN: &str = "frame_num";

/// The positions of the known columns of an isos table, found by header name
#[derive(Debug, Default, Clone, PartialEq)]
struct IsosColumns {
    scan: usize,
    scan_column: &'static str,
    ims_scan: Option<usize>,
    charge: usize,
    abundance: usize,
    mz: usize,
    fit: usize,
    average_mw: Option<usize>,
    monoisotopic_mw: usize,
    mostabundant_mw: Option<usize>,
    mono_abundance: Option<usize>,
    mono_plus2_abundance: Option<usize>,
    orig_intensity: Option<usize>,
    tia_orig_intensity: Option<usize>,
    drift_time: Option<usize>,
    cumulative_drift_time: Option<usize>,
}

impl IsosColumns {
    fn from_headers(headers: &StringRecord) -> Result<Self, MZUMCerError> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| MZUMCerError::MissingColumn(name.to_string()))
        };

        let first = headers.get(0).map(str::trim).unwrap_or_default();
        let (scan, scan_column, ims_scan) = if first == IMS_FRAME_COLUMN {
            (0, IMS_FRAME_COLUMN, Some(require("ims_scan_num")?))
        } else {
            (require(LC_SCAN_COLUMN)?, LC_SCAN_COLUMN, None)
        };

        Ok(Self {
            scan,
            scan_column,
            ims_scan,
            charge: require("charge")?,
            abundance: require("abundance")?,
            mz: require("mz")?,
            fit: require("fit")?,
            average_mw: find("average_mw"),
            monoisotopic_mw: require("monoisotopic_mw")?,
            mostabundant_mw: find("mostabundant_mw"),
            mono_abundance: find("mono_abundance"),
            mono_plus2_abundance: find("mono_plus2_abundance"),
            orig_intensity: find("orig_intensity"),
            tia_orig_intensity: find("TIA_orig_intensity"),
            drift_time: find("drift_time"),
            cumulative_drift_time: find("cumulative_drift_time"),
        })
    }

    fn is_ims(&self) -> bool {
        self.ims_scan.is_some()
    }

    fn peak_from(&self, record: &StringRecord, row: usize) -> Result<IsotopePeak, MZUMCerError> {
        let get = |i: usize, name: &str| parse_field::<f64>(record.get(i), row, name);
        let get_opt = |i: Option<usize>, name: &str| match i {
            Some(i) => parse_field::<f64>(record.get(i), row, name),
            None => Ok(None),
        };
        let get_f32 = |i: Option<usize>, name: &str| match i {
            Some(i) => parse_field::<f32>(record.get(i), row, name),
            None => Ok(None),
        };

        let scan = parse_field::<i32>(record.get(self.scan), row, self.scan_column)?.unwrap_or_default();
        let charge = parse_field::<i32>(record.get(self.charge), row, "charge")?.unwrap_or_default();
        let fit = get_f32(Some(self.fit), "fit")?.unwrap_or_default();

        let mut peak = IsotopePeak::new(
            scan,
            charge,
            get(self.abundance, "abundance")?.unwrap_or_default(),
            get(self.mz, "mz")?.unwrap_or_default(),
            fit,
            get_opt(self.average_mw, "average_mw")?.unwrap_or_default(),
            get(self.monoisotopic_mw, "monoisotopic_mw")?.unwrap_or_default(),
            get_opt(self.mostabundant_mw, "mostabundant_mw")?.unwrap_or_default(),
        )
        .with_source_line(row);

        peak.mono_abundance = get_opt(self.mono_abundance, "mono_abundance")?;
        peak.mono_plus2_abundance = get_opt(self.mono_plus2_abundance, "mono_plus2_abundance")?;

        if let Some(ims_col) = self.ims_scan {
            peak.ims_scan = Some(
                parse_field::<i32>(record.get(ims_col), row, "ims_scan_num")?.unwrap_or_default(),
            );
            peak.original_intensity = get_f32(self.orig_intensity, "orig_intensity")?;
            peak.tia_original_intensity = get_f32(self.tia_orig_intensity, "TIA_orig_intensity")?;
            peak.drift_time = get_f32(self.drift_time, "drift_time")?;
            peak.cumulative_drift_time =
                get_f32(self.cumulative_drift_time, "cumulative_drift_time")?;
        }
        Ok(peak)
    }
}

/// Reads a comma separated isos table, optionally gzip compressed.
///
/// The file is re-opened for every [`PeakSource::load`] call, so only the peaks
/// that pass the filter are ever held in memory. Each peak's source line is its
/// zero-based data row, counting blank rows and rows the filter rejects.
#[derive(Debug, Clone)]
pub struct IsosCsvReader {
    pub path: PathBuf,
    /// Row tallies summed over every load
    pub counts: ProgressRecord,
}

impl IsosCsvReader {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            counts: ProgressRecord::default(),
        }
    }
}

impl PeakSource for IsosCsvReader {
    type Error = MZUMCerError;

    #[tracing::instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    fn load(
        &mut self,
        filter: &PeakFilter,
        observer: &mut dyn ProgressObserver,
    ) -> Result<PeakStore, Self::Error> {
        let (handle, bytes) = open_input(&self.path)?;
        let mut reader = io::BufReader::with_capacity(65535, handle);
        let mut line = String::new();
        reader.read_line(&mut line)?;

        let columns = IsosColumns::from_headers(&split_record(&line))?;
        debug!(
            "Reading {} data from {}",
            if columns.is_ims() { "IMS" } else { "LC-MS" },
            self.path.display()
        );

        let mut progress = StageProgress::new(observer, Stage::Loading, bytes.total as usize);
        let mut store = PeakStore::new();
        let mut counts = ProgressRecord::default();
        let mut non_positive = 0;
        let mut row = 0;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let record = split_record(&line);
            if !record.iter().all(|field| field.trim().is_empty()) {
                let peak = columns.peak_from(&record, row)?;
                admit(peak, filter, &mut store, &mut counts, &mut non_positive)?;
                if counts.peaks_read % 10_000 == 0 {
                    progress.update(bytes.consumed());
                }
            }
            row += 1;
        }
        progress.finish();

        if non_positive > 0 {
            warn!("Rejected {non_positive} peaks with a non-positive abundance");
        }
        debug!(
            "Accepted {} of {} peaks",
            store.len(),
            counts.peaks_read
        );
        self.counts += counts;
        Ok(store)
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    const LC_TABLE: &str = "\
scan_num,charge,abundance,mz,fit,average_mw,monoisotopic_mw,mostabundant_mw,fwhm,signal_noise,mono_abundance,mono_plus2_abundance
1,2,15000,501.2567,0.021,1000.9876,1000.4987,1001.0012,0.02,45.1,9000,3000
1,1,300,400.1000,0.010,399.3,399.0927,399.1,0.02,3.0,300,0
2,2,16000,501.2570,0.180,1000.9880,1000.4993,1001.0019,0.02,46.3,9500,
2,3,0,334.5000,0.010,1000.0,1000.4,1000.5,0.02,1.0,0,0
3,2,17000,501.2571,,1000.9881,1000.4995,1001.0020,0.02,47.0,,
";

    const IMS_TABLE: &str = "\
frame_num,ims_scan_num,charge,abundance,mz,fit,average_mw,monoisotopic_mw,mostabundant_mw,fwhm,signal_noise,mono_abundance,mono_plus2_abundance,orig_intensity,TIA_orig_intensity,drift_time,cumulative_drift_time
5,120,2,15000,501.2567,0.021,1000.9876,1000.4987,1001.0012,0.02,45.1,9000,3000,14000,15500,22.5,110.2
6,131,2,16000,501.2570,0.030,1000.9880,1000.4993,1001.0019,0.02,46.3,9500,3100,15000,16600,24.1,115.8
";

    fn write_temp(name: &str, content: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join("mzumcer-reader-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_read_lc() {
        let path = write_temp("lc_isos.csv", LC_TABLE.as_bytes());
        let mut reader = IsosCsvReader::new(&path);
        let filter = PeakFilter::default();
        let store = reader.load(&filter, &mut ()).unwrap();

        // Row 1 is too faint, row 2 fits poorly and row 3 has no abundance
        assert_eq!(store.len(), 2);
        assert!(!store.has_ims_data());
        let p = &store[0];
        assert_eq!(p.source_line, 0);
        assert_eq!(p.scan, 1);
        assert_eq!(p.charge, 2);
        assert_eq!(p.mono_mass, 1000.4987);
        assert_eq!(p.mono_abundance, Some(9000.0));

        // A blank fit is zero and blank optional columns are absent
        let p = &store[1];
        assert_eq!(p.source_line, 4);
        assert_eq!(p.original_index, 1);
        assert_eq!(p.fit, 0.0);
        assert_eq!(p.mono_abundance, None);

        assert_eq!(reader.counts.peaks_read, 5);
        assert_eq!(reader.counts.peaks_rejected, 3);

        let store = reader
            .load(&filter.with_mass_range(0.0, 500.0), &mut ())
            .unwrap();
        assert!(store.is_empty());
        assert_eq!(reader.counts.peaks_read, 10);
    }

    #[test]
    fn test_read_ims_gzip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(IMS_TABLE.as_bytes()).unwrap();
        let path = write_temp("ims_isos.csv.gz", &encoder.finish().unwrap());

        let mut reader = IsosCsvReader::new(&path);
        let store = reader.load(&PeakFilter::default(), &mut ()).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.has_ims_data());
        assert_eq!(store[0].scan, 5);
        assert_eq!(store[0].ims_scan, Some(120));
        assert_eq!(store[1].drift_time, Some(24.1));
        assert_eq!(store[1].tia_original_intensity, Some(16600.0));
    }

    #[test]
    fn test_malformed_field() {
        let text = "\
scan_num,charge,abundance,mz,fit,average_mw,monoisotopic_mw,mostabundant_mw
1,2,15000,501.2567,0.021,1000.9876,1000.4987,1001.0012
1,2,15000,501.2567,0.021,1000.9876,one thousand,1001.0012
";
        let path = write_temp("malformed_isos.csv", text.as_bytes());
        let mut reader = IsosCsvReader::new(&path);
        match reader.load(&PeakFilter::default(), &mut ()) {
            Err(MZUMCerError::ParseError { row, column, text }) => {
                assert_eq!(row, 1);
                assert_eq!(column, "monoisotopic_mw");
                assert_eq!(text, "one thousand");
            }
            other => panic!("Expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_lines_keep_row_numbers() {
        let text = "\
scan_num,charge,abundance,mz,fit,average_mw,monoisotopic_mw,mostabundant_mw
1,2,15000,501.2567,0.021,1000.9876,1000.4987,1001.0012

2,2,16000,501.2570,0.030,1000.9880,1000.4993,1001.0019


3,2,17000,501.2571,0.030,1000.9881,1000.4995,1001.0020
";
        let path = write_temp("blank_lines_isos.csv", text.as_bytes());
        let mut reader = IsosCsvReader::new(&path);
        let store = reader.load(&PeakFilter::default(), &mut ()).unwrap();
        let lines: Vec<usize> = store.iter().map(|p| p.source_line).collect();
        assert_eq!(lines, vec![0, 2, 5]);
        assert_eq!(reader.counts.peaks_read, 3);
    }

    #[test]
    fn test_malformed_frame() {
        let text = "\
frame_num,ims_scan_num,charge,abundance,mz,fit,monoisotopic_mw
5,120,2,15000,501.2567,0.021,1000.4987
five,121,2,15000,501.2567,0.021,1000.4987
";
        let path = write_temp("malformed_frame_isos.csv", text.as_bytes());
        let mut reader = IsosCsvReader::new(&path);
        match reader.load(&PeakFilter::default(), &mut ()) {
            Err(MZUMCerError::ParseError { row, column, text }) => {
                assert_eq!(row, 1);
                assert_eq!(column, "frame_num");
                assert_eq!(text, "five");
            }
            other => panic!("Expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_column() {
        let path = write_temp("headless_isos.csv", b"charge,abundance\n1,100\n");
        let mut reader = IsosCsvReader::new(&path);
        assert!(matches!(
            reader.load(&PeakFilter::default(), &mut ()),
            Err(MZUMCerError::MissingColumn(_))
        ));
    }
}
