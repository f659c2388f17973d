//! An ordered, growable collection of [`IsotopePeak`] with the observed scan ranges
use std::ops::Index;
use std::slice;

use tracing::debug;

use crate::error::FeatureFinderError;
use crate::peak::{IsotopePeak, ScanNumber};

/// An inclusive range of scan numbers observed in a [`PeakStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanRange {
    pub min: ScanNumber,
    pub max: ScanNumber,
}

impl ScanRange {
    pub fn new(min: ScanNumber, max: ScanNumber) -> Self {
        Self { min, max }
    }

    fn include(&mut self, scan: ScanNumber) {
        self.min = self.min.min(scan);
        self.max = self.max.max(scan);
    }

    /// The width of the range, never less than one so it can be divided by
    #[inline]
    pub fn width(&self) -> f64 {
        if self.max <= self.min {
            1.0
        } else {
            (self.max - self.min) as f64
        }
    }

    /// Express `scan` as a fraction of the way through this range
    #[inline]
    pub fn normalize(&self, scan: ScanNumber) -> f64 {
        (scan - self.min) as f64 / self.width()
    }

    /// Make a degenerate range span a single unit, `max = min + 1`
    pub fn widened(mut self) -> Self {
        if self.max <= self.min {
            self.max = self.min + 1;
        }
        self
    }
}

/// The peaks admitted for one feature finding run.
///
/// Each pushed peak has its [`IsotopePeak::original_index`] set to its position
/// in the store, so positions and original indices are interchangeable.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PeakStore {
    peaks: Vec<IsotopePeak>,
    lc_scan_range: Option<ScanRange>,
    ims_scan_range: Option<ScanRange>,
}

impl PeakStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            peaks: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    /// Build a store from an iterator of peaks, failing on the first peak with a
    /// non-positive abundance
    pub fn from_peaks<I: IntoIterator<Item = IsotopePeak>>(
        peaks: I,
    ) -> Result<Self, FeatureFinderError> {
        let peaks = peaks.into_iter();
        let mut this = Self::with_capacity(peaks.size_hint().0);
        for peak in peaks {
            this.push(peak)?;
        }
        Ok(this)
    }

    /// Add `peak` to the end of the store, returning its original index.
    pub fn push(&mut self, peak: IsotopePeak) -> Result<usize, FeatureFinderError> {
        if !(peak.abundance.is_finite() && peak.abundance > 0.0) {
            return Err(FeatureFinderError::NonPositiveAbundance {
                source_line: peak.source_line,
                abundance: peak.abundance,
            });
        }
        Ok(self.insert(peak))
    }

    fn insert(&mut self, mut peak: IsotopePeak) -> usize {
        let index = self.peaks.len();
        peak.original_index = index;

        match self.lc_scan_range.as_mut() {
            Some(range) => range.include(peak.scan),
            None => self.lc_scan_range = Some(ScanRange::new(peak.scan, peak.scan)),
        }
        if let Some(ims_scan) = peak.ims_scan {
            match self.ims_scan_range.as_mut() {
                Some(range) => range.include(ims_scan),
                None => self.ims_scan_range = Some(ScanRange::new(ims_scan, ims_scan)),
            }
        }

        self.peaks.push(peak);
        index
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&IsotopePeak> {
        self.peaks.get(index)
    }

    pub fn iter(&self) -> slice::Iter<'_, IsotopePeak> {
        self.peaks.iter()
    }

    pub fn as_slice(&self) -> &[IsotopePeak] {
        &self.peaks
    }

    /// Whether any peak carries an ion mobility scan
    pub fn has_ims_data(&self) -> bool {
        self.ims_scan_range.is_some()
    }

    /// The LC scan range of the store, widened so that it never has zero width.
    ///
    /// An empty store reports `0..=1`.
    pub fn lc_scan_range(&self) -> ScanRange {
        self.lc_scan_range
            .unwrap_or(ScanRange::new(0, 0))
            .widened()
    }

    pub fn ims_scan_range(&self) -> Option<ScanRange> {
        self.ims_scan_range.map(|r| r.widened())
    }

    /// Keep only the peaks matching `predicate`, re-assigning original indices and
    /// recomputing the scan ranges.
    pub fn retain<F: FnMut(&IsotopePeak) -> bool>(&mut self, mut predicate: F) {
        let before = self.peaks.len();
        let peaks = std::mem::take(&mut self.peaks);
        self.lc_scan_range = None;
        self.ims_scan_range = None;
        for peak in peaks.into_iter().filter(|p| predicate(p)) {
            self.insert(peak);
        }
        debug!("Retained {} of {before} peaks", self.peaks.len());
    }

    pub fn into_inner(self) -> Vec<IsotopePeak> {
        self.peaks
    }
}

impl Index<usize> for PeakStore {
    type Output = IsotopePeak;

    fn index(&self, index: usize) -> &Self::Output {
        &self.peaks[index]
    }
}

impl<'a> IntoIterator for &'a PeakStore {
    type Item = &'a IsotopePeak;

    type IntoIter = slice::Iter<'a, IsotopePeak>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Extend<IsotopePeak> for PeakStore {
    /// Peaks with a non-positive abundance are skipped
    fn extend<T: IntoIterator<Item = IsotopePeak>>(&mut self, iter: T) {
        for peak in iter {
            if let Err(e) = self.push(peak) {
                debug!("Skipping peak: {e}");
            }
        }
    }
}
