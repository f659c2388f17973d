//! The isotope peak record that the feature finder clusters, and the filter
//! applied to peaks as they are ingested.
use std::cmp::Ordering;

/// An integral scan or frame number
pub type ScanNumber = i32;

/// A single deisotoped signal observed in one scan.
///
/// All fields are set once by the ingesting reader. The identity fields
/// [`IsotopePeak::original_index`] and [`IsotopePeak::source_line`] are the
/// only ways to trace a peak back to its input; cluster membership is tracked
/// outside of the peak by [`ClusterMap`](crate::cluster::ClusterMap).
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IsotopePeak {
    /// The position of this peak in the [`PeakStore`](crate::store::PeakStore) it was pushed into
    pub original_index: usize,
    /// The record number in the source file this peak was read from
    pub source_line: usize,

    /// The LC scan (or IMS frame) this peak was observed in
    pub scan: ScanNumber,
    /// The ion mobility scan, if the data were mobility resolved
    pub ims_scan: Option<ScanNumber>,

    pub charge: i32,
    pub abundance: f64,
    pub mz: f64,
    /// The isotopic pattern fit score, lower is better
    pub fit: f32,
    pub average_mass: f64,
    pub mono_mass: f64,
    pub most_abundant_mass: f64,

    /// The abundance of the monoisotopic peak, when the input reports it
    pub mono_abundance: Option<f64>,
    /// The abundance of the M+2 peak, used by isotopically labeled experiments
    pub mono_plus2_abundance: Option<f64>,

    pub original_intensity: Option<f32>,
    pub tia_original_intensity: Option<f32>,
    pub drift_time: Option<f32>,
    pub cumulative_drift_time: Option<f32>,
}

impl IsotopePeak {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scan: ScanNumber,
        charge: i32,
        abundance: f64,
        mz: f64,
        fit: f32,
        average_mass: f64,
        mono_mass: f64,
        most_abundant_mass: f64,
    ) -> Self {
        Self {
            scan,
            charge,
            abundance,
            mz,
            fit,
            average_mass,
            mono_mass,
            most_abundant_mass,
            ..Default::default()
        }
    }

    /// Attach ion mobility coordinates to this peak
    pub fn with_mobility(mut self, ims_scan: ScanNumber, drift_time: f32) -> Self {
        self.ims_scan = Some(ims_scan);
        self.drift_time = Some(drift_time);
        self
    }

    pub fn with_source_line(mut self, source_line: usize) -> Self {
        self.source_line = source_line;
        self
    }

    /// The drift time, or zero when the peak carries no mobility dimension
    #[inline]
    pub fn drift_time_or_zero(&self) -> f32 {
        self.drift_time.unwrap_or_default()
    }

    /// The ordering used to build the clustering sweep: monoisotopic mass, then scan.
    #[inline]
    pub fn sweep_order(&self, other: &Self) -> Ordering {
        self.mono_mass
            .total_cmp(&other.mono_mass)
            .then_with(|| self.scan.cmp(&other.scan))
    }
}

impl PartialOrd for IsotopePeak {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.sweep_order(other))
    }
}

/// Acceptance criteria applied to every peak while it is read.
///
/// These are applied exactly once, at ingestion. Nothing downstream of the
/// [`PeakStore`](crate::store::PeakStore) checks them again.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeakFilter {
    pub max_isotopic_fit: f32,
    pub min_intensity: f64,
    pub mono_mass_start: f64,
    pub mono_mass_end: f64,
    pub lc_min_scan: ScanNumber,
    pub lc_max_scan: ScanNumber,
    pub ims_min_scan: ScanNumber,
    pub ims_max_scan: ScanNumber,
}

impl Default for PeakFilter {
    fn default() -> Self {
        Self {
            max_isotopic_fit: 0.15,
            min_intensity: 500.0,
            mono_mass_start: 0.0,
            mono_mass_end: f64::INFINITY,
            lc_min_scan: 0,
            lc_max_scan: ScanNumber::MAX,
            ims_min_scan: 0,
            ims_max_scan: ScanNumber::MAX,
        }
    }
}

impl PeakFilter {
    /// A filter that accepts every peak with a usable abundance
    pub fn permissive() -> Self {
        Self {
            max_isotopic_fit: f32::INFINITY,
            min_intensity: 0.0,
            mono_mass_start: f64::NEG_INFINITY,
            mono_mass_end: f64::INFINITY,
            lc_min_scan: ScanNumber::MIN,
            lc_max_scan: ScanNumber::MAX,
            ims_min_scan: ScanNumber::MIN,
            ims_max_scan: ScanNumber::MAX,
        }
    }

    /// Restrict the monoisotopic mass range, leaving the other criteria untouched
    pub fn with_mass_range(mut self, start: f64, end: f64) -> Self {
        self.mono_mass_start = start;
        self.mono_mass_end = end;
        self
    }

    #[inline]
    pub fn mass_in_range(&self, mass: f64) -> bool {
        self.mono_mass_start <= mass && mass <= self.mono_mass_end
    }

    /// Test whether `peak` should be admitted into a [`PeakStore`](crate::store::PeakStore).
    ///
    /// Peaks whose abundance is not a positive finite number are always rejected,
    /// they cannot contribute a log-abundance term to the peak distance.
    pub fn accepts(&self, peak: &IsotopePeak) -> bool {
        if !(peak.abundance.is_finite() && peak.abundance > 0.0) {
            return false;
        }
        if !peak.mono_mass.is_finite() {
            return false;
        }
        let ims_ok = match peak.ims_scan {
            Some(ims_scan) => self.ims_min_scan <= ims_scan && ims_scan <= self.ims_max_scan,
            None => true,
        };
        peak.abundance >= self.min_intensity
            && peak.fit <= self.max_isotopic_fit
            && self.mass_in_range(peak.mono_mass)
            && self.lc_min_scan <= peak.scan
            && peak.scan <= self.lc_max_scan
            && ims_ok
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn peak(mass: f64, scan: ScanNumber, abundance: f64) -> IsotopePeak {
        IsotopePeak::new(scan, 2, abundance, mass / 2.0, 0.05, mass + 0.5, mass, mass + 1.0)
    }

    #[test]
    fn test_sweep_order() {
        let a = peak(1000.0, 10, 1e4);
        let b = peak(1000.0, 5, 1e4);
        let c = peak(999.0, 50, 1e4);
        let mut peaks = vec![a.clone(), b.clone(), c.clone()];
        peaks.sort_by(|x, y| x.sweep_order(y));
        assert_eq!(peaks, vec![c, b, a]);
    }

    #[test]
    fn test_filter_defaults() {
        let filter = PeakFilter::default();
        assert!(filter.accepts(&peak(1500.0, 100, 1e4)));
        assert!(!filter.accepts(&peak(1500.0, 100, 499.0)));

        let mut poor_fit = peak(1500.0, 100, 1e4);
        poor_fit.fit = 0.3;
        assert!(!filter.accepts(&poor_fit));
    }

    #[test]
    fn test_filter_rejects_nonpositive_abundance() {
        let filter = PeakFilter::permissive();
        assert!(filter.accepts(&peak(1500.0, 100, 1.0)));
        assert!(!filter.accepts(&peak(1500.0, 100, 0.0)));
        assert!(!filter.accepts(&peak(1500.0, 100, -3.0)));
        assert!(!filter.accepts(&peak(1500.0, 100, f64::NAN)));
    }

    #[test]
    fn test_filter_ranges() {
        let filter = PeakFilter {
            lc_min_scan: 10,
            lc_max_scan: 20,
            ims_min_scan: 100,
            ims_max_scan: 200,
            ..PeakFilter::permissive()
        }
        .with_mass_range(500.0, 1000.0);

        assert!(filter.accepts(&peak(500.0, 10, 1.0)));
        assert!(filter.accepts(&peak(1000.0, 20, 1.0)));
        assert!(!filter.accepts(&peak(1000.01, 20, 1.0)));
        assert!(!filter.accepts(&peak(700.0, 21, 1.0)));

        assert!(filter.accepts(&peak(700.0, 15, 1.0).with_mobility(150, 12.5)));
        assert!(!filter.accepts(&peak(700.0, 15, 1.0).with_mobility(250, 12.5)));
    }
}
