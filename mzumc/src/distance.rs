//! Dissimilarity between pairs of [`IsotopePeak`]
use mzpeaks::Tolerance;

use crate::params::ClusteringParams;
use crate::peak::IsotopePeak;
use crate::store::{PeakStore, ScanRange};

/// A measure of how far apart two peaks are, and whether they are close enough
/// to belong to the same feature.
///
/// `anchor` is always the peak with the lower (or equal) monoisotopic mass.
pub trait PeakDistanceMetric {
    /// Compute the distance between `anchor` and `candidate`, [`f64::INFINITY`] when a
    /// hard constraint is violated
    fn distance(&self, anchor: &IsotopePeak, candidate: &IsotopePeak) -> f64;

    /// Decide whether `candidate` should be linked to `anchor`
    fn is_match(&self, anchor: &IsotopePeak, candidate: &IsotopePeak) -> bool;

    /// The exclusive upper bound on the monoisotopic mass of any candidate worth
    /// comparing against `anchor`
    fn window_upper_bound(&self, anchor: &IsotopePeak) -> f64;
}

#[inline]
fn exceeds(tolerance: Tolerance, anchor_value: f64, candidate_value: f64) -> bool {
    let delta = (anchor_value - candidate_value).abs();
    match tolerance {
        // Normalized by the anchor's value alone
        Tolerance::PPM(ppm) => anchor_value > 0.0 && delta * 1e6 / anchor_value > ppm,
        Tolerance::Da(da) => delta > da,
    }
}

#[inline]
fn weighted_square(delta: f64, weight: f64) -> f64 {
    let x = delta * weight;
    x * x
}

/// A weighted Euclidean distance over mass, abundance, elution time, fit and
/// drift time, with hard gates on monoisotopic and average mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedPeakDistance {
    pub params: ClusteringParams,
    /// The LC scan range NET is computed over. It must not be degenerate.
    pub scan_range: ScanRange,
    pub use_drift_time: bool,
}

impl WeightedPeakDistance {
    pub fn new(params: ClusteringParams, scan_range: ScanRange, use_drift_time: bool) -> Self {
        Self {
            params,
            scan_range: scan_range.widened(),
            use_drift_time,
        }
    }

    /// Create a metric normalizing elution times over the scans observed in `store`
    pub fn for_store(params: ClusteringParams, store: &PeakStore) -> Self {
        Self::new(params, store.lc_scan_range(), store.has_ims_data())
    }

    #[inline]
    pub fn passes_gates(&self, anchor: &IsotopePeak, candidate: &IsotopePeak) -> bool {
        !(exceeds(
            self.params.mono_mass_tolerance,
            anchor.mono_mass,
            candidate.mono_mass,
        ) || exceeds(
            self.params.average_mass_tolerance,
            anchor.average_mass,
            candidate.average_mass,
        ))
    }
}

impl PeakDistanceMetric for WeightedPeakDistance {
    fn distance(&self, anchor: &IsotopePeak, candidate: &IsotopePeak) -> f64 {
        if !self.passes_gates(anchor, candidate) {
            return f64::INFINITY;
        }
        let w = &self.params.weights;

        let mut acc = weighted_square(anchor.mono_mass - candidate.mono_mass, w.mono_mass);
        acc += weighted_square(
            anchor.average_mass - candidate.average_mass,
            w.average_mass,
        );
        acc += weighted_square(
            anchor.abundance.log10() - candidate.abundance.log10(),
            w.log_abundance,
        );

        let scan_delta = (anchor.scan - candidate.scan) as f64;
        acc += if self.params.use_net {
            weighted_square(scan_delta / self.scan_range.width(), w.net)
        } else {
            weighted_square(scan_delta, w.scan)
        };

        acc += weighted_square((anchor.fit - candidate.fit) as f64, w.fit);

        if self.use_drift_time {
            acc += weighted_square(
                (anchor.drift_time_or_zero() - candidate.drift_time_or_zero()) as f64,
                w.drift_time,
            );
        }

        acc.sqrt()
    }

    #[inline]
    fn is_match(&self, anchor: &IsotopePeak, candidate: &IsotopePeak) -> bool {
        if self.params.use_charge && anchor.charge != candidate.charge {
            return false;
        }
        self.distance(anchor, candidate) < self.params.max_distance
    }

    #[inline]
    fn window_upper_bound(&self, anchor: &IsotopePeak) -> f64 {
        self.params.window_upper_bound(anchor.mono_mass)
    }
}
