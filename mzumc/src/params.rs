//! The immutable parameter sets that govern a feature finding run
use mzpeaks::Tolerance;

use crate::error::FeatureFinderError;

/// Scale each axis of the [`WeightedPeakDistance`](crate::distance::WeightedPeakDistance)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceWeights {
    pub mono_mass: f64,
    pub average_mass: f64,
    pub log_abundance: f64,
    /// Applied to the raw scan difference when NET is not in use
    pub scan: f64,
    /// Applied to the normalized elution time difference when NET is in use
    pub net: f64,
    pub fit: f64,
    pub drift_time: f64,
}

impl Default for DistanceWeights {
    fn default() -> Self {
        Self {
            mono_mass: 0.01,
            average_mass: 0.01,
            log_abundance: 0.1,
            scan: 0.0,
            net: 0.01,
            fit: 0.01,
            drift_time: 0.1,
        }
    }
}

impl DistanceWeights {
    /// Weight only the monoisotopic mass axis
    pub fn mono_mass_only(weight: f64) -> Self {
        Self {
            mono_mass: weight,
            average_mass: 0.0,
            log_abundance: 0.0,
            scan: 0.0,
            net: 0.0,
            fit: 0.0,
            drift_time: 0.0,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> {
        [
            ("mono_mass_weight", self.mono_mass),
            ("average_mass_weight", self.average_mass),
            ("log_abundance_weight", self.log_abundance),
            ("scan_weight", self.scan),
            ("net_weight", self.net),
            ("fit_weight", self.fit),
            ("drift_time_weight", self.drift_time),
        ]
        .into_iter()
    }
}

/// The half-width of the mass window opened around `mass` by `tolerance`, in Daltons
#[inline]
pub fn tolerance_width(tolerance: Tolerance, mass: f64) -> f64 {
    match tolerance {
        Tolerance::PPM(ppm) => mass * ppm / 1e6,
        Tolerance::Da(da) => da,
    }
}

fn tolerance_value(tolerance: Tolerance) -> f64 {
    match tolerance {
        Tolerance::PPM(v) | Tolerance::Da(v) => v,
    }
}

/// The parameters of the single linkage clustering and feature filtering steps.
///
/// These are fixed for the duration of a run, never per-peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusteringParams {
    /// The hard gate on monoisotopic mass, which also sets the width of the sweep window
    pub mono_mass_tolerance: Tolerance,
    /// The hard gate on average mass
    pub average_mass_tolerance: Tolerance,
    pub weights: DistanceWeights,
    /// Two peaks match when their weighted distance is strictly below this value
    pub max_distance: f64,
    /// Use normalized elution time instead of the raw scan number
    pub use_net: bool,
    /// Require matched peaks to share a charge state
    pub use_charge: bool,
    /// The minimum number of member peaks a feature needs to survive filtering
    pub min_feature_length: usize,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            mono_mass_tolerance: Tolerance::PPM(50.0),
            average_mass_tolerance: Tolerance::PPM(10.0),
            weights: DistanceWeights::default(),
            max_distance: 0.1,
            use_net: true,
            use_charge: false,
            min_feature_length: 2,
        }
    }
}

impl ClusteringParams {
    pub fn new(
        mono_mass_tolerance: Tolerance,
        average_mass_tolerance: Tolerance,
        weights: DistanceWeights,
        max_distance: f64,
    ) -> Self {
        Self {
            mono_mass_tolerance,
            average_mass_tolerance,
            weights,
            max_distance,
            ..Default::default()
        }
    }

    pub fn with_use_net(mut self, use_net: bool) -> Self {
        self.use_net = use_net;
        self
    }

    pub fn with_use_charge(mut self, use_charge: bool) -> Self {
        self.use_charge = use_charge;
        self
    }

    pub fn with_min_feature_length(mut self, min_feature_length: usize) -> Self {
        self.min_feature_length = min_feature_length;
        self
    }

    /// The upper bound of the sweep window opened by a peak at `mass`
    #[inline]
    pub fn window_upper_bound(&self, mass: f64) -> f64 {
        mass + tolerance_width(self.mono_mass_tolerance, mass)
    }

    pub fn validate(&self) -> Result<(), FeatureFinderError> {
        if !(self.max_distance.is_finite() && self.max_distance > 0.0) {
            return Err(FeatureFinderError::invalid_parameter(
                "max_distance",
                format!("must be positive, got {}", self.max_distance),
            ));
        }
        for (name, tol) in [
            ("mono_mass_constraint", self.mono_mass_tolerance),
            ("average_mass_constraint", self.average_mass_tolerance),
        ] {
            let v = tolerance_value(tol);
            if !(v.is_finite() && v >= 0.0) {
                return Err(FeatureFinderError::invalid_parameter(
                    name,
                    format!("must be non-negative, got {v}"),
                ));
            }
        }
        for (name, weight) in self.weights.iter() {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(FeatureFinderError::invalid_parameter(
                    name,
                    format!("must be non-negative, got {weight}"),
                ));
            }
        }
        Ok(())
    }
}

/// How to split a mass range into segments that are processed one after another
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentParams {
    pub mass_start: f64,
    pub mass_end: f64,
    /// The width of each segment in Daltons
    pub chunk_size: f64,
    /// How far past its end each segment reads, in Daltons
    pub overlap: f64,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            mass_start: 0.0,
            mass_end: f64::INFINITY,
            chunk_size: 3000.0,
            overlap: 2.0,
        }
    }
}

impl SegmentParams {
    pub fn new(mass_start: f64, mass_end: f64, chunk_size: f64, overlap: f64) -> Self {
        Self {
            mass_start,
            mass_end,
            chunk_size,
            overlap,
        }
    }

    pub fn validate(&self) -> Result<(), FeatureFinderError> {
        if !(self.chunk_size.is_finite() && self.chunk_size > 0.0) {
            return Err(FeatureFinderError::invalid_parameter(
                "chunk_size",
                format!("must be positive, got {}", self.chunk_size),
            ));
        }
        if !(self.overlap.is_finite() && self.overlap >= 0.0) {
            return Err(FeatureFinderError::invalid_parameter(
                "chunk_overlap",
                format!("must be non-negative, got {}", self.overlap),
            ));
        }
        if self.mass_start.is_nan() || self.mass_end.is_nan() || self.mass_end < self.mass_start {
            return Err(FeatureFinderError::InvalidMassRange {
                start: self.mass_start,
                end: self.mass_end,
            });
        }
        if !self.mass_end.is_finite() {
            return Err(FeatureFinderError::invalid_parameter(
                "mono_mass_end",
                "segmented processing requires a finite mass range",
            ));
        }
        Ok(())
    }
}
