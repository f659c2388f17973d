//! The settings document read from TOML files and the environment, and its
//! conversion into the parameters of a [`FeatureFinder`].
use serde::{Deserialize, Serialize};
use tracing::info;

use mzpeaks::Tolerance;
use mzumc::{
    ClusteringParams, DistanceWeights, FeatureFinder, FeatureFinderError, PeakFilter,
    SegmentParams,
};

use crate::mass_range::MassRange;

/// The mass width of the range processed when chunking without an upper mass bound
pub const DEFAULT_CHUNKED_MASS_WIDTH: f64 = 250.0;
pub const DEFAULT_CHUNK_SIZE: f64 = 3000.0;

/// Which peaks to read from the input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataFilters {
    /// The worst isotopic fit to accept, 0 accepts all
    pub max_isotopic_fit: f32,
    pub minimum_intensity: f64,
    pub mono_mass_start: f64,
    /// 0 leaves the mass range open unless processing in chunks
    pub mono_mass_end: f64,
    pub process_in_chunks: bool,
    pub chunk_size: f64,
    pub chunk_overlap: f64,
    pub lc_min_scan: i32,
    /// 0 leaves the scan range open
    pub lc_max_scan: i32,
    pub ims_min_scan: i32,
    /// 0 leaves the scan range open
    pub ims_max_scan: i32,
}

impl Default for DataFilters {
    fn default() -> Self {
        Self {
            max_isotopic_fit: 0.15,
            minimum_intensity: 500.0,
            mono_mass_start: 0.0,
            mono_mass_end: 0.0,
            process_in_chunks: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: 2.0,
            lc_min_scan: 0,
            lc_max_scan: 0,
            ims_min_scan: 0,
            ims_max_scan: 0,
        }
    }
}

impl DataFilters {
    fn mass_end(&self) -> f64 {
        if self.mono_mass_end == 0.0 {
            if self.process_in_chunks {
                self.mono_mass_start + DEFAULT_CHUNKED_MASS_WIDTH
            } else {
                f64::INFINITY
            }
        } else {
            self.mono_mass_end
        }
    }

    pub fn mass_range(&self) -> MassRange {
        MassRange::new(self.mono_mass_start, self.mass_end())
    }

    pub fn peak_filter(&self) -> PeakFilter {
        let max_isotopic_fit = if self.max_isotopic_fit == 0.0 {
            1.0
        } else {
            self.max_isotopic_fit
        };
        let open_ended = |v: i32| if v == 0 { i32::MAX } else { v };
        PeakFilter {
            max_isotopic_fit,
            min_intensity: self.minimum_intensity,
            mono_mass_start: self.mono_mass_start,
            mono_mass_end: self.mass_end(),
            lc_min_scan: self.lc_min_scan,
            lc_max_scan: open_ended(self.lc_max_scan),
            ims_min_scan: self.ims_min_scan,
            ims_max_scan: open_ended(self.ims_max_scan),
        }
    }

    pub fn segment_params(&self) -> Option<SegmentParams> {
        if !self.process_in_chunks {
            return None;
        }
        let chunk_size = if self.chunk_size == 0.0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        };
        Some(SegmentParams::new(
            self.mono_mass_start,
            self.mass_end(),
            chunk_size,
            self.chunk_overlap,
        ))
    }
}

/// How peaks are compared and grouped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UMCCreationOptions {
    pub mono_mass_weight: f64,
    pub mono_mass_constraint: f64,
    pub mono_mass_constraint_is_ppm: bool,
    pub average_mass_weight: f64,
    pub average_mass_constraint: f64,
    pub average_mass_constraint_is_ppm: bool,
    pub log_abundance_weight: f64,
    pub scan_weight: f64,
    pub net_weight: f64,
    pub fit_weight: f64,
    pub ims_drift_time_weight: f64,
    pub max_distance: f64,
    pub use_generic_net: bool,
    pub use_charge: bool,
    pub min_feature_length: usize,
    /// Switch to [`UMCCreationOptions::apply_wiff_pek_weights`] when reading a PEK
    /// report generated from a `.wiff` file
    pub wiff_pek_weights: bool,
}

impl Default for UMCCreationOptions {
    fn default() -> Self {
        Self {
            mono_mass_weight: 0.01,
            mono_mass_constraint: 50.0,
            mono_mass_constraint_is_ppm: true,
            average_mass_weight: 0.01,
            average_mass_constraint: 10.0,
            average_mass_constraint_is_ppm: true,
            log_abundance_weight: 0.1,
            scan_weight: 0.0,
            net_weight: 0.01,
            fit_weight: 0.01,
            ims_drift_time_weight: 0.1,
            max_distance: 0.1,
            use_generic_net: true,
            use_charge: false,
            min_feature_length: 2,
            wiff_pek_weights: false,
        }
    }
}

fn make_tolerance(value: f64, is_ppm: bool) -> Tolerance {
    if is_ppm {
        Tolerance::PPM(value)
    } else {
        Tolerance::Da(value)
    }
}

impl UMCCreationOptions {
    /// The weights and constraints tuned for PEK reports from `.wiff` files
    pub fn apply_wiff_pek_weights(&mut self) {
        self.mono_mass_weight = 0.0025;
        self.average_mass_weight = 0.0025;
        self.log_abundance_weight = 0.1;
        self.scan_weight = 0.01;
        self.fit_weight = 0.1;
        self.ims_drift_time_weight = 0.1;
        self.mono_mass_constraint = 25.0;
        self.mono_mass_constraint_is_ppm = true;
        self.average_mass_constraint = 25.0;
        self.average_mass_constraint_is_ppm = true;
        self.use_generic_net = true;
        self.max_distance = 0.1;
    }

    pub fn clustering_params(&self) -> ClusteringParams {
        let weights = DistanceWeights {
            mono_mass: self.mono_mass_weight,
            average_mass: self.average_mass_weight,
            log_abundance: self.log_abundance_weight,
            scan: self.scan_weight,
            net: self.net_weight,
            fit: self.fit_weight,
            drift_time: self.ims_drift_time_weight,
        };
        ClusteringParams::new(
            make_tolerance(self.mono_mass_constraint, self.mono_mass_constraint_is_ppm),
            make_tolerance(
                self.average_mass_constraint,
                self.average_mass_constraint_is_ppm,
            ),
            weights,
            self.max_distance,
        )
        .with_use_net(self.use_generic_net)
        .with_use_charge(self.use_charge)
        .with_min_feature_length(self.min_feature_length)
    }
}

/// The complete settings document
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_filters: DataFilters,
    pub umc_creation: UMCCreationOptions,
}

impl Settings {
    /// Build and validate the [`FeatureFinder`] these settings describe
    pub fn feature_finder(&self) -> Result<FeatureFinder, FeatureFinderError> {
        let filter = self.data_filters.peak_filter();
        let range = self.data_filters.mass_range();
        if range.end.is_nan() || range.end < range.start {
            return Err(FeatureFinderError::InvalidMassRange {
                start: range.start,
                end: range.end,
            });
        }
        let mut finder = FeatureFinder::new(self.umc_creation.clustering_params(), filter);
        if let Some(segments) = self.data_filters.segment_params() {
            finder = finder.with_segments(segments);
        }
        finder.validate()?;
        Ok(finder)
    }

    pub fn log(&self) {
        let filter = self.data_filters.peak_filter();
        info!("Data Filters -");
        info!(" LC scan range = {}-{}", filter.lc_min_scan, filter.lc_max_scan);
        info!(" IMS scan range = {}-{}", filter.ims_min_scan, filter.ims_max_scan);
        info!(" Maximum fit = {}", filter.max_isotopic_fit);
        info!(" Minimum intensity = {}", filter.min_intensity);
        info!(
            " Mono mass range = {}-{}",
            filter.mono_mass_start, filter.mono_mass_end
        );
        if let Some(segments) = self.data_filters.segment_params() {
            info!(
                " Processing in chunks of {} Da with {} Da overlap",
                segments.chunk_size, segments.overlap
            );
        }
        info!(
            " Require matching charge state = {}",
            self.umc_creation.use_charge
        );
    }
}
