//! `mzumc` groups deisotoped LC-MS peaks observed over many scans into features,
//! unique mass classes ([`UMC`]), using tolerance-windowed single linkage clustering.
//!
//! The pipeline runs from a [`PeakStore`] through [`SingleLinkageClusterer`] under a
//! [`WeightedPeakDistance`], then [`summarize_clusters`] and [`remove_short_features`].
//! [`FeatureFinder`] wires these together, optionally splitting the mass range into
//! overlapping segments to bound memory use.
//!
//! ```
//! use mzumc::prelude::*;
//!
//! let mut peaks = vec![
//!     IsotopePeak::new(10, 2, 5000.0, 501.007, 0.05, 1000.6, 1000.00, 1000.5).with_source_line(0),
//!     IsotopePeak::new(11, 2, 6000.0, 501.017, 0.05, 1000.605, 1000.02, 1000.52).with_source_line(1),
//! ];
//! let finder = FeatureFinder::new(ClusteringParams::default(), PeakFilter::default());
//! let mut outputs: Vec<SegmentOutput> = Vec::new();
//! finder.run(&mut peaks, &mut outputs, &mut ()).unwrap();
//! assert_eq!(outputs[0].features.len(), 1);
//! ```
pub mod cluster;
pub mod distance;
pub mod error;
pub mod filter;
pub mod params;
pub mod peak;
pub mod progress;
pub mod segment;
pub mod store;
pub mod summary;

pub use cluster::{ClusterMap, SingleLinkageClusterer};
pub use distance::{PeakDistanceMetric, WeightedPeakDistance};
pub use error::FeatureFinderError;
pub use filter::remove_short_features;
pub use params::{ClusteringParams, DistanceWeights, SegmentParams};
pub use peak::{IsotopePeak, PeakFilter, ScanNumber};
pub use progress::{LogProgress, ProgressObserver, ProgressRecord, Stage, StageProgress};
pub use segment::{FeatureFinder, FeatureSink, MassSegment, PeakSource, SegmentOutput};
pub use store::{PeakStore, ScanRange};
pub use summary::{summarize_clusters, UMC};

pub use mzpeaks::Tolerance;

pub mod prelude {
    pub use crate::distance::PeakDistanceMetric;
    pub use crate::params::{ClusteringParams, DistanceWeights, SegmentParams};
    pub use crate::peak::{IsotopePeak, PeakFilter};
    pub use crate::progress::ProgressObserver;
    pub use crate::segment::{FeatureFinder, FeatureSink, PeakSource, SegmentOutput};
    pub use crate::store::PeakStore;
    pub use crate::summary::UMC;
    pub use mzpeaks::Tolerance;
}
