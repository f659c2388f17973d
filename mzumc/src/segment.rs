//! Drive the Load → Cluster → Summarize → Filter → Emit pipeline, either over the
//! whole mass range at once or over a series of overlapping mass segments.
//!
//! Segmented runs bound how many peaks are resident at once. Segments are processed
//! in order of increasing mass. Each one reads a little past its upper bound so a
//! feature straddling the boundary can be completed, and the peaks that such a
//! feature takes from the next segment's range are remembered so they are not used
//! twice. Features wider than the overlap can still be split in two.
use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::cluster::{ClusterMap, SingleLinkageClusterer};
use crate::distance::WeightedPeakDistance;
use crate::error::FeatureFinderError;
use crate::filter::remove_short_features;
use crate::params::{ClusteringParams, SegmentParams};
use crate::peak::{IsotopePeak, PeakFilter};
use crate::progress::{ProgressObserver, ProgressRecord, Stage, StageProgress};
use crate::store::PeakStore;
use crate::summary::{summarize_clusters, UMC};

/// Something that can produce the peaks within a [`PeakFilter`]'s bounds.
///
/// A segmented run calls [`PeakSource::load`] once per segment, so implementations
/// must be able to read their data more than once. Each peak's
/// [`IsotopePeak::source_line`] must be unique within the source.
pub trait PeakSource {
    type Error: From<FeatureFinderError>;

    fn load(
        &mut self,
        filter: &PeakFilter,
        observer: &mut dyn ProgressObserver,
    ) -> Result<PeakStore, Self::Error>;
}

/// An in-memory list of peaks.
///
/// If two peaks share a source line, every peak's source line is replaced by its
/// position in the list before the first load.
impl PeakSource for Vec<IsotopePeak> {
    type Error = FeatureFinderError;

    fn load(
        &mut self,
        filter: &PeakFilter,
        observer: &mut dyn ProgressObserver,
    ) -> Result<PeakStore, Self::Error> {
        let mut seen = HashSet::with_capacity(self.len());
        if !self.iter().all(|p| seen.insert(p.source_line)) {
            debug!("Source lines are not unique, numbering peaks by position");
            for (i, peak) in self.iter_mut().enumerate() {
                peak.source_line = i;
            }
        }

        let mut progress = StageProgress::new(observer, Stage::Loading, self.len());
        let mut store = PeakStore::new();
        for (i, peak) in self.iter().enumerate() {
            if filter.accepts(peak) {
                store.push(peak.clone())?;
            }
            progress.update(i + 1);
        }
        progress.finish();
        Ok(store)
    }
}

/// The features produced by one pass of the pipeline, with their final ids
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SegmentOutput {
    /// The segment index, or `None` when the whole mass range was processed at once
    pub segment: Option<usize>,
    /// The number of features emitted before this output, added to every feature id
    pub offset: usize,
    pub features: Vec<UMC>,
    /// `(feature id, source line)` pairs, ordered by feature id then by peak order
    pub mapping: Vec<(usize, usize)>,
}

impl SegmentOutput {
    fn new(
        segment: Option<usize>,
        offset: usize,
        mut features: Vec<UMC>,
        clusters: &ClusterMap,
        store: &PeakStore,
    ) -> Self {
        for f in features.iter_mut() {
            f.id += offset;
        }
        let mapping = clusters
            .iter()
            .flat_map(|(cluster_id, members)| {
                members
                    .iter()
                    .map(move |i| (cluster_id + offset, store[*i].source_line))
            })
            .collect();
        Self {
            segment,
            offset,
            features,
            mapping,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Receives the features of each pass as they are completed
pub trait FeatureSink {
    type Error: From<FeatureFinderError>;

    fn emit(&mut self, output: SegmentOutput) -> Result<(), Self::Error>;
}

impl FeatureSink for Vec<SegmentOutput> {
    type Error = FeatureFinderError;

    fn emit(&mut self, output: SegmentOutput) -> Result<(), Self::Error> {
        self.push(output);
        Ok(())
    }
}

/// One mass segment of a segmented run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassSegment {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    /// The upper bound on the masses loaded for this segment, `end` plus the overlap
    pub load_end: f64,
    pub is_last: bool,
}

impl MassSegment {
    /// Whether a feature starting at `min_mono_mass` belongs to this segment
    pub fn owns(&self, min_mono_mass: f64) -> bool {
        self.is_last || min_mono_mass < self.end
    }
}

/// Iterate over the [`MassSegment`]s of a [`SegmentParams`]
#[derive(Debug, Clone)]
pub struct MassSegments {
    params: SegmentParams,
    index: usize,
}

impl MassSegments {
    pub fn new(params: SegmentParams) -> Self {
        Self { params, index: 0 }
    }

    fn start_of(&self, index: usize) -> f64 {
        self.params.mass_start + index as f64 * self.params.chunk_size
    }
}

impl Iterator for MassSegments {
    type Item = MassSegment;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.start_of(self.index);
        if !(start < self.params.mass_end) {
            return None;
        }
        let end = (start + self.params.chunk_size).min(self.params.mass_end);
        let is_last = end >= self.params.mass_end;
        let load_end = if is_last {
            end
        } else {
            (end + self.params.overlap).min(self.params.mass_end)
        };
        let segment = MassSegment {
            index: self.index,
            start,
            end,
            load_end,
            is_last,
        };
        self.index += 1;
        Some(segment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = ((self.params.mass_end - self.start_of(self.index)) / self.params.chunk_size)
            .ceil()
            .max(0.0) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for MassSegments {}

impl SegmentParams {
    pub fn segments(&self) -> MassSegments {
        MassSegments::new(*self)
    }
}

/// The feature finding pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureFinder {
    pub params: ClusteringParams,
    pub filter: PeakFilter,
    /// When set, process the mass range in segments
    pub segments: Option<SegmentParams>,
}

impl FeatureFinder {
    pub fn new(params: ClusteringParams, filter: PeakFilter) -> Self {
        Self {
            params,
            filter,
            segments: None,
        }
    }

    pub fn with_segments(mut self, segments: SegmentParams) -> Self {
        self.segments = Some(segments);
        self
    }

    pub fn validate(&self) -> Result<(), FeatureFinderError> {
        self.params.validate()?;
        if let Some(segments) = self.segments.as_ref() {
            segments.validate()?;
        }
        Ok(())
    }

    /// Cluster, summarize and filter the peaks of `store`, returning the surviving
    /// features, the peak partition matching them and the counts of what was done
    pub fn process_store(
        &self,
        store: &PeakStore,
        observer: &mut dyn ProgressObserver,
    ) -> (Vec<UMC>, ClusterMap, ProgressRecord) {
        let metric = WeightedPeakDistance::for_store(self.params, store);
        let clusterer = SingleLinkageClusterer::new(metric);
        let mut clusters = clusterer.cluster(store, observer);
        let n_clusters = clusters.len();
        let features = summarize_clusters(store, &clusters, observer);
        let features = remove_short_features(
            features,
            &mut clusters,
            self.params.min_feature_length,
            observer,
        );
        let record = ProgressRecord {
            peaks_clustered: store.len(),
            clusters: n_clusters,
            features: features.len(),
            features_removed: n_clusters - features.len(),
            ..Default::default()
        };
        (features, clusters, record)
    }

    /// Run the whole pipeline, reading from `source` and writing each completed pass to `sink`
    pub fn run<S, K>(
        &self,
        source: &mut S,
        sink: &mut K,
        observer: &mut dyn ProgressObserver,
    ) -> Result<ProgressRecord, S::Error>
    where
        S: PeakSource,
        K: FeatureSink<Error = S::Error>,
    {
        self.validate()?;
        let record = match self.segments {
            Some(segments) => self.run_segmented(segments, source, sink, observer)?,
            None => self.run_single(source, sink, observer)?,
        };
        observer.progress(Stage::Complete, 100);
        observer.stage_finished(Stage::Complete);
        Ok(record)
    }

    fn run_single<S, K>(
        &self,
        source: &mut S,
        sink: &mut K,
        observer: &mut dyn ProgressObserver,
    ) -> Result<ProgressRecord, S::Error>
    where
        S: PeakSource,
        K: FeatureSink<Error = S::Error>,
    {
        let store = source.load(&self.filter, observer)?;
        info!("Loaded {} peaks", store.len());
        let (features, clusters, mut record) = self.process_store(&store, observer);
        record.segments = 1;
        info!("Found {} features", features.len());
        sink.emit(SegmentOutput::new(None, 0, features, &clusters, &store))?;
        Ok(record)
    }

    fn run_segmented<S, K>(
        &self,
        segments: SegmentParams,
        source: &mut S,
        sink: &mut K,
        observer: &mut dyn ProgressObserver,
    ) -> Result<ProgressRecord, S::Error>
    where
        S: PeakSource,
        K: FeatureSink<Error = S::Error>,
    {
        let mass_start = segments.mass_start.max(self.filter.mono_mass_start);
        let mass_end = segments.mass_end.min(self.filter.mono_mass_end);
        let segments = SegmentParams {
            mass_start,
            mass_end,
            ..segments
        };
        let segment_iter = segments.segments();
        let n_segments = segment_iter.len();
        info!(
            "Processing {mass_start:0.2}-{mass_end:0.2} Da in {n_segments} segments of {:0.2} Da",
            segments.chunk_size
        );

        observer.stage_started(Stage::Chunking);
        let mut record = ProgressRecord::default();
        // source line -> mass of peaks already emitted that lie past the current segment
        let mut claimed: HashMap<usize, f64> = HashMap::new();
        let mut offset = 0;

        for segment in segment_iter {
            let filter = self.filter.with_mass_range(segment.start, segment.load_end);
            let mut store = source.load(&filter, observer)?;
            if !claimed.is_empty() {
                store.retain(|p| !claimed.contains_key(&p.source_line));
            }
            debug!(
                "Segment {} ({:0.2}-{:0.2}) loaded {} peaks",
                segment.index,
                segment.start,
                segment.load_end,
                store.len()
            );
            record.segments += 1;

            if store.is_empty() {
                info!("Segment {} is empty", segment.index);
                observer.progress(
                    Stage::Chunking,
                    chunk_percent(segment.index + 1, n_segments),
                );
                continue;
            }

            let (features, mut clusters, counts) = self.process_store(&store, observer);
            let n_features = features.len();
            let kept_ids = clusters.retain(|cluster_id, _| {
                segment.owns(features[cluster_id].min_mono_mass)
            });
            let features: Vec<UMC> = kept_ids
                .into_iter()
                .enumerate()
                .map(|(new_id, old_id)| {
                    let mut f = features[old_id].clone();
                    f.id = new_id;
                    f
                })
                .collect();
            if n_features != features.len() {
                debug!(
                    "Deferred {} features to the next segment",
                    n_features - features.len()
                );
            }

            claimed.retain(|_, mass| *mass >= segment.end);
            if !segment.is_last {
                for (_, members) in clusters.iter() {
                    for peak in members.iter().map(|i| &store[*i]) {
                        if peak.mono_mass >= segment.end {
                            claimed.insert(peak.source_line, peak.mono_mass);
                        }
                    }
                }
            }

            record += ProgressRecord {
                features: features.len(),
                ..counts
            };
            info!(
                "Segment {} produced {} features",
                segment.index,
                features.len()
            );
            let output =
                SegmentOutput::new(Some(segment.index), offset, features, &clusters, &store);
            offset += output.len();
            sink.emit(output)?;
            observer.progress(
                Stage::Chunking,
                chunk_percent(segment.index + 1, n_segments),
            );
        }
        observer.stage_finished(Stage::Chunking);
        Ok(record)
    }
}

fn chunk_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        99
    } else {
        ((done * 100) / total).min(99) as u8
    }
}

#[cfg(test)]
mod test {
    use mzpeaks::Tolerance;

    use super::*;
    use crate::params::DistanceWeights;

    fn peak(mass: f64, scan: i32, line: usize) -> IsotopePeak {
        IsotopePeak::new(scan, 1, 1000.0, mass + 1.007, 0.01, mass, mass, mass).with_source_line(line)
    }

    fn finder(min_feature_length: usize) -> FeatureFinder {
        let params = ClusteringParams::new(
            Tolerance::Da(0.05),
            Tolerance::Da(1000.0),
            DistanceWeights::mono_mass_only(0.01),
            0.1,
        )
        .with_min_feature_length(min_feature_length);
        FeatureFinder::new(params, PeakFilter::permissive())
    }

    #[test]
    fn test_segments() {
        let segments: Vec<_> = SegmentParams::new(0.0, 250.0, 100.0, 2.0).segments().collect();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[0].end, 100.0);
        assert_eq!(segments[0].load_end, 102.0);
        assert!(!segments[0].is_last);
        assert_eq!(segments[2].start, 200.0);
        assert_eq!(segments[2].end, 250.0);
        assert_eq!(segments[2].load_end, 250.0);
        assert!(segments[2].is_last);

        assert_eq!(SegmentParams::new(0.0, 250.0, 100.0, 2.0).segments().len(), 3);
        assert_eq!(SegmentParams::new(0.0, 200.0, 100.0, 2.0).segments().len(), 2);
        assert_eq!(SegmentParams::new(50.0, 50.0, 100.0, 2.0).segments().count(), 0);
    }

    #[test]
    fn test_run_single() {
        let mut peaks = vec![
            peak(500.0, 1, 0),
            peak(500.01, 2, 1),
            peak(700.0, 1, 2),
            peak(700.02, 3, 3),
            peak(900.0, 1, 4),
        ];
        let mut outputs: Vec<SegmentOutput> = Vec::new();
        let record = finder(2).run(&mut peaks, &mut outputs, &mut ()).unwrap();
        assert_eq!(record.features, 2);
        assert_eq!(record.clusters, 3);
        assert_eq!(outputs.len(), 1);
        let out = &outputs[0];
        assert_eq!(out.segment, None);
        assert_eq!(out.mapping, vec![(0, 0), (0, 1), (1, 2), (1, 3)]);
    }

    #[test]
    fn test_run_segmented_boundary() {
        // A feature straddling 100 Da is completed by the first segment and its
        // upper peak is not reused by the second
        let mut peaks = vec![
            peak(50.0, 1, 0),
            peak(50.01, 2, 1),
            peak(99.98, 1, 2),
            peak(100.01, 2, 3),
            peak(150.0, 1, 4),
            peak(150.02, 2, 5),
            peak(100.5, 1, 6),
            peak(100.52, 2, 7),
        ];
        let mut outputs: Vec<SegmentOutput> = Vec::new();
        let segments = SegmentParams::new(0.0, 200.0, 100.0, 2.0);
        let record = finder(2)
            .with_segments(segments)
            .run(&mut peaks, &mut outputs, &mut ())
            .unwrap();

        assert_eq!(record.segments, 2);
        assert_eq!(outputs.len(), 2);

        let first = &outputs[0];
        assert_eq!(first.segment, Some(0));
        assert_eq!(first.offset, 0);
        assert_eq!(first.len(), 2);
        assert_eq!(first.mapping, vec![(0, 0), (0, 1), (1, 2), (1, 3)]);

        let second = &outputs[1];
        assert_eq!(second.offset, 2);
        assert_eq!(second.len(), 2);
        assert_eq!(second.features[0].id, 2);
        assert_eq!(second.mapping, vec![(2, 6), (2, 7), (3, 4), (3, 5)]);

        let mut lines: Vec<usize> = outputs
            .iter()
            .flat_map(|o| o.mapping.iter().map(|(_, line)| *line))
            .collect();
        lines.sort();
        lines.dedup();
        assert_eq!(lines.len(), 8);
    }

    #[test]
    fn test_unnumbered_peaks_segmented() {
        let mut peaks: Vec<IsotopePeak> = [50.0, 50.01, 99.99, 100.01, 150.0, 150.02]
            .into_iter()
            .enumerate()
            .map(|(i, mass)| {
                IsotopePeak::new(i as i32 + 1, 1, 1000.0, mass + 1.007, 0.01, mass, mass, mass)
            })
            .collect();
        let mut outputs: Vec<SegmentOutput> = Vec::new();
        let record = finder(2)
            .with_segments(SegmentParams::new(0.0, 200.0, 100.0, 2.0))
            .run(&mut peaks, &mut outputs, &mut ())
            .unwrap();

        assert_eq!(record.features, 3);
        let mut lines: Vec<usize> = outputs
            .iter()
            .flat_map(|o| o.mapping.iter().map(|(_, line)| *line))
            .collect();
        lines.sort();
        assert_eq!(lines, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_empty_segment_continues() {
        let mut peaks = vec![peak(10.0, 1, 0), peak(10.01, 2, 1), peak(310.0, 1, 2), peak(310.01, 2, 3)];
        let mut outputs: Vec<SegmentOutput> = Vec::new();
        let record = finder(2)
            .with_segments(SegmentParams::new(0.0, 400.0, 100.0, 2.0))
            .run(&mut peaks, &mut outputs, &mut ())
            .unwrap();
        assert_eq!(record.segments, 4);
        assert_eq!(record.features, 2);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].segment, Some(3));
        assert_eq!(outputs[1].features[0].id, 1);
    }

    #[test]
    fn test_empty_input() {
        let mut peaks: Vec<IsotopePeak> = Vec::new();
        let mut outputs: Vec<SegmentOutput> = Vec::new();
        let record = finder(2).run(&mut peaks, &mut outputs, &mut ()).unwrap();
        assert_eq!(record.features, 0);
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].is_empty());
        assert!(outputs[0].mapping.is_empty());
    }

    #[test]
    fn test_invalid_params() {
        let mut peaks = vec![peak(10.0, 1, 0)];
        let mut outputs: Vec<SegmentOutput> = Vec::new();
        let mut f = finder(2);
        f.params.max_distance = -1.0;
        assert!(f.run(&mut peaks, &mut outputs, &mut ()).is_err());
        assert!(outputs.is_empty());
    }
}
