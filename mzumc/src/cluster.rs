//! Single linkage clustering of a [`PeakStore`] over a mass-sorted sweep.
//!
//! Peaks are visited in order of increasing monoisotopic mass (then scan). Each
//! peak, the anchor, is compared against every later peak whose mass falls inside
//! the anchor's tolerance window. A match either pulls an unassigned peak into the
//! anchor's cluster, or moves the anchor's entire cluster into the matched peak's
//! cluster. Cluster labels live in an arena alongside the sorted order so the peaks
//! themselves are never mutated.
use std::mem;

use tracing::debug;

use crate::distance::PeakDistanceMetric;
use crate::progress::{ProgressObserver, Stage, StageProgress};
use crate::store::PeakStore;

const UNASSIGNED: usize = usize::MAX;

/// The partition of a [`PeakStore`] produced by clustering.
///
/// Cluster ids are dense and start at zero. Member lists hold original peak indices
/// in increasing order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClusterMap {
    assignments: Vec<Option<usize>>,
    clusters: Vec<Vec<usize>>,
}

impl ClusterMap {
    /// Build a map from a list of member lists, each member an original peak index
    /// into a store of `n_peaks` peaks
    pub fn from_clusters(n_peaks: usize, clusters: Vec<Vec<usize>>) -> Self {
        let mut assignments = vec![None; n_peaks];
        let mut clusters = clusters;
        for (cluster_id, members) in clusters.iter_mut().enumerate() {
            members.sort_unstable();
            for i in members.iter().copied() {
                assignments[i] = Some(cluster_id);
            }
        }
        Self {
            assignments,
            clusters,
        }
    }

    /// The number of clusters
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// The number of peaks in the store this map partitions
    pub fn num_peaks(&self) -> usize {
        self.assignments.len()
    }

    pub fn members(&self, cluster_id: usize) -> &[usize] {
        &self.clusters[cluster_id]
    }

    /// The cluster holding the peak with `original_index`, or `None` if it was filtered out
    pub fn cluster_of(&self, original_index: usize) -> Option<usize> {
        self.assignments.get(original_index).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> + '_ {
        self.clusters
            .iter()
            .enumerate()
            .map(|(i, members)| (i, members.as_slice()))
    }

    pub(crate) fn clusters(&self) -> &[Vec<usize>] {
        &self.clusters
    }

    /// Keep only the clusters for which `keep` returns `true`, renumbering the survivors
    /// densely in their existing order. Peaks of removed clusters lose their assignment.
    ///
    /// Returns the old cluster id of each surviving cluster.
    pub fn retain<F: FnMut(usize, &[usize]) -> bool>(&mut self, mut keep: F) -> Vec<usize> {
        let clusters = mem::take(&mut self.clusters);
        let mut kept_ids = Vec::with_capacity(clusters.len());
        for (old_id, members) in clusters.into_iter().enumerate() {
            if keep(old_id, &members) {
                let new_id = self.clusters.len();
                for i in members.iter().copied() {
                    self.assignments[i] = Some(new_id);
                }
                self.clusters.push(members);
                kept_ids.push(old_id);
            } else {
                for i in members.iter().copied() {
                    self.assignments[i] = None;
                }
            }
        }
        kept_ids
    }
}

/// The sorted working copy of a clustering run. Labels and member lists are indexed
/// by sorted position, not by original index.
struct SweepState {
    order: Vec<usize>,
    labels: Vec<usize>,
    members: Vec<Vec<usize>>,
    merges: usize,
}

impl SweepState {
    fn new(store: &PeakStore) -> Self {
        let peaks = store.as_slice();
        let mut order: Vec<usize> = (0..peaks.len()).collect();
        // Stable, so equal (mass, scan) pairs keep their input order
        order.sort_by(|a, b| peaks[*a].sweep_order(&peaks[*b]));
        Self {
            labels: vec![UNASSIGNED; order.len()],
            order,
            members: Vec::new(),
            merges: 0,
        }
    }

    fn open_cluster(&mut self, position: usize) -> usize {
        let cluster_id = self.members.len();
        self.members.push(vec![position]);
        self.labels[position] = cluster_id;
        cluster_id
    }

    fn assign(&mut self, position: usize, cluster_id: usize) {
        self.labels[position] = cluster_id;
        self.members[cluster_id].push(position);
    }

    /// Move every member of `source` into `target`, leaving `source` empty
    fn merge_into(&mut self, source: usize, target: usize) {
        let moved = mem::take(&mut self.members[source]);
        for position in moved.iter().copied() {
            self.labels[position] = target;
        }
        self.members[target].extend(moved);
        self.merges += 1;
    }

    /// Drop emptied clusters and renumber the rest in order of creation, translating
    /// sorted positions back to original indices
    fn finish(self) -> ClusterMap {
        let n = self.order.len();
        let order = self.order;
        let clusters: Vec<Vec<usize>> = self
            .members
            .into_iter()
            .filter(|members| !members.is_empty())
            .map(|members| members.into_iter().map(|pos| order[pos]).collect())
            .collect();
        ClusterMap::from_clusters(n, clusters)
    }
}

/// Partition a [`PeakStore`] with single linkage under a [`PeakDistanceMetric`]
#[derive(Debug, Clone)]
pub struct SingleLinkageClusterer<M: PeakDistanceMetric> {
    pub metric: M,
}

impl<M: PeakDistanceMetric> SingleLinkageClusterer<M> {
    pub fn new(metric: M) -> Self {
        Self { metric }
    }

    /// Cluster every peak in `store`. An empty store yields an empty [`ClusterMap`].
    #[tracing::instrument(level = "debug", skip_all, fields(n_peaks = store.len()))]
    pub fn cluster<O: ProgressObserver + ?Sized>(
        &self,
        store: &PeakStore,
        observer: &mut O,
    ) -> ClusterMap {
        let peaks = store.as_slice();
        let n = peaks.len();
        let mut progress = StageProgress::new(observer, Stage::Clustering, n);
        let mut state = SweepState::new(store);
        let mut comparisons = 0usize;

        for i in 0..n {
            if state.labels[i] == UNASSIGNED {
                state.open_cluster(i);
            }
            let anchor = &peaks[state.order[i]];
            let upper = self.metric.window_upper_bound(anchor);

            for j in (i + 1)..n {
                let candidate = &peaks[state.order[j]];
                if candidate.mono_mass >= upper {
                    break;
                }
                // Re-read, a merge may have moved the anchor
                let current = state.labels[i];
                let other = state.labels[j];
                if other == current {
                    continue;
                }
                comparisons += 1;
                if !self.metric.is_match(anchor, candidate) {
                    continue;
                }
                if other == UNASSIGNED {
                    state.assign(j, current);
                } else {
                    state.merge_into(current, other);
                }
            }
            progress.update(i + 1);
        }
        progress.finish();

        let merges = state.merges;
        let clusters = state.finish();
        debug!(
            "Clustered {n} peaks into {} clusters with {comparisons} comparisons and {merges} merges",
            clusters.len()
        );
        clusters
    }
}
