//! Reduce each cluster of peaks to a single [`UMC`] aggregate
use itertools::Itertools;
use rayon::prelude::*;
use tracing::debug;

use crate::cluster::ClusterMap;
use crate::peak::{IsotopePeak, ScanNumber};
use crate::progress::{ProgressObserver, Stage, StageProgress};
use crate::store::PeakStore;

/// A unique mass class, the summary statistics of one cluster of isotope peaks
/// believed to come from the same species.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UMC {
    pub id: usize,
    pub member_count: usize,

    pub min_mono_mass: f64,
    pub max_mono_mass: f64,
    pub mean_mono_mass: f64,
    pub median_mono_mass: f64,

    pub start_scan: ScanNumber,
    pub stop_scan: ScanNumber,
    /// The scan of the most abundant member
    pub max_abundance_scan: ScanNumber,

    pub max_abundance: f64,
    pub sum_abundance: f64,

    /// The m/z of the most abundant member
    pub representative_mz: f64,
    /// The charge of the most abundant member
    pub representative_charge: i32,
}

/// The median of `values`, averaging the middle pair for an even count.
///
/// # Panics
/// If `values` is empty
pub fn median(values: &mut [f64]) -> f64 {
    assert!(!values.is_empty(), "Cannot take the median of nothing");
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    let mid = n / 2;
    if n % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

impl UMC {
    /// Summarize `members`, which are visited in the order given. The first peak seen
    /// with the greatest abundance is the representative.
    ///
    /// # Panics
    /// If `members` is empty
    pub fn from_members<'a, I>(id: usize, members: I) -> Self
    where
        I: IntoIterator<Item = &'a IsotopePeak>,
    {
        let mut masses = Vec::new();
        let mut this = Self {
            id,
            ..Default::default()
        };

        let mut representative: Option<&IsotopePeak> = None;
        for peak in members {
            masses.push(peak.mono_mass);
            this.sum_abundance += peak.abundance;
            match representative {
                Some(rep) if rep.abundance >= peak.abundance => {}
                _ => representative = Some(peak),
            }
            if masses.len() == 1 {
                this.start_scan = peak.scan;
                this.stop_scan = peak.scan;
            } else {
                this.start_scan = this.start_scan.min(peak.scan);
                this.stop_scan = this.stop_scan.max(peak.scan);
            }
        }

        let Some(representative) = representative else {
            panic!("Cannot summarize a cluster with no members")
        };

        this.member_count = masses.len();
        (this.min_mono_mass, this.max_mono_mass) = masses
            .iter()
            .copied()
            .minmax_by(|a, b| a.total_cmp(b))
            .into_option()
            .unwrap_or_default();
        this.mean_mono_mass = masses.iter().sum::<f64>() / masses.len() as f64;
        this.median_mono_mass = median(&mut masses);

        this.max_abundance = representative.abundance;
        this.max_abundance_scan = representative.scan;
        this.representative_mz = representative.mz;
        this.representative_charge = representative.charge;
        this
    }

    /// The number of scans between the first and last member
    pub fn scan_span(&self) -> ScanNumber {
        self.stop_scan - self.start_scan
    }
}

/// Summarize every cluster in `clusters`, in parallel across clusters. The output
/// is ordered by cluster id and each [`UMC::id`] is its cluster id.
#[tracing::instrument(level = "debug", skip_all, fields(n_clusters = clusters.len()))]
pub fn summarize_clusters<O: ProgressObserver + ?Sized>(
    store: &PeakStore,
    clusters: &ClusterMap,
    observer: &mut O,
) -> Vec<UMC> {
    let progress = StageProgress::new(observer, Stage::Summarizing, clusters.len());
    let features: Vec<UMC> = clusters
        .clusters()
        .par_iter()
        .enumerate()
        .map(|(cluster_id, members)| {
            UMC::from_members(cluster_id, members.iter().map(|i| &store[*i]))
        })
        .collect();
    progress.finish();
    debug!("Summarized {} features", features.len());
    features
}

#[cfg(test)]
mod test {
    use super::*;

    fn peak(mass: f64, scan: ScanNumber, abundance: f64, charge: i32) -> IsotopePeak {
        IsotopePeak::new(scan, charge, abundance, mass / charge as f64, 0.01, mass, mass, mass)
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut [10.0, 20.0, 30.0]), 20.0);
        assert_eq!(median(&mut [40.0, 10.0, 30.0, 20.0]), 25.0);
        assert_eq!(median(&mut [5.0]), 5.0);
    }

    #[test]
    #[should_panic]
    fn test_median_empty() {
        median(&mut []);
    }

    #[test]
    fn test_from_members() {
        let peaks = [
            peak(1000.02, 12, 500.0, 2),
            peak(1000.00, 10, 800.0, 3),
            peak(1000.01, 15, 800.0, 2),
        ];
        let umc = UMC::from_members(4, peaks.iter());
        assert_eq!(umc.id, 4);
        assert_eq!(umc.member_count, 3);
        assert_eq!(umc.min_mono_mass, 1000.00);
        assert_eq!(umc.max_mono_mass, 1000.02);
        assert_eq!(umc.median_mono_mass, 1000.01);
        assert!((umc.mean_mono_mass - 1000.01).abs() < 1e-9);
        assert_eq!(umc.start_scan, 10);
        assert_eq!(umc.stop_scan, 15);
        assert_eq!(umc.scan_span(), 5);
        assert_eq!(umc.sum_abundance, 2100.0);

        // Ties keep the first seen maximum
        assert_eq!(umc.max_abundance, 800.0);
        assert_eq!(umc.max_abundance_scan, 10);
        assert_eq!(umc.representative_charge, 3);
        assert!((umc.representative_mz - 1000.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_preserves_order() {
        let store = PeakStore::from_peaks((0..50).map(|i| peak(100.0 + i as f64, i, 10.0, 1))).unwrap();
        let clusters = ClusterMap::from_clusters(50, (0..50).rev().map(|i| vec![i]).collect());
        let features = summarize_clusters(&store, &clusters, &mut ());
        assert_eq!(features.len(), 50);
        for (i, f) in features.iter().enumerate() {
            assert_eq!(f.id, i);
            assert_eq!(f.min_mono_mass, 100.0 + (49 - i) as f64);
        }
    }
}
