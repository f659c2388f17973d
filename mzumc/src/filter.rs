//! Remove features with too few members
use tracing::debug;

use crate::cluster::ClusterMap;
use crate::progress::{ProgressObserver, Stage, StageProgress};
use crate::summary::UMC;

/// Drop every feature with fewer than `min_feature_length` members and renumber the
/// survivors densely from zero, keeping their relative order.
///
/// `clusters` is updated to match, so the peaks of removed features no longer map to
/// any feature. The peaks themselves are untouched. Applying this twice with the same
/// `min_feature_length` changes nothing the second time.
#[tracing::instrument(level = "debug", skip_all, fields(min_feature_length = min_feature_length))]
pub fn remove_short_features<O: ProgressObserver + ?Sized>(
    features: Vec<UMC>,
    clusters: &mut ClusterMap,
    min_feature_length: usize,
    observer: &mut O,
) -> Vec<UMC> {
    assert_eq!(
        features.len(),
        clusters.len(),
        "Every cluster must have exactly one feature"
    );
    let mut progress = StageProgress::new(observer, Stage::Filtering, features.len());
    let n_before = features.len();

    clusters.retain(|_, members| members.len() >= min_feature_length);

    let mut kept = Vec::with_capacity(clusters.len());
    for (i, mut feature) in features.into_iter().enumerate() {
        if feature.member_count >= min_feature_length {
            feature.id = kept.len();
            kept.push(feature);
        }
        progress.update(i + 1);
    }
    progress.finish();

    debug!(
        "Removed {} of {n_before} features shorter than {min_feature_length}",
        n_before - kept.len()
    );
    kept
}
