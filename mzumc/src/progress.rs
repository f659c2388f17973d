//! Reporting how far a feature finding run has advanced.
//!
//! Progress is advisory. Each stage reports a percentage that never decreases and
//! stays below 100 until the stage has actually finished.
use std::fmt::Display;
use std::ops::{Add, AddAssign};

use tracing::info;

/// The stages of a feature finding run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    #[default]
    Idle,
    Loading,
    Chunking,
    Clustering,
    Summarizing,
    Filtering,
    Complete,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::Loading => "loading",
            Stage::Chunking => "chunking",
            Stage::Clustering => "clustering",
            Stage::Summarizing => "summarizing",
            Stage::Filtering => "filtering",
            Stage::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Receives stage transitions and percent complete updates.
///
/// `()` is the observer that ignores everything.
pub trait ProgressObserver {
    #[allow(unused)]
    fn stage_started(&mut self, stage: Stage) {}

    fn progress(&mut self, stage: Stage, percent: u8);

    #[allow(unused)]
    fn stage_finished(&mut self, stage: Stage) {}
}

impl ProgressObserver for () {
    #[inline]
    fn progress(&mut self, _stage: Stage, _percent: u8) {}
}

impl<T: ProgressObserver + ?Sized> ProgressObserver for &mut T {
    fn stage_started(&mut self, stage: Stage) {
        (**self).stage_started(stage)
    }

    fn progress(&mut self, stage: Stage, percent: u8) {
        (**self).progress(stage, percent)
    }

    fn stage_finished(&mut self, stage: Stage) {
        (**self).stage_finished(stage)
    }
}

/// Track the percent complete of a single stage, forwarding only increases to an observer
pub struct StageProgress<'a, O: ProgressObserver + ?Sized> {
    observer: &'a mut O,
    stage: Stage,
    total: usize,
    last_percent: u8,
}

impl<'a, O: ProgressObserver + ?Sized> StageProgress<'a, O> {
    pub fn new(observer: &'a mut O, stage: Stage, total: usize) -> Self {
        observer.stage_started(stage);
        observer.progress(stage, 0);
        Self {
            observer,
            stage,
            total,
            last_percent: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn percent(&self) -> u8 {
        self.last_percent
    }

    /// Record that `done` of `total` units of work have been completed. Capped at 99%.
    pub fn update(&mut self, done: usize) {
        if self.total == 0 {
            return;
        }
        let percent = ((done.min(self.total) as u128 * 100) / self.total as u128).min(99) as u8;
        if percent > self.last_percent {
            self.last_percent = percent;
            self.observer.progress(self.stage, percent);
        }
    }

    pub fn finish(mut self) {
        self.last_percent = 100;
        self.observer.progress(self.stage, 100);
        self.observer.stage_finished(self.stage);
    }
}

/// Emit an `info` line each time a stage crosses another multiple of `step` percent
#[derive(Debug, Clone)]
pub struct LogProgress {
    step: u8,
    last_logged: Option<(Stage, u8)>,
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl LogProgress {
    pub fn new(step: u8) -> Self {
        Self {
            step: step.max(1),
            last_logged: None,
        }
    }
}

impl ProgressObserver for LogProgress {
    fn progress(&mut self, stage: Stage, percent: u8) {
        let bucket = percent - percent % self.step;
        match self.last_logged {
            Some((last_stage, last_bucket)) if last_stage == stage && last_bucket >= bucket => {}
            _ => {
                self.last_logged = Some((stage, bucket));
                if percent > 0 {
                    info!("{stage}: {percent}%");
                }
            }
        }
    }

    fn stage_finished(&mut self, stage: Stage) {
        if stage == Stage::Complete {
            info!("Processing complete");
        }
    }
}

/// Counters accumulated over a run
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub peaks_read: usize,
    pub peaks_rejected: usize,
    pub peaks_clustered: usize,
    pub clusters: usize,
    pub features: usize,
    pub features_removed: usize,
    pub segments: usize,
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.peaks_read += rhs.peaks_read;
        self.peaks_rejected += rhs.peaks_rejected;
        self.peaks_clustered += rhs.peaks_clustered;
        self.clusters += rhs.clusters;
        self.features += rhs.features;
        self.features_removed += rhs.features_removed;
        self.segments += rhs.segments;
    }
}

impl ProgressRecord {
    pub fn log(&self) {
        info!(
            "Read {} peaks ({} rejected), clustered {} peaks into {} clusters",
            self.peaks_read, self.peaks_rejected, self.peaks_clustered, self.clusters
        );
        info!(
            "Emitted {} features ({} too short) over {} segment(s)",
            self.features, self.features_removed, self.segments
        );
    }
}
