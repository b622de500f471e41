//! Adaptive quality control for the outbound screen-share track
//!
//! A controller task samples local resource pressure on a fixed interval,
//! keeps a sliding window of samples, and steps the share profile up or
//! down one level at a time. Sustained pressure above the upper threshold
//! steps down; sustained idle below the lower threshold steps up. A pinned
//! level disables automatic stepping until it is released.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::QualityOptions;

// ============================================================================
// Levels and profiles
// ============================================================================

/// Discrete quality levels for screen sharing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityLevel {
    /// 480p at 15 fps
    Low,
    /// 720p at 30 fps
    Medium,
    /// 1080p at 30 fps
    High,
}

impl QualityLevel {
    /// The next level down, or `None` at the floor
    pub fn step_down(&self) -> Option<QualityLevel> {
        match self {
            QualityLevel::High => Some(QualityLevel::Medium),
            QualityLevel::Medium => Some(QualityLevel::Low),
            QualityLevel::Low => None,
        }
    }

    /// The next level up, or `None` at the ceiling
    pub fn step_up(&self) -> Option<QualityLevel> {
        match self {
            QualityLevel::Low => Some(QualityLevel::Medium),
            QualityLevel::Medium => Some(QualityLevel::High),
            QualityLevel::High => None,
        }
    }

    /// Human-readable level name
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::Low => "low",
            QualityLevel::Medium => "medium",
            QualityLevel::High => "high",
        }
    }
}

/// Concrete encoding parameters for one quality level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityProfile {
    /// Level this profile belongs to
    pub level: QualityLevel,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Target framerate in fps
    pub framerate_fps: u32,
    /// Target bitrate in kbps
    pub bitrate_kbps: u32,
}

impl QualityProfile {
    /// Look up the profile for a level
    pub fn for_level(level: QualityLevel) -> Self {
        match level {
            QualityLevel::Low => Self {
                level,
                width: 854,
                height: 480,
                framerate_fps: 15,
                bitrate_kbps: 800,
            },
            QualityLevel::Medium => Self {
                level,
                width: 1280,
                height: 720,
                framerate_fps: 30,
                bitrate_kbps: 2000,
            },
            QualityLevel::High => Self {
                level,
                width: 1920,
                height: 1080,
                framerate_fps: 30,
                bitrate_kbps: 4000,
            },
        }
    }
}

// ============================================================================
// Windowed stepper
// ============================================================================

/// Sliding-window level stepper.
///
/// Pure state machine with no timing of its own; the controller task feeds
/// it one pressure sample per interval. Steps at most one level per full
/// window, and clears the window after each step so the next decision is
/// based on fresh samples only.
#[derive(Debug)]
pub struct QualityStepper {
    level: QualityLevel,
    pinned: bool,
    window: VecDeque<f64>,
    window_size: usize,
    step_down_above: f64,
    step_up_below: f64,
}

impl QualityStepper {
    /// Create a stepper from controller options
    pub fn new(options: &QualityOptions) -> Self {
        Self {
            level: options.initial_level,
            pinned: false,
            window: VecDeque::with_capacity(options.window_size),
            window_size: options.window_size,
            step_down_above: options.step_down_above,
            step_up_below: options.step_up_below,
        }
    }

    /// Current effective level
    pub fn level(&self) -> QualityLevel {
        self.level
    }

    /// Whether automatic stepping is currently disabled
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Feed one pressure sample in `0.0..=1.0`.
    ///
    /// Returns the new level when a step occurs, `None` otherwise.
    pub fn observe(&mut self, pressure: f64) -> Option<QualityLevel> {
        // Samples taken while pinned must not count toward the first
        // decision after unpin, so they are never buffered at all.
        if self.pinned {
            return None;
        }
        self.window.push_back(pressure.clamp(0.0, 1.0));
        if self.window.len() > self.window_size {
            self.window.pop_front();
        }
        if self.window.len() < self.window_size {
            return None;
        }

        let mean = self.window.iter().sum::<f64>() / self.window.len() as f64;
        let next = if mean > self.step_down_above {
            self.level.step_down()
        } else if mean < self.step_up_below {
            self.level.step_up()
        } else {
            None
        };

        if let Some(next) = next {
            self.level = next;
            self.window.clear();
            Some(next)
        } else {
            None
        }
    }

    /// Pin the stepper to a level, disabling automatic stepping.
    ///
    /// Returns the level when it differs from the current one.
    pub fn pin(&mut self, level: QualityLevel) -> Option<QualityLevel> {
        self.pinned = true;
        self.window.clear();
        if self.level != level {
            self.level = level;
            Some(level)
        } else {
            None
        }
    }

    /// Release a pin; automatic stepping resumes from the pinned level
    pub fn unpin(&mut self) {
        self.pinned = false;
    }
}

// ============================================================================
// Pressure probes
// ============================================================================

/// Source of local resource pressure samples in `0.0..=1.0`
#[async_trait]
pub trait PressureProbe: Send + Sync {
    /// Sample current pressure. `0.0` is unloaded, `1.0` is saturated.
    async fn sample(&self) -> f64;
}

const WORKLOAD_ITERATIONS: u64 = 2_000_000;

// A 3x slowdown over the unloaded baseline maps to full pressure.
const SLOWDOWN_SPAN: f64 = 2.0;

/// CPU pressure probe that times a fixed arithmetic workload.
///
/// The workload runs on the blocking pool and its elapsed time is compared
/// against an unloaded baseline measured lazily on first use. A loaded host
/// schedules the workload slower, which reads as higher pressure.
pub struct SyntheticLoadProbe {
    baseline: OnceCell<Duration>,
}

impl SyntheticLoadProbe {
    /// Create a probe; the baseline is measured on first sample
    pub fn new() -> Self {
        Self {
            baseline: OnceCell::new(),
        }
    }

    async fn baseline(&self) -> Duration {
        *self
            .baseline
            .get_or_init(|| async {
                // Best of three, the least contended run
                let mut best = timed_run().await;
                for _ in 0..2 {
                    best = best.min(timed_run().await);
                }
                best.max(Duration::from_micros(1))
            })
            .await
    }
}

impl Default for SyntheticLoadProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PressureProbe for SyntheticLoadProbe {
    async fn sample(&self) -> f64 {
        let baseline = self.baseline().await;
        let elapsed = timed_run().await;
        let slowdown = elapsed.as_secs_f64() / baseline.as_secs_f64();
        ((slowdown - 1.0) / SLOWDOWN_SPAN).clamp(0.0, 1.0)
    }
}

async fn timed_run() -> Duration {
    tokio::task::spawn_blocking(timed_workload)
        .await
        .unwrap_or_else(|_| timed_workload())
}

fn timed_workload() -> Duration {
    let start = Instant::now();
    let mut x: u64 = 0x9e37_79b9_7f4a_7c15;
    for _ in 0..WORKLOAD_ITERATIONS {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
    }
    std::hint::black_box(x);
    start.elapsed()
}

// ============================================================================
// Controller task
// ============================================================================

pub(crate) enum QualityCommand {
    Pin(QualityLevel),
    Unpin,
}

/// Handle to a running quality controller.
///
/// Dropping the handle (or calling [`stop`](Self::stop)) shuts the
/// controller down; the profile watch keeps its last published value.
pub(crate) struct QualityControllerHandle {
    cmd_tx: mpsc::Sender<QualityCommand>,
    task: JoinHandle<()>,
}

impl QualityControllerHandle {
    pub(crate) async fn pin(&self, level: QualityLevel) {
        let _ = self.cmd_tx.send(QualityCommand::Pin(level)).await;
    }

    pub(crate) async fn unpin(&self) {
        let _ = self.cmd_tx.send(QualityCommand::Unpin).await;
    }

    pub(crate) fn stop(self) {
        drop(self.cmd_tx);
        self.task.abort();
    }
}

/// Spawn the controller task for one screen-share segment.
///
/// Publishes the current profile on the returned watch channel, starting
/// with the initial (or pinned) level.
pub(crate) fn spawn_controller(
    probe: Arc<dyn PressureProbe>,
    options: QualityOptions,
    pinned: Option<QualityLevel>,
) -> (QualityControllerHandle, watch::Receiver<QualityProfile>) {
    let mut stepper = QualityStepper::new(&options);
    if let Some(level) = pinned {
        stepper.pin(level);
    }

    let (profile_tx, profile_rx) = watch::channel(QualityProfile::for_level(stepper.level()));
    let (cmd_tx, mut cmd_rx) = mpsc::channel(8);

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(options.sample_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let pressure = probe.sample().await;
                    if let Some(level) = stepper.observe(pressure) {
                        debug!(level = level.as_str(), pressure, "quality step");
                        let _ = profile_tx.send(QualityProfile::for_level(level));
                    }
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(QualityCommand::Pin(level)) => {
                        if let Some(level) = stepper.pin(level) {
                            let _ = profile_tx.send(QualityProfile::for_level(level));
                        }
                    }
                    Some(QualityCommand::Unpin) => stepper.unpin(),
                    None => break,
                }
            }
        }
        debug!("quality controller stopped");
    });

    (QualityControllerHandle { cmd_tx, task }, profile_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_options(initial: QualityLevel) -> QualityOptions {
        QualityOptions {
            sample_interval_ms: 1000,
            window_size: 3,
            step_down_above: 0.60,
            step_up_below: 0.25,
            initial_level: initial,
        }
    }

    #[test]
    fn test_profile_table() {
        let low = QualityProfile::for_level(QualityLevel::Low);
        assert_eq!((low.width, low.height, low.framerate_fps), (854, 480, 15));
        let high = QualityProfile::for_level(QualityLevel::High);
        assert_eq!((high.width, high.height), (1920, 1080));
        assert!(low.bitrate_kbps < high.bitrate_kbps);
    }

    #[test]
    fn test_step_down_on_sustained_pressure() {
        let mut stepper = QualityStepper::new(&test_options(QualityLevel::Medium));
        assert_eq!(stepper.observe(0.9), None);
        assert_eq!(stepper.observe(0.9), None);
        assert_eq!(stepper.observe(0.9), Some(QualityLevel::Low));
    }

    #[test]
    fn test_step_up_on_sustained_idle() {
        let mut stepper = QualityStepper::new(&test_options(QualityLevel::Medium));
        assert_eq!(stepper.observe(0.0), None);
        assert_eq!(stepper.observe(0.0), None);
        assert_eq!(stepper.observe(0.1), Some(QualityLevel::High));
    }

    #[test]
    fn test_single_step_per_window() {
        let mut stepper = QualityStepper::new(&test_options(QualityLevel::High));
        stepper.observe(0.9);
        stepper.observe(0.9);
        assert_eq!(stepper.observe(0.9), Some(QualityLevel::Medium));
        // Window cleared after the step, needs three fresh samples again
        assert_eq!(stepper.observe(0.9), None);
        assert_eq!(stepper.observe(0.9), None);
        assert_eq!(stepper.observe(0.9), Some(QualityLevel::Low));
    }

    #[test]
    fn test_floor_and_ceiling_hold() {
        let mut stepper = QualityStepper::new(&test_options(QualityLevel::Low));
        for _ in 0..6 {
            assert_eq!(stepper.observe(0.95), None);
        }
        let mut stepper = QualityStepper::new(&test_options(QualityLevel::High));
        for _ in 0..6 {
            assert_eq!(stepper.observe(0.0), None);
        }
    }

    #[test]
    fn test_mid_band_pressure_holds_level() {
        let mut stepper = QualityStepper::new(&test_options(QualityLevel::Medium));
        for _ in 0..10 {
            assert_eq!(stepper.observe(0.4), None);
        }
        assert_eq!(stepper.level(), QualityLevel::Medium);
    }

    #[test]
    fn test_pin_disables_stepping() {
        let mut stepper = QualityStepper::new(&test_options(QualityLevel::Medium));
        assert_eq!(stepper.pin(QualityLevel::Low), Some(QualityLevel::Low));
        for _ in 0..6 {
            assert_eq!(stepper.observe(0.0), None);
        }
        stepper.unpin();
        stepper.observe(0.0);
        stepper.observe(0.0);
        assert_eq!(stepper.observe(0.0), Some(QualityLevel::Medium));
    }

    #[test]
    fn test_pin_to_current_level_reports_no_change() {
        let mut stepper = QualityStepper::new(&test_options(QualityLevel::Medium));
        assert_eq!(stepper.pin(QualityLevel::Medium), None);
        assert!(stepper.is_pinned());
    }

    #[tokio::test]
    async fn test_synthetic_probe_sample_in_range() {
        let probe = SyntheticLoadProbe::new();
        let pressure = probe.sample().await;
        assert!((0.0..=1.0).contains(&pressure));
    }

    struct ConstProbe(f64);

    #[async_trait]
    impl PressureProbe for ConstProbe {
        async fn sample(&self) -> f64 {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_steps_down_under_load() {
        let (handle, mut profile_rx) =
            spawn_controller(Arc::new(ConstProbe(0.9)), test_options(QualityLevel::High), None);
        assert_eq!(profile_rx.borrow().level, QualityLevel::High);

        profile_rx.changed().await.unwrap();
        assert_eq!(profile_rx.borrow().level, QualityLevel::Medium);

        profile_rx.changed().await.unwrap();
        assert_eq!(profile_rx.borrow().level, QualityLevel::Low);

        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_pin_publishes_and_freezes() {
        let (handle, mut profile_rx) =
            spawn_controller(Arc::new(ConstProbe(0.9)), test_options(QualityLevel::High), None);

        handle.pin(QualityLevel::Low).await;
        profile_rx.changed().await.unwrap();
        assert_eq!(profile_rx.borrow().level, QualityLevel::Low);

        // Pinned: sustained pressure must not publish further changes
        let waited = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            profile_rx.changed(),
        )
        .await;
        assert!(waited.is_err(), "pinned controller must not step");

        handle.stop();
    }
}
