//! Loss-driven adaptation.
//!
//! Three independent knobs, each re-evaluated on its own timer from the loss
//! observed since its last evaluation:
//!
//! | loss fraction            | quality | fps               | resolution |
//! |--------------------------|---------|-------------------|------------|
//! | `< MEDIUM_LOST`          | 75      | max               | 640x480    |
//! | `< WORST_LOST`           | 50      | (max + min) / 2   | 320x240    |
//! | otherwise                | 25      | min               | 160x120    |

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use vidlink_core::Resolution;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossTier {
    Best,
    Medium,
    Worst,
}

impl LossTier {
    pub fn classify(fraction: f64, medium_lost: f64, worst_lost: f64) -> Self {
        if fraction < medium_lost {
            Self::Best
        } else if fraction < worst_lost {
            Self::Medium
        } else {
            Self::Worst
        }
    }

    pub fn quality(self) -> u8 {
        match self {
            Self::Best => 75,
            Self::Medium => 50,
            Self::Worst => 25,
        }
    }

    pub fn fps(self, max_fps: u32, min_fps: u32) -> u32 {
        match self {
            Self::Best => max_fps,
            Self::Medium => (max_fps + min_fps) / 2,
            Self::Worst => min_fps,
        }
    }

    pub fn resolution(self) -> Resolution {
        match self {
            Self::Best => Resolution::VGA,
            Self::Medium => Resolution::QVGA,
            Self::Worst => Resolution::QQVGA,
        }
    }

    fn index(self) -> u8 {
        self as u8
    }

    fn from_index(i: u8) -> Self {
        match i {
            0 => Self::Best,
            1 => Self::Medium,
            _ => Self::Worst,
        }
    }
}

/// `local * (1 - w) + reported * w`; just `local` without a report.
pub fn blend(local: f64, reported: Option<f64>, weight: f64) -> f64 {
    match reported {
        Some(r) => local * (1.0 - weight) + r * weight,
        None => local,
    }
}

// ── LossWindow ────────────────────────────────────────────────────────────────

/// Loss counter that is evaluated and cleared every `period` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossWindow {
    pub period: f64,
    pub lost: u64,
    last_fired: f64,
}

impl LossWindow {
    pub fn new(period: f64, now: f64) -> Self {
        Self { period, lost: 0, last_fired: now }
    }

    pub fn add(&mut self, lost: u64) {
        self.lost += lost;
    }

    pub fn restart(&mut self, now: f64) {
        self.lost = 0;
        self.last_fired = now;
    }

    /// If the period elapsed, return the accumulated count and start over.
    pub fn fire(&mut self, now: f64) -> Option<u64> {
        if now - self.last_fired < self.period {
            return None;
        }
        let lost = self.lost;
        self.restart(now);
        Some(lost)
    }

    /// Loss fraction for a window of `period` seconds at `fps` frames/s.
    pub fn fraction(&self, lost: u64, fps: u32) -> f64 {
        lost as f64 / (self.period * fps.max(1) as f64)
    }
}

// ── AdaptiveSettings ──────────────────────────────────────────────────────────

/// Encoder settings chosen by the receive side, read by the sender on every
/// frame. One frame of staleness is fine, so these are plain atomics.
#[derive(Debug)]
pub struct AdaptiveSettings {
    quality: AtomicU8,
    fps: AtomicU32,
    resolution: AtomicU8,
    total_lost: AtomicU64,
    max_fps: u32,
}

impl AdaptiveSettings {
    pub fn new(max_fps: u32) -> Self {
        Self {
            quality: AtomicU8::new(LossTier::Best.quality()),
            fps: AtomicU32::new(max_fps),
            resolution: AtomicU8::new(LossTier::Best.index()),
            total_lost: AtomicU64::new(0),
            max_fps,
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }

    pub fn resolution(&self) -> Resolution {
        LossTier::from_index(self.resolution.load(Ordering::Relaxed)).resolution()
    }

    /// Packets lost on the incoming stream since start-up.
    pub fn total_lost(&self) -> u64 {
        self.total_lost.load(Ordering::Relaxed)
    }

    pub(crate) fn set_quality(&self, tier: LossTier) {
        self.quality.store(tier.quality(), Ordering::Relaxed);
    }

    pub(crate) fn set_fps(&self, fps: u32) {
        self.fps.store(fps, Ordering::Relaxed);
    }

    pub(crate) fn set_resolution(&self, tier: LossTier) {
        self.resolution.store(tier.index(), Ordering::Relaxed);
    }

    pub(crate) fn add_lost(&self, lost: u64) {
        self.total_lost.fetch_add(lost, Ordering::Relaxed);
    }

    /// Back to best quality for a new call. The loss total is kept.
    pub(crate) fn reset(&self) {
        self.set_quality(LossTier::Best);
        self.set_fps(self.max_fps);
        self.set_resolution(LossTier::Best);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDIUM: f64 = 1.0 / 15.0;
    const WORST: f64 = 4.0 / 15.0;

    #[test]
    fn tiers_follow_thresholds() {
        assert_eq!(LossTier::classify(0.0, MEDIUM, WORST), LossTier::Best);
        assert_eq!(LossTier::classify(0.1, MEDIUM, WORST), LossTier::Medium);
        assert_eq!(LossTier::classify(MEDIUM, MEDIUM, WORST), LossTier::Medium);
        assert_eq!(LossTier::classify(WORST, MEDIUM, WORST), LossTier::Worst);
        assert_eq!(LossTier::classify(0.9, MEDIUM, WORST), LossTier::Worst);
    }

    #[test]
    fn tier_outputs() {
        assert_eq!(LossTier::Medium.quality(), 50);
        assert_eq!(LossTier::Medium.fps(30, 10), 20);
        assert_eq!(LossTier::Worst.fps(30, 10), 10);
        assert_eq!(LossTier::Worst.resolution().to_string(), "160x120");
    }

    #[test]
    fn blend_only_with_report() {
        assert_eq!(blend(0.2, None, 0.7), 0.2);
        assert!((blend(0.0, Some(0.5), 0.7) - 0.35).abs() < 1e-12);
    }

    #[test]
    fn window_fires_once_per_period() {
        let mut w = LossWindow::new(1.0, 100.0);
        w.add(3);
        assert_eq!(w.fire(100.5), None);
        assert_eq!(w.fire(101.0), Some(3));
        assert_eq!(w.lost, 0);
        assert_eq!(w.fire(101.5), None);
        assert!((w.fraction(9, 30) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn settings_reset_keeps_loss_total() {
        let s = AdaptiveSettings::new(30);
        s.set_quality(LossTier::Worst);
        s.set_fps(10);
        s.set_resolution(LossTier::Medium);
        s.add_lost(4);
        assert_eq!(s.resolution(), Resolution::QVGA);
        s.reset();
        assert_eq!((s.quality(), s.fps(), s.resolution()), (75, 30, Resolution::VGA));
        assert_eq!(s.total_lost(), 4);
    }
}
