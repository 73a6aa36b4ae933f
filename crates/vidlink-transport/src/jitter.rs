//! Jitter buffer with the QoS controller folded into its pop path.
//!
//! # Phases (per call)
//!
//! ```text
//! Idle ──begin_call──► Priming ──len > BUFFER_THRESHOLD──► Ready ──end_call──► Idle
//! ```
//!
//! `Ready` is sticky: a buffer that drains mid-call does not re-prime.
//!
//! # Pop
//!
//! 1. Drop head entries older than the fixed delay budget, or not newer than
//!    the last frame handed out, while more than one entry remains.
//! 2. Count the sequence gap to the last returned frame as lost.
//! 3. Fire whichever of the quality / fps / resolution / report timers are due.
//! 4. Hand out the head; the sole remaining entry is returned without removal.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use vidlink_core::{unix_now, MediaFeedback, QosConfig, VideoFrame};

use crate::packet::MediaHeader;
use crate::qos::{blend, AdaptiveSettings, LossTier, LossWindow};

// ── VideoPacket ───────────────────────────────────────────────────────────────

/// A decoded inbound frame. Ordered by sequence number only.
#[derive(Debug, Clone)]
pub struct VideoPacket {
    pub header: MediaHeader,
    pub frame: VideoFrame,
}

impl VideoPacket {
    pub fn new(header: MediaHeader, frame: VideoFrame) -> Self {
        Self { header, frame }
    }

    pub fn seq(&self) -> u64 {
        self.header.seq
    }
}

impl PartialEq for VideoPacket {
    fn eq(&self, other: &Self) -> bool {
        self.seq() == other.seq()
    }
}

impl Eq for VideoPacket {}

impl PartialOrd for VideoPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VideoPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq().cmp(&other.seq())
    }
}

// ── Public result types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Priming,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// No call in progress.
    NotInCall,
    /// `BUFFER_SIZE` entries already waiting; the newest datagram loses.
    BufferFull,
    /// Not newer than the last frame handed out.
    Stale,
}

/// What the render loop gets from [`JitterBuffer::pop`].
#[derive(Debug, Clone)]
pub struct PoppedFrame {
    pub header: MediaHeader,
    pub frame: VideoFrame,
    /// Packets found missing right before this one.
    pub lost: u64,
}

/// Per-window loss counts, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LossCounters {
    pub quality: u64,
    pub fps: u64,
    pub resolution: u64,
    pub report: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub queued: u64,
    pub dropped_full: u64,
    pub dropped_stale: u64,
    pub dropped_late: u64,
    pub popped: u64,
}

// ── Internal state ────────────────────────────────────────────────────────────

struct QosWindows {
    quality: LossWindow,
    fps: LossWindow,
    resolution: LossWindow,
    report: LossWindow,
}

impl QosWindows {
    fn new(cfg: &QosConfig, now: f64) -> Self {
        Self {
            quality: LossWindow::new(cfg.quality_refresh, now),
            fps: LossWindow::new(cfg.fps_refresh, now),
            resolution: LossWindow::new(cfg.resolution_refresh, now),
            report: LossWindow::new(cfg.report_refresh, now),
        }
    }

    fn add(&mut self, lost: u64) {
        self.quality.add(lost);
        self.fps.add(lost);
        self.resolution.add(lost);
        self.report.add(lost);
    }
}

struct BufferState {
    phase: Phase,
    heap: BinaryHeap<Reverse<VideoPacket>>,
    last_extracted: Option<u64>,
    fixed_delay: Option<f64>,
    incoming_fps: u32,
    windows: QosWindows,
    peer_supports_reports: bool,
    /// Peer-reported losses per second.
    peer_loss_rate: Option<f64>,
    last_report_ts: f64,
    stats: BufferStats,
}

impl BufferState {
    fn new(cfg: &QosConfig, now: f64) -> Self {
        Self {
            phase: Phase::Idle,
            heap: BinaryHeap::with_capacity(cfg.buffer_size),
            last_extracted: None,
            fixed_delay: None,
            incoming_fps: cfg.max_fps,
            windows: QosWindows::new(cfg, now),
            peer_supports_reports: false,
            peer_loss_rate: None,
            last_report_ts: now,
            stats: BufferStats::default(),
        }
    }

    /// Clear everything that belongs to one call. Peer capability survives,
    /// it is set by call control before the media starts.
    fn reset(&mut self, cfg: &QosConfig, phase: Phase, now: f64) {
        let peer_supports_reports = self.peer_supports_reports;
        *self = Self::new(cfg, now);
        self.phase = phase;
        self.peer_supports_reports = peer_supports_reports;
    }

    /// Peer losses per second divided by the incoming frame rate, so the
    /// blend mixes two fractions of frames rather than a rate and a fraction.
    fn reported_fraction(&self) -> Option<f64> {
        self.peer_loss_rate.map(|rate| rate / self.incoming_fps.max(1) as f64)
    }
}

// ── JitterBuffer ──────────────────────────────────────────────────────────────

pub struct JitterBuffer {
    config: QosConfig,
    settings: Arc<AdaptiveSettings>,
    loss_reports: Option<UnboundedSender<u64>>,
    state: Mutex<BufferState>,
}

impl JitterBuffer {
    /// `loss_reports` receives the count for every outgoing `LOSS_REPORT`.
    pub fn new(
        config: QosConfig,
        settings: Arc<AdaptiveSettings>,
        loss_reports: Option<UnboundedSender<u64>>,
    ) -> Self {
        let state = Mutex::new(BufferState::new(&config, unix_now()));
        Self { config, settings, loss_reports, state }
    }

    pub fn settings(&self) -> &Arc<AdaptiveSettings> {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Call lifecycle ───────────────────────────────────────────────────────

    pub fn begin_call(&self) {
        self.begin_call_at(unix_now());
    }

    pub fn begin_call_at(&self, now: f64) {
        self.lock().reset(&self.config, Phase::Priming, now);
        self.settings.reset();
        debug!("Jitter buffer priming (threshold {})", self.config.buffer_threshold);
    }

    pub fn end_call(&self) {
        let mut state = self.lock();
        let stats = state.stats;
        state.reset(&self.config, Phase::Idle, unix_now());
        info!(
            "Jitter buffer reset: queued={} popped={} full={} stale={} late={}",
            stats.queued, stats.popped, stats.dropped_full, stats.dropped_stale, stats.dropped_late
        );
    }

    // ── Ingest ───────────────────────────────────────────────────────────────

    pub fn push(&self, packet: VideoPacket) -> PushOutcome {
        self.push_at(packet, unix_now())
    }

    pub fn push_at(&self, packet: VideoPacket, now: f64) -> PushOutcome {
        let mut state = self.lock();
        if state.phase == Phase::Idle {
            return PushOutcome::NotInCall;
        }
        if state.heap.len() >= self.config.buffer_size {
            state.stats.dropped_full += 1;
            return PushOutcome::BufferFull;
        }
        if state.last_extracted.is_some_and(|last| packet.seq() <= last) {
            state.stats.dropped_stale += 1;
            return PushOutcome::Stale;
        }

        let header = packet.header;
        state.incoming_fps = header.fps.max(1);
        if state.fixed_delay.is_none() {
            let budget = (now - header.sent_at)
                + self.config.buffer_threshold as f64 / state.incoming_fps as f64
                + self.config.fixed_delay_threshold;
            debug!("Fixed delay budget {:.3}s (first frame seq={})", budget, header.seq);
            state.fixed_delay = Some(budget);
        }

        state.heap.push(Reverse(packet));
        state.stats.queued += 1;
        if state.phase == Phase::Priming && state.heap.len() > self.config.buffer_threshold {
            state.phase = Phase::Ready;
            debug!("Jitter buffer ready ({} frames)", state.heap.len());
        }
        PushOutcome::Queued
    }

    // ── Playout ──────────────────────────────────────────────────────────────

    /// Next frame to render; `None` while priming or idle.
    pub fn pop(&self) -> Option<PoppedFrame> {
        self.pop_at(unix_now())
    }

    pub fn pop_at(&self, now: f64) -> Option<PoppedFrame> {
        let mut state = self.lock();
        if state.phase != Phase::Ready {
            return None;
        }
        let budget = state.fixed_delay.unwrap_or(f64::INFINITY);

        while state.heap.len() > 1 {
            let Some(Reverse(head)) = state.heap.peek() else { break };
            let stale = state.last_extracted.is_some_and(|last| head.seq() <= last);
            let late = now - head.header.sent_at > budget;
            if !stale && !late {
                break;
            }
            state.heap.pop();
            if late {
                state.stats.dropped_late += 1;
            }
        }

        let (header, frame) = {
            let Reverse(head) = state.heap.peek()?;
            (head.header, head.frame.clone())
        };

        let lost = match state.last_extracted {
            Some(last) if header.seq > last => header.seq - last - 1,
            _ => 0,
        };
        if lost > 0 {
            state.windows.add(lost);
            self.settings.add_lost(lost);
        }

        self.adapt(&mut state, now);

        state.last_extracted = Some(state.last_extracted.map_or(header.seq, |last| last.max(header.seq)));
        if state.heap.len() > 1 {
            state.heap.pop();
        }
        state.stats.popped += 1;
        Some(PoppedFrame { header, frame, lost })
    }

    fn adapt(&self, state: &mut BufferState, now: f64) {
        let cfg = &self.config;
        let fps = state.incoming_fps;
        let reported = state.reported_fraction();
        let tier_for = |window: &LossWindow, lost: u64| {
            let fraction = blend(window.fraction(lost, fps), reported, cfg.report_weight);
            LossTier::classify(fraction, cfg.medium_lost, cfg.worst_lost)
        };

        if let Some(lost) = state.windows.quality.fire(now) {
            let tier = tier_for(&state.windows.quality, lost);
            if tier.quality() != self.settings.quality() {
                info!("Quality → {} ({} lost in {}s)", tier.quality(), lost, cfg.quality_refresh);
            }
            self.settings.set_quality(tier);
        }
        if let Some(lost) = state.windows.fps.fire(now) {
            let target = tier_for(&state.windows.fps, lost).fps(cfg.max_fps, cfg.min_fps);
            if target != self.settings.fps() {
                info!("Frame rate → {} ({} lost in {}s)", target, lost, cfg.fps_refresh);
            }
            self.settings.set_fps(target);
        }
        if let Some(lost) = state.windows.resolution.fire(now) {
            let tier = tier_for(&state.windows.resolution, lost);
            if tier.resolution() != self.settings.resolution() {
                info!("Resolution → {} ({} lost in {}s)", tier.resolution(), lost, cfg.resolution_refresh);
            }
            self.settings.set_resolution(tier);
        }
        if let Some(lost) = state.windows.report.fire(now) {
            if state.peer_supports_reports {
                if let Some(tx) = &self.loss_reports {
                    if tx.send(lost).is_err() {
                        warn!("Loss report channel closed");
                    }
                }
            }
        }
    }

    // ── Peer feedback ────────────────────────────────────────────────────────

    /// Store the peer's loss rate: `count / (now - previous report time)`.
    pub fn record_peer_loss_report_at(&self, count: u64, timestamp: f64, now: f64) {
        let mut state = self.lock();
        let elapsed = now - state.last_report_ts;
        if elapsed > 0.0 {
            state.peer_loss_rate = Some(count as f64 / elapsed);
        } else {
            debug!("Ignoring loss report with non-positive interval {:.3}s", elapsed);
        }
        state.last_report_ts = timestamp;
    }

    // ── Diagnostics ──────────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fixed_delay_budget(&self) -> Option<f64> {
        self.lock().fixed_delay
    }

    pub fn peer_loss_rate(&self) -> Option<f64> {
        self.lock().peer_loss_rate
    }

    pub fn loss_counters(&self) -> LossCounters {
        let state = self.lock();
        let w = &state.windows;
        LossCounters {
            quality: w.quality.lost,
            fps: w.fps.lost,
            resolution: w.resolution.lost,
            report: w.report.lost,
        }
    }

    pub fn stats(&self) -> BufferStats {
        self.lock().stats
    }
}

impl MediaFeedback for JitterBuffer {
    fn set_peer_supports_loss_reports(&self, supported: bool) {
        self.lock().peer_supports_reports = supported;
    }

    fn record_peer_loss_report(&self, count: u64, timestamp: f64) {
        self.record_peer_loss_report_at(count, timestamp, unix_now());
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use vidlink_core::Resolution;

    use super::*;

    const T0: f64 = 1000.0;

    fn config(threshold: usize) -> QosConfig {
        QosConfig { buffer_threshold: threshold, ..QosConfig::default() }
    }

    fn packet(seq: u64, sent_at: f64) -> VideoPacket {
        let header = MediaHeader { seq, sent_at, resolution: Resolution::QQVGA, fps: 30 };
        VideoPacket::new(header, VideoFrame::new(vec![seq as u8; 4], 2, 2))
    }

    fn buffer(threshold: usize) -> JitterBuffer {
        let jb = JitterBuffer::new(config(threshold), Arc::new(AdaptiveSettings::new(30)), None);
        jb.begin_call_at(T0);
        jb
    }

    #[test]
    fn idle_buffer_drops_datagrams() {
        let jb = JitterBuffer::new(config(1), Arc::new(AdaptiveSettings::new(30)), None);
        assert_eq!(jb.push_at(packet(1, T0), T0), PushOutcome::NotInCall);
        assert_eq!(jb.phase(), Phase::Idle);
    }

    #[test]
    fn primes_until_threshold_exceeded() {
        let jb = buffer(2);
        jb.push_at(packet(1, T0), T0);
        jb.push_at(packet(2, T0), T0);
        assert_eq!(jb.phase(), Phase::Priming);
        assert!(jb.pop_at(T0).is_none());
        jb.push_at(packet(3, T0), T0);
        assert_eq!(jb.phase(), Phase::Ready);
        assert_eq!(jb.pop_at(T0).unwrap().header.seq, 1);
    }

    #[test]
    fn reorders_by_sequence() {
        let jb = buffer(2);
        for seq in [3, 1, 2] {
            jb.push_at(packet(seq, T0), T0);
        }
        let seqs: Vec<u64> = (0..3).filter_map(|_| jb.pop_at(T0)).map(|f| f.header.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn gap_counts_into_every_window() {
        let jb = buffer(3);
        for seq in [1, 2, 5, 6] {
            assert_eq!(jb.push_at(packet(seq, T0), T0), PushOutcome::Queued);
        }
        let lost: u64 = (0..4).filter_map(|_| jb.pop_at(T0)).map(|f| f.lost).sum();
        assert_eq!(lost, 2);
        assert_eq!(jb.loss_counters(), LossCounters { quality: 2, fps: 2, resolution: 2, report: 2 });
        assert_eq!(jb.settings().total_lost(), 2);
    }

    #[test]
    fn sole_entry_is_repeated_not_removed() {
        let jb = buffer(1);
        jb.push_at(packet(1, T0), T0);
        jb.push_at(packet(2, T0), T0);
        assert_eq!(jb.pop_at(T0).unwrap().header.seq, 1);
        assert_eq!(jb.pop_at(T0).unwrap().header.seq, 2);
        assert_eq!(jb.pop_at(T0).unwrap().header.seq, 2);
        assert_eq!(jb.len(), 1);
        assert_eq!(jb.phase(), Phase::Ready);

        // stale push is refused, newer one replaces the repeated frame
        assert_eq!(jb.push_at(packet(2, T0), T0), PushOutcome::Stale);
        jb.push_at(packet(3, T0), T0);
        let next = jb.pop_at(T0).unwrap();
        assert_eq!((next.header.seq, next.lost), (3, 0));
    }

    #[test]
    fn late_frames_are_skipped_and_counted_lost() {
        let jb = buffer(1);
        // first frame fixes the budget: 0 + 1 frame / 30 fps + 0.25
        jb.push_at(packet(1, T0), T0);
        jb.push_at(packet(2, T0 + 0.5), T0 + 0.5);
        jb.push_at(packet(3, T0 + 0.9), T0 + 0.9);
        let budget = jb.fixed_delay_budget().unwrap();
        assert!((budget - (1.0 / 30.0 + 0.25)).abs() < 1e-9);

        let frame = jb.pop_at(T0 + 1.0).unwrap();
        assert_eq!(frame.header.seq, 3);
        assert_eq!(frame.lost, 0);
        assert_eq!(jb.stats().dropped_late, 2);
    }

    #[test]
    fn full_buffer_drops_newest() {
        let cfg = QosConfig { buffer_size: 4, buffer_threshold: 3, ..QosConfig::default() };
        let jb = JitterBuffer::new(cfg, Arc::new(AdaptiveSettings::new(30)), None);
        jb.begin_call_at(T0);
        for seq in 1..=4 {
            jb.push_at(packet(seq, T0), T0);
        }
        assert_eq!(jb.push_at(packet(5, T0), T0), PushOutcome::BufferFull);
        assert_eq!(jb.len(), 4);
    }

    #[test]
    fn end_call_resets_state() {
        let jb = buffer(1);
        jb.push_at(packet(10, T0), T0);
        jb.push_at(packet(11, T0), T0);
        jb.pop_at(T0);
        jb.end_call();
        assert_eq!(jb.phase(), Phase::Idle);
        assert!(jb.is_empty());
        assert!(jb.fixed_delay_budget().is_none());

        // a new call may restart the sequence space
        jb.begin_call_at(T0 + 5.0);
        assert_eq!(jb.push_at(packet(1, T0 + 5.0), T0 + 5.0), PushOutcome::Queued);
    }

    /// One frame per 1/30 s; `lost(seq)` decides which never arrive.
    fn stream(jb: &JitterBuffer, seqs: std::ops::RangeInclusive<u64>, lost: impl Fn(u64) -> bool) {
        for seq in seqs {
            let t = T0 + seq as f64 / 30.0;
            if !lost(seq) {
                jb.push_at(packet(seq, t), t);
            }
            jb.pop_at(t);
        }
    }

    #[test]
    fn heavy_loss_drops_quality_on_next_tick() {
        let jb = buffer(1);
        let settings = jb.settings().clone();

        stream(&jb, 1..=30, |_| false);
        assert_eq!(settings.quality(), 75);

        // 30% loss during the second window
        stream(&jb, 31..=59, |s| matches!(s % 10, 2 | 5 | 8));
        assert_eq!(settings.quality(), 75);
        stream(&jb, 60..=60, |_| false);
        assert_eq!(settings.quality(), 25);
        // fps and resolution windows have not elapsed yet
        assert_eq!(settings.fps(), 30);
        assert_eq!(settings.resolution(), Resolution::VGA);
    }

    #[test]
    fn peer_report_is_blended() {
        let jb = buffer(1);
        let settings = jb.settings().clone();
        // 6 losses/s reported at 30 fps → 0.2, weighted 0.7 → 0.14: medium tier
        jb.record_peer_loss_report_at(6, T0 + 0.5, T0 + 1.0);
        assert_eq!(jb.peer_loss_rate(), Some(6.0));
        stream(&jb, 1..=30, |_| false);
        assert_eq!(settings.quality(), 50);
    }

    #[test]
    fn emits_loss_reports_when_peer_supports_them() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cfg = QosConfig { buffer_threshold: 1, report_refresh: 1.0, ..QosConfig::default() };
        let jb = JitterBuffer::new(cfg, Arc::new(AdaptiveSettings::new(30)), Some(tx));
        jb.set_peer_supports_loss_reports(true);
        jb.begin_call_at(T0);

        stream(&jb, 1..=30, |s| s == 10 || s == 20);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn no_reports_without_v1() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cfg = QosConfig { buffer_threshold: 1, report_refresh: 1.0, ..QosConfig::default() };
        let jb = JitterBuffer::new(cfg, Arc::new(AdaptiveSettings::new(30)), Some(tx));
        jb.begin_call_at(T0);
        stream(&jb, 1..=30, |s| s == 10);
        assert!(rx.try_recv().is_err());
    }
}
