//! Outbound and inbound frame pacing.
//!
//! Both loops wake once per frame period and whenever call control
//! publishes a new call epoch:
//!
//! ```text
//!  epoch None ──► Some(n) ── begin: reset buffer / sequence
//!  Some(n)    ──► Some(m) ── end + begin (redial without an idle gap)
//!  Some(n)    ──► None    ── end
//!  in call: Active ── send / pop;  LocalHold / PeerHold ── send nothing
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info};
use vidlink_core::{CallStatus, Resolution, VideoFrame};
use vidlink_signaling::CallControl;
use vidlink_transport::{AdaptiveSettings, MediaReceiver, VideoSender};

const STATS_INTERVAL: Duration = Duration::from_secs(10);
/// The raw codec does not compress, so synthetic frames are generated at
/// 1/8 of the negotiated size per side, one luma byte per pixel.
const PREVIEW_SCALE: u32 = 8;

fn frame_period(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(fps.max(1)))
}

// ── Frame source ──────────────────────────────────────────────────────────────

/// Moving diagonal gradient. Stands in for a camera.
#[derive(Debug, Default)]
pub struct TestPattern {
    frame_no: u32,
}

impl TestPattern {
    pub fn next_frame(&mut self, resolution: Resolution) -> VideoFrame {
        let width = (resolution.width / PREVIEW_SCALE).max(1);
        let height = (resolution.height / PREVIEW_SCALE).max(1);
        let shift = self.frame_no;
        let data: Vec<u8> = (0..height)
            .flat_map(|y| (0..width).map(move |x| x.wrapping_add(y).wrapping_add(shift) as u8))
            .collect();
        self.frame_no = self.frame_no.wrapping_add(1);
        VideoFrame::new(data, width, height)
    }
}

// ── Call tracking ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallChange {
    Unchanged,
    Started,
    Ended,
    /// A new call replaced the previous one without an idle gap in between.
    Replaced,
}

/// Follows the call epoch published by call control.
#[derive(Debug, Default)]
struct CallTracker {
    current: Option<u64>,
}

impl CallTracker {
    fn observe(&mut self, epoch: Option<u64>) -> CallChange {
        let change = match (self.current, epoch) {
            (None, None) => CallChange::Unchanged,
            (None, Some(_)) => CallChange::Started,
            (Some(_), None) => CallChange::Ended,
            (Some(old), Some(new)) if old == new => CallChange::Unchanged,
            (Some(_), Some(_)) => CallChange::Replaced,
        };
        self.current = epoch;
        change
    }
}

// ── Outbound ──────────────────────────────────────────────────────────────────

/// Send one frame per `1 / settings.fps()` while the call is active. The
/// sequence space restarts with every call.
pub async fn pace_outbound(
    control: Arc<CallControl>,
    sender: VideoSender,
    settings: Arc<AdaptiveSettings>,
    mut stop: watch::Receiver<bool>,
) {
    let mut calls = control.watch_calls();
    let mut tracker = CallTracker::default();
    let mut source = TestPattern::default();

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            res = calls.changed() => {
                if res.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(frame_period(settings.fps())) => {}
        }

        // status first: a call that became active is then always seen by
        // the epoch read below
        let status = control.call_status().await;
        let epoch = *calls.borrow_and_update();
        if matches!(tracker.observe(epoch), CallChange::Started | CallChange::Replaced) {
            sender.reset_sequence();
        }

        if let (Some(_), CallStatus::Active { media_peer }) = (epoch, status) {
            let frame = source.next_frame(settings.resolution());
            if let Err(e) = sender.send_next(media_peer, &frame, &settings).await {
                debug!("Frame to {} not sent: {}", media_peer, e);
            }
        }
    }
    debug!("Outbound pacing stopped");
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// Pop the jitter buffer at the incoming frame rate and reset it at every
/// call boundary, including a redial that never passes through idle.
pub async fn render_inbound(
    control: Arc<CallControl>,
    receiver: Arc<MediaReceiver>,
    max_fps: u32,
    mut stop: watch::Receiver<bool>,
) {
    let buffer = receiver.buffer().clone();
    let mut calls = control.watch_calls();
    let mut tracker = CallTracker::default();
    let mut fps = max_fps;
    let mut last_seq: Option<u64> = None;
    let mut rendered = 0u64;
    let mut last_stats = Instant::now();

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            res = calls.changed() => {
                if res.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(frame_period(fps)) => {}
        }

        let epoch = *calls.borrow_and_update();
        let change = tracker.observe(epoch);
        if matches!(change, CallChange::Ended | CallChange::Replaced) {
            info!("Media stopped after {} frames: {:?}", rendered, buffer.stats());
            receiver.end_call();
        }
        if matches!(change, CallChange::Started | CallChange::Replaced) {
            receiver.begin_call();
            fps = max_fps;
            last_seq = None;
            rendered = 0;
        }
        if epoch.is_none() {
            continue;
        }

        if let Some(popped) = buffer.pop() {
            fps = popped.header.fps.max(1);
            if last_seq != Some(popped.header.seq) {
                last_seq = Some(popped.header.seq);
                rendered += 1;
            }
            if popped.lost > 0 {
                debug!("{} frames missing before seq={}", popped.lost, popped.header.seq);
            }
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();
            let settings = buffer.settings();
            info!(
                "Media: rendered={} queued={} lost={} | sending q={} fps={} res={}",
                rendered,
                buffer.len(),
                settings.total_lost(),
                settings.quality(),
                settings.fps(),
                settings.resolution(),
            );
        }
    }
    debug!("Inbound pacing stopped");
}
