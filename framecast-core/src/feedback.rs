//! Receiver feedback: fragment accounting and the byte-budget rule.
//!
//! The receiver acknowledges individual fragments and reports its
//! observed average inter-packet delay. From the delay and the number
//! of unacknowledged fragments the sender derives the byte budget for
//! the next frame: how many MTU packets can be injected before the
//! imputed one-way delay exceeds the latency ceiling.
//!
//! No smoothing is applied — the last ack wins, out-of-order or not.

use std::time::Instant;

use tracing::trace;

use crate::fragment::{AckPacket, MTU};

/// Latency ceiling the budget rule fills up to.
pub const MAX_DELAY_US: u32 = 100_000;

// ── FragmentLedger ───────────────────────────────────────────────

/// Cumulative fragments-per-frame counters.
///
/// Entry `k` is the total number of fragments emitted across frames
/// `0..=k`; the sequence is strictly increasing because every sent
/// frame occupies at least one fragment.
#[derive(Debug, Default)]
pub struct FragmentLedger {
    cumulative: Vec<u64>,
}

impl FragmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sent frame's fragment count.
    pub fn record_frame(&mut self, fragment_count: u16) {
        debug_assert!(fragment_count > 0);
        let total = self.last_sent() + fragment_count as u64;
        self.cumulative.push(total);
    }

    /// Number of frames recorded.
    pub fn frames_sent(&self) -> usize {
        self.cumulative.len()
    }

    /// Total fragments emitted so far.
    pub fn last_sent(&self) -> u64 {
        self.cumulative.last().copied().unwrap_or(0)
    }

    /// Cumulative count *before* the given frame, or `None` if that
    /// frame was never sent.
    pub fn base_for(&self, frame_no: u32) -> Option<u64> {
        if frame_no as usize >= self.cumulative.len() {
            return None;
        }
        match frame_no {
            0 => Some(0),
            n => Some(self.cumulative[n as usize - 1]),
        }
    }

    /// Fragments emitted for one recorded frame.
    pub fn fragments_for(&self, frame_no: u32) -> Option<u64> {
        let end = *self.cumulative.get(frame_no as usize)?;
        Some(end - self.base_for(frame_no).unwrap_or(0))
    }
}

// ── FeedbackTracker ──────────────────────────────────────────────

/// Last-ack-wins view of the receiver's state.
#[derive(Debug)]
pub struct FeedbackTracker {
    connection_id: u16,
    avg_delay_us: Option<u32>,
    last_acked: u64,
    last_ack_at: Option<Instant>,
}

impl FeedbackTracker {
    pub fn new(connection_id: u16) -> Self {
        Self {
            connection_id,
            avg_delay_us: None,
            last_acked: 0,
            last_ack_at: None,
        }
    }

    /// Whether any ack has ever been accepted.
    pub fn has_feedback(&self) -> bool {
        self.avg_delay_us.is_some()
    }

    /// Receiver-reported average inter-packet delay, if known.
    pub fn avg_delay_us(&self) -> Option<u32> {
        self.avg_delay_us
    }

    /// Cumulative index of the last acknowledged fragment.
    pub fn last_acked(&self) -> u64 {
        self.last_acked
    }

    /// Arrival time of the last accepted ack. Extension point for
    /// timestamp-based delay tracking.
    pub fn last_ack_at(&self) -> Option<Instant> {
        self.last_ack_at
    }

    /// Fold one ack into the tracker.
    ///
    /// Returns `false` when the ack is silently dropped: a foreign
    /// connection id (multiplexed or stale traffic) or a frame this
    /// sender never emitted (a protocol error the sender tolerates).
    pub fn observe(&mut self, ack: &AckPacket, ledger: &FragmentLedger) -> bool {
        if ack.connection_id != self.connection_id {
            trace!(
                got = ack.connection_id,
                want = self.connection_id,
                "dropping ack for foreign connection"
            );
            return false;
        }
        let Some(base) = ledger.base_for(ack.frame_no) else {
            trace!(frame_no = ack.frame_no, "dropping ack for unsent frame");
            return false;
        };

        self.avg_delay_us = Some(ack.avg_delay_us);
        self.last_acked = base + ack.fragment_no as u64;
        self.last_ack_at = Some(Instant::now());
        true
    }

    /// Byte budget for the next frame, or `None` before the first ack.
    ///
    /// ```text
    /// in_flight = last_sent − last_acked
    /// budget    = max(0, MAX_DELAY_US / max(avg_delay, 1) − in_flight)
    /// target    = MTU × budget
    /// ```
    pub fn target_size(&self, ledger: &FragmentLedger) -> Option<usize> {
        let avg = self.avg_delay_us?.max(1) as u64;
        let in_flight = ledger.last_sent().saturating_sub(self.last_acked);
        let budget = (MAX_DELAY_US as u64 / avg).saturating_sub(in_flight);

        trace!(
            in_flight,
            avg_delay_us = avg,
            imputed_delay_us = avg * in_flight,
            budget_packets = budget,
            "feedback budget"
        );
        Some(MTU * budget as usize)
    }
}

// ── Tests ────────────────────────────────────────────────────────
