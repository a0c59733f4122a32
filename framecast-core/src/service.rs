//! The deadline-scheduled sender service.
//!
//! One event loop couples four readiness sources and serves each
//! handler to completion, so all scheduler state is single-owner:
//!
//! ```text
//! stdin ──► source thread ──► raster channel ──┐
//! tick interval (1/fps) ──────────────────────►│  SenderService
//! generation-ended channel ◄── coordinator ────┤  (select loop)
//! ack datagrams ◄────────── UDP socket ───────►┘
//! ```
//!
//! A tick opens an encode *generation* only when no generation is in
//! flight and a raster is present; otherwise it is dropped with no
//! side effects. The generation's deadline is one frame interval; the
//! coordinator posts a single outcome whether or not any job made it.
//! Sending, ledger growth, and the committed codec state all advance
//! together in the generation-ended handler, so the committed state
//! always reflects exactly the frames emitted on the wire.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::codec::Encoder;
use crate::encode::{spawn_generation, EncodeJob, EncodeMode, GenerationOutcome};
use crate::error::FramecastError;
use crate::feedback::{FeedbackTracker, FragmentLedger};
use crate::fragment::{AckPacket, FragmentedFrame, MTU};
use crate::raster::RasterHandle;

// ── Constants ────────────────────────────────────────────────────

/// Default sender frame rate.
pub const DEFAULT_FPS: u8 = 12;

/// Consecutive zero-budget skips tolerated before a frame is forced
/// out at one MTU to keep the stream alive.
pub const MAX_SKIPPED: u32 = 5;

// ── Configuration ────────────────────────────────────────────────

/// Scheduler parameters fixed for a session.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Session id carried in every fragment and checked on every ack.
    pub connection_id: u16,
    /// Quantizer index used while no feedback has arrived.
    pub quantizer: u8,
    /// Tick rate; also the per-generation deadline (1/fps).
    pub fps: u8,
}

impl SenderConfig {
    /// Tick period: `1000 ms / fps`, millisecond granularity.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.fps.max(1) as u64)
    }

    /// The tick period in microseconds, as stamped into fragments.
    pub fn frame_interval_us(&self) -> u32 {
        self.frame_interval().as_micros() as u32
    }
}

// ── Tick planning ────────────────────────────────────────────────

/// Outcome of one tick of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickPlan {
    /// A generation is already in flight; the tick is dropped.
    Busy,
    /// No raster has arrived yet; the tick is dropped.
    NoRaster,
    /// Zero byte budget with skip quota remaining.
    Skip,
    /// Open a generation with these candidate modes.
    Encode(Vec<EncodeMode>),
}

/// The single in-flight generation.
#[derive(Debug)]
struct InFlight {
    frame_no: u32,
}

// ── SenderService ────────────────────────────────────────────────

/// The deadline scheduler and its session state.
pub struct SenderService {
    config: SenderConfig,
    /// Codec state reflecting exactly the frames sent so far.
    committed: Encoder,
    frame_no: u32,
    last_raster: Option<RasterHandle>,
    in_flight: Option<InFlight>,
    skipped_in_a_row: u32,
    ledger: FragmentLedger,
    feedback: FeedbackTracker,
    outcome_tx: mpsc::Sender<GenerationOutcome>,
    outcome_rx: Option<mpsc::Receiver<GenerationOutcome>>,
}

impl SenderService {
    /// Build a service around a fresh codec state.
    pub fn new(config: SenderConfig, encoder: Encoder) -> Self {
        // Capacity 1: at most one generation is ever in flight.
        let (outcome_tx, outcome_rx) = mpsc::channel(1);
        let feedback = FeedbackTracker::new(config.connection_id);
        Self {
            config,
            committed: encoder,
            frame_no: 0,
            last_raster: None,
            in_flight: None,
            skipped_in_a_row: 0,
            ledger: FragmentLedger::new(),
            feedback,
            outcome_tx,
            outcome_rx: Some(outcome_rx),
        }
    }

    /// Run the event loop until input exhaustion or a fatal transport
    /// error. Never returns success: continuous delivery is the only
    /// healthy state.
    pub async fn run(
        mut self,
        socket: &UdpSocket,
        mut rasters: mpsc::Receiver<Result<RasterHandle, FramecastError>>,
    ) -> Result<(), FramecastError> {
        let mut outcome_rx = self
            .outcome_rx
            .take()
            .ok_or(FramecastError::ChannelClosed)?;

        info!(
            connection_id = self.config.connection_id,
            fps = self.config.fps,
            quantizer = self.config.quantizer,
            "sender running"
        );

        let mut ticker = time::interval(self.config.frame_interval());
        // A tick that cannot fire on time is lost, not queued.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ack_buf = [0u8; 64];

        loop {
            tokio::select! {
                maybe_raster = rasters.recv() => match maybe_raster {
                    Some(Ok(raster)) => self.handle_raster(raster),
                    Some(Err(e)) => return Err(e),
                    None => return Err(FramecastError::EndOfStream),
                },

                _ = ticker.tick() => {
                    self.handle_tick();
                }

                outcome = outcome_rx.recv() => {
                    let outcome = outcome.ok_or(FramecastError::ChannelClosed)?;
                    self.handle_generation_ended(outcome, socket).await?;
                }

                received = socket.recv(&mut ack_buf) => {
                    let len = received?;
                    match AckPacket::decode(&ack_buf[..len]) {
                        Ok(ack) => self.handle_ack(&ack),
                        Err(_) => trace!(len, "ignoring undecodable datagram"),
                    }
                }
            }
        }
    }

    // ── Event handlers ───────────────────────────────────────────

    /// E1: a raster arrived. Freshness policy: the newest capture
    /// always replaces whatever was waiting.
    pub fn handle_raster(&mut self, raster: RasterHandle) {
        self.last_raster = Some(raster);
    }

    /// E2: a tick fired. Decides and, when the plan says encode,
    /// opens the generation.
    pub fn handle_tick(&mut self) -> TickPlan {
        let plan = self.plan_tick();

        match &plan {
            TickPlan::Busy => trace!("tick dropped: generation in flight"),
            TickPlan::NoRaster => trace!("tick dropped: no raster yet"),
            TickPlan::Skip => {
                debug!(skipped = self.skipped_in_a_row, "skipping frame")
            }
            TickPlan::Encode(modes) => {
                let raster = self
                    .last_raster
                    .clone()
                    .expect("plan_tick guarantees a raster");
                let deadline = Instant::now() + self.config.frame_interval();

                let jobs: Vec<EncodeJob> = modes
                    .iter()
                    .map(|mode| EncodeJob {
                        frame_no: self.frame_no,
                        raster: raster.clone(),
                        encoder: self.committed.clone(),
                        mode: *mode,
                    })
                    .collect();

                debug!(
                    frame_no = self.frame_no,
                    jobs = jobs.len(),
                    ?modes,
                    "opening encode generation"
                );
                spawn_generation(jobs, deadline, self.outcome_tx.clone());
                self.in_flight = Some(InFlight {
                    frame_no: self.frame_no,
                });
            }
        }
        plan
    }

    /// The per-tick mode decision. Mutates only the skip counter.
    fn plan_tick(&mut self) -> TickPlan {
        if self.in_flight.is_some() {
            return TickPlan::Busy;
        }
        if self.last_raster.is_none() {
            return TickPlan::NoRaster;
        }

        let Some(target) = self.feedback.target_size(&self.ledger) else {
            // No ack yet — constant quality at the configured index.
            return TickPlan::Encode(vec![EncodeMode::ConstantQuantizer(self.config.quantizer)]);
        };

        if target == 0 {
            if self.skipped_in_a_row < MAX_SKIPPED {
                self.skipped_in_a_row += 1;
                return TickPlan::Skip;
            }
            // Skip quota exhausted: force one low-quality frame out so
            // the receiver keeps seeing the stream.
            return TickPlan::Encode(vec![EncodeMode::TargetSize(MTU)]);
        }

        TickPlan::Encode(vec![EncodeMode::TargetSize(target)])
    }

    /// E3: the coordinator reported the generation's outcome.
    pub async fn handle_generation_ended(
        &mut self,
        outcome: GenerationOutcome,
        socket: &UdpSocket,
    ) -> Result<(), FramecastError> {
        let Some(in_flight) = self.in_flight.take() else {
            warn!(
                frame_no = outcome.frame_no,
                "generation outcome with nothing in flight"
            );
            return Ok(());
        };
        if in_flight.frame_no != outcome.frame_no {
            warn!(
                expected = in_flight.frame_no,
                got = outcome.frame_no,
                "generation outcome for an unexpected frame"
            );
        }

        // First ready output wins; submission order makes this
        // deterministic.
        let Some(output) = outcome.ready.into_iter().next() else {
            debug!(
                frame_no = outcome.frame_no,
                "every encode job missed the deadline; frame dropped"
            );
            return Ok(());
        };

        let frame = FragmentedFrame::new(
            self.config.connection_id,
            output.frame_no,
            self.config.frame_interval_us(),
            output.frame,
        )?;
        frame.send(socket).await?;

        self.ledger.record_frame(frame.fragment_count());
        self.committed = output.encoder;
        self.skipped_in_a_row = 0;
        self.frame_no += 1;

        debug!(
            frame_no = output.frame_no,
            bytes = frame.payload().len(),
            fragments = frame.fragment_count(),
            encode_ms = output.encode_time.as_millis() as u64,
            committed_state = %self.committed.fingerprint(),
            "frame sent"
        );
        Ok(())
    }

    /// Ack received on the socket.
    pub fn handle_ack(&mut self, ack: &AckPacket) {
        self.feedback.observe(ack, &self.ledger);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Plane, Raster};
    use std::sync::Arc;

    fn noise_raster(width: usize, height: usize, seed: u32) -> RasterHandle {
        let mut state = seed | 1;
        let mut next = move || {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            (state >> 24) as u8
        };
        let (cw, ch) = Raster::chroma_dimensions(width, height);
        let y = Plane::from_vec(width, height, (0..width * height).map(|_| next()).collect());
        let u = Plane::from_vec(cw, ch, (0..cw * ch).map(|_| next()).collect());
        let v = Plane::from_vec(cw, ch, (0..cw * ch).map(|_| next()).collect());
        Arc::new(Raster::new(width, height, y, u, v))
    }

    fn service() -> SenderService {
        let config = SenderConfig {
            connection_id: 7,
            quantizer: 32,
            fps: 12,
        };
        SenderService::new(config, Encoder::new(32, 32))
    }

    async fn socket_pair() -> (UdpSocket, UdpSocket) {
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.connect(receiver.local_addr().unwrap()).await.unwrap();
        (sender, receiver)
    }

    /// Drive one full tick → generation → send cycle.
    async fn complete_cycle(svc: &mut SenderService, socket: &UdpSocket) -> TickPlan {
        let plan = svc.handle_tick();
        if matches!(plan, TickPlan::Encode(_)) {
            let outcome = svc
                .outcome_rx
                .as_mut()
                .unwrap()
                .recv()
                .await
                .expect("coordinator must post an outcome");
            svc.handle_generation_ended(outcome, socket).await.unwrap();
        }
        plan
    }

    #[test]
    fn frame_interval_matches_constants() {
        let config = SenderConfig {
            connection_id: 0,
            quantizer: 32,
            fps: DEFAULT_FPS,
        };
        assert_eq!(config.frame_interval(), Duration::from_millis(83));
        assert_eq!(config.frame_interval_us(), 83_000);
    }

    #[test]
    fn tick_without_raster_is_dropped() {
        let mut svc = service();
        assert_eq!(svc.plan_tick(), TickPlan::NoRaster);
    }

    #[tokio::test]
    async fn warm_up_sends_constant_quantizer_frames() {
        let (sender, _receiver) = socket_pair().await;
        let mut svc = service();

        for i in 0..3 {
            svc.handle_raster(noise_raster(32, 32, i));
            let plan = complete_cycle(&mut svc, &sender).await;
            assert_eq!(
                plan,
                TickPlan::Encode(vec![EncodeMode::ConstantQuantizer(32)]),
                "no ack yet: every frame encodes at the configured qi"
            );
        }

        assert_eq!(svc.ledger.frames_sent(), 3);
        assert_eq!(svc.frame_no, 3);
        assert_eq!(svc.committed.frame_count(), 3);
    }

    #[test]
    fn stale_rasters_are_discarded() {
        let mut svc = service();
        let first = noise_raster(32, 32, 1);
        let second = noise_raster(32, 32, 2);
        let third = noise_raster(32, 32, 3);

        svc.handle_raster(first);
        svc.handle_raster(second);
        svc.handle_raster(third.clone());

        assert!(Arc::ptr_eq(svc.last_raster.as_ref().unwrap(), &third));
    }

    #[tokio::test]
    async fn in_flight_generation_blocks_new_ticks() {
        let mut svc = service();
        svc.handle_raster(noise_raster(32, 32, 1));

        assert!(matches!(svc.handle_tick(), TickPlan::Encode(_)));
        // Second tick while the generation runs: dropped.
        assert_eq!(svc.handle_tick(), TickPlan::Busy);
        assert_eq!(svc.frame_no, 0);
    }

    #[tokio::test]
    async fn skip_cascade_then_forced_send() {
        let (sender, _receiver) = socket_pair().await;
        let mut svc = service();
        svc.handle_raster(noise_raster(32, 32, 1));

        // Emit one frame so the ledger is non-empty.
        complete_cycle(&mut svc, &sender).await;
        let sent = svc.ledger.last_sent();

        // Everything acked at the ceiling delay: budget is exactly one
        // packet, so ticks produce TargetSize(MTU) — no skip.
        svc.handle_ack(&AckPacket {
            connection_id: 7,
            frame_no: 0,
            fragment_no: sent as u16,
            avg_delay_us: 100_000,
        });
        let plan = complete_cycle(&mut svc, &sender).await;
        assert_eq!(plan, TickPlan::Encode(vec![EncodeMode::TargetSize(MTU)]));

        // Re-ack leaving two fragments in flight: zero budget.
        let sent = svc.ledger.last_sent();
        svc.handle_ack(&AckPacket {
            connection_id: 7,
            frame_no: 0,
            fragment_no: (sent - 2) as u16,
            avg_delay_us: 100_000,
        });

        for expected in 1..=MAX_SKIPPED {
            assert_eq!(svc.handle_tick(), TickPlan::Skip);
            assert_eq!(svc.skipped_in_a_row, expected);
        }

        // Quota exhausted: the sixth tick forces one MTU out.
        let plan = svc.handle_tick();
        assert_eq!(plan, TickPlan::Encode(vec![EncodeMode::TargetSize(MTU)]));
        assert_eq!(svc.skipped_in_a_row, MAX_SKIPPED);
    }

    #[tokio::test]
    async fn missed_deadline_leaves_state_untouched() {
        let (sender, _receiver) = socket_pair().await;
        let mut svc = service();
        svc.handle_raster(noise_raster(32, 32, 1));

        let before = svc.committed.fingerprint();
        svc.in_flight = Some(InFlight { frame_no: 0 });

        // Coordinator reports that nothing finished in time.
        svc.handle_generation_ended(
            GenerationOutcome {
                frame_no: 0,
                ready: Vec::new(),
            },
            &sender,
        )
        .await
        .unwrap();

        assert_eq!(svc.frame_no, 0);
        assert_eq!(svc.ledger.frames_sent(), 0);
        assert_eq!(svc.committed.fingerprint(), before);
        assert!(svc.in_flight.is_none());

        // The next tick, still holding the freshest raster, starts a
        // new generation.
        assert!(matches!(svc.handle_tick(), TickPlan::Encode(_)));
    }

    #[tokio::test]
    async fn committed_state_matches_the_winning_job() {
        let (sender, _receiver) = socket_pair().await;
        let mut svc = service();
        let raster = noise_raster(32, 32, 9);
        svc.handle_raster(raster.clone());

        // The winner is deterministic, so replaying the same encode on
        // a clone predicts the committed state.
        let mut expected = svc.committed.clone();
        expected.encode_with_quantizer(&raster, 32).unwrap();

        complete_cycle(&mut svc, &sender).await;
        assert_eq!(svc.committed.fingerprint(), expected.fingerprint());
    }

    #[tokio::test]
    async fn foreign_ack_changes_nothing() {
        let (sender, _receiver) = socket_pair().await;
        let mut svc = service();
        svc.handle_raster(noise_raster(32, 32, 1));
        complete_cycle(&mut svc, &sender).await;

        svc.handle_ack(&AckPacket {
            connection_id: 99,
            frame_no: 0,
            fragment_no: 0,
            avg_delay_us: 5,
        });

        // Still no feedback: next plan stays constant-quantizer.
        assert_eq!(
            svc.plan_tick(),
            TickPlan::Encode(vec![EncodeMode::ConstantQuantizer(32)])
        );
    }
}
