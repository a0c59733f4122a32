//! # framecast-core — deadline-scheduled real-time video sending
//!
//! The sender reads a raw YUV4MPEG stream, encodes each frame under a
//! wall-clock deadline, fragments the result into MTU-sized datagrams,
//! and pushes them over an unreliable UDP transport. Receiver acks
//! feed back an inter-packet delay estimate that re-targets future
//! encode byte budgets.
//!
//! ## Architecture
//!
//! ```text
//! stdin (Y4M) ──► Y4mReader ──► raster channel ─┐
//!                                               ▼
//!                        ┌──────────── SenderService ───────────┐
//!   tick (1/fps) ───────►│ plan: skip / constant-q / target-size │
//!                        │   │ spawn generation (N ≥ 1 jobs)     │
//!                        │   ▼                                   │
//!                        │ Encoder clones on worker threads      │
//!                        │   │ coordinator awaits ⩽ deadline     │
//!                        │   ▼                                   │
//!                        │ FragmentedFrame ──► UDP ──► receiver  │
//!                        │   ▲                          │        │
//!                        │ FeedbackTracker ◄── acks ────┘        │
//!                        └───────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module     | Purpose                                            |
//! |------------|----------------------------------------------------|
//! | `raster`   | Planar frame model and the row-major 2-D container |
//! | `y4m`      | YUV4MPEG2 stream reader (frame source)             |
//! | `codec`    | Clone-able quantize/predict/zstd encoder           |
//! | `encode`   | Encode jobs, worker spawning, generation deadline  |
//! | `fragment` | MTU fragmenter and both datagram wire formats      |
//! | `feedback` | Fragment ledger, ack tracking, byte-budget rule    |
//! | `service`  | The deadline scheduler event loop                  |

pub mod codec;
pub mod encode;
pub mod error;
pub mod feedback;
pub mod fragment;
pub mod raster;
pub mod service;
pub mod y4m;

pub use codec::{Encoder, MAX_QUANTIZER};
pub use encode::{EncodeJob, EncodeMode, EncodeOutput, GenerationOutcome};
pub use error::FramecastError;
pub use feedback::{FeedbackTracker, FragmentLedger, MAX_DELAY_US};
pub use fragment::{AckPacket, FragmentHeader, FragmentedFrame, MTU};
pub use raster::{Plane, Raster, RasterHandle};
pub use service::{SenderConfig, SenderService, TickPlan, DEFAULT_FPS, MAX_SKIPPED};
pub use y4m::{spawn_source, Y4mReader};
