//! Intra/inter frame codec with a zstd entropy stage.
//!
//! The encoder carries the codec's running context: frame dimensions,
//! frame count, and the previous *reconstruction* used as the temporal
//! reference. An encode operation advances that context, so callers
//! that race several encode attempts hand each attempt its own clone
//! and commit exactly one winner.
//!
//! Pipeline per frame:
//!
//! 1. Quantize each plane with a step derived from the quantizer index
//!    (0 = near lossless, 127 = coarsest).
//! 2. Predict each quantized sample — temporally from the reference
//!    reconstruction when one exists, otherwise spatially from the
//!    already-coded above/left neighbours.
//! 3. zstd-compress the prediction residuals.
//!
//! `TargetSize` encoding is a bounded binary search over the quantizer
//! index; the contract is best-effort approximation of the byte target.

use crate::error::FramecastError;
use crate::raster::{Plane, Raster};

/// Highest valid quantizer index.
pub const MAX_QUANTIZER: u8 = 127;

/// zstd level for the entropy stage. Speed over ratio: the encode has
/// to fit inside one tick period.
const ZSTD_LEVEL: i32 = 1;

/// Per-frame bitstream header: frame type, quantizer index, width,
/// height (little-endian u16s).
const FRAME_HEADER_LEN: usize = 6;

const FRAME_TYPE_INTRA: u8 = 0;
const FRAME_TYPE_INTER: u8 = 1;

/// Quantizer step for an index. Monotone, 1..=16.
#[inline]
fn quant_step(qi: u8) -> u8 {
    1 + qi.min(MAX_QUANTIZER) / 8
}

// ── Encoder ──────────────────────────────────────────────────────

/// Clone-able codec state.
///
/// The *committed* encoder held by the scheduler reflects exactly the
/// frames emitted on the wire; clones inside abandoned encode jobs are
/// simply dropped.
#[derive(Debug, Clone)]
pub struct Encoder {
    width: usize,
    height: usize,
    frame_count: u64,
    reference: Option<Reconstruction>,
}

/// Reconstructed planes of the previously encoded frame.
#[derive(Debug, Clone)]
struct Reconstruction {
    y: Plane<u8>,
    u: Plane<u8>,
    v: Plane<u8>,
}

impl Encoder {
    /// Fresh codec state for the given display size.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
            reference: None,
        }
    }

    /// Frames this state has encoded (and, for the committed encoder,
    /// emitted).
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Encode at a fixed quantizer index, advancing the codec state.
    pub fn encode_with_quantizer(
        &mut self,
        raster: &Raster,
        qi: u8,
    ) -> Result<Vec<u8>, FramecastError> {
        let (bytes, recon) = self.encode_frame(raster, qi)?;
        self.commit(recon);
        Ok(bytes)
    }

    /// Encode approximating `target` output bytes, advancing the codec
    /// state. Best effort: picks the largest output not exceeding the
    /// target, or the smallest achievable output if the target is
    /// below reach.
    pub fn encode_with_target_size(
        &mut self,
        raster: &Raster,
        target: usize,
    ) -> Result<Vec<u8>, FramecastError> {
        let mut lo: u8 = 0;
        let mut hi: u8 = MAX_QUANTIZER;
        let mut best_fit: Option<(Vec<u8>, Reconstruction)> = None;
        let mut smallest: Option<(Vec<u8>, Reconstruction)> = None;

        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let (bytes, recon) = self.encode_frame(raster, mid)?;
            let len = bytes.len();

            if smallest.as_ref().is_none_or(|(b, _)| len < b.len()) {
                smallest = Some((bytes.clone(), recon.clone()));
            }
            if len <= target && best_fit.as_ref().is_none_or(|(b, _)| len > b.len()) {
                best_fit = Some((bytes, recon));
            }

            if len > target {
                // Too big — quantize harder.
                lo = mid + 1;
            } else if mid == 0 {
                break;
            } else {
                hi = mid - 1;
            }
        }

        let (bytes, recon) = best_fit
            .or(smallest)
            .ok_or_else(|| FramecastError::Encoding("no candidate produced".into()))?;
        self.commit(recon);
        Ok(bytes)
    }

    /// Content hash of the codec state. Two encoders that encoded the
    /// same frame sequence have equal fingerprints.
    pub fn fingerprint(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.width as u64).to_le_bytes());
        hasher.update(&(self.height as u64).to_le_bytes());
        hasher.update(&self.frame_count.to_le_bytes());
        if let Some(reference) = &self.reference {
            hasher.update(reference.y.as_slice());
            hasher.update(reference.u.as_slice());
            hasher.update(reference.v.as_slice());
        }
        hasher.finalize()
    }

    // ── Internals ────────────────────────────────────────────────

    fn commit(&mut self, recon: Reconstruction) {
        self.reference = Some(recon);
        self.frame_count += 1;
    }

    /// Encode one frame without touching the codec state.
    fn encode_frame(
        &self,
        raster: &Raster,
        qi: u8,
    ) -> Result<(Vec<u8>, Reconstruction), FramecastError> {
        let qi = qi.min(MAX_QUANTIZER);
        let step = quant_step(qi);

        let mut residuals = Vec::with_capacity(raster.byte_len());
        let frame_type = match &self.reference {
            Some(reference) => {
                inter_residuals(raster.y(), &reference.y, step, &mut residuals);
                inter_residuals(raster.u(), &reference.u, step, &mut residuals);
                inter_residuals(raster.v(), &reference.v, step, &mut residuals);
                FRAME_TYPE_INTER
            }
            None => {
                intra_residuals(raster.y(), step, &mut residuals);
                intra_residuals(raster.u(), step, &mut residuals);
                intra_residuals(raster.v(), step, &mut residuals);
                FRAME_TYPE_INTRA
            }
        };

        let compressed = zstd::encode_all(residuals.as_slice(), ZSTD_LEVEL)
            .map_err(|e| FramecastError::Encoding(format!("zstd: {e}")))?;

        let mut bytes = Vec::with_capacity(FRAME_HEADER_LEN + compressed.len());
        bytes.push(frame_type);
        bytes.push(qi);
        bytes.extend_from_slice(&(raster.width() as u16).to_le_bytes());
        bytes.extend_from_slice(&(raster.height() as u16).to_le_bytes());
        bytes.extend_from_slice(&compressed);

        let recon = Reconstruction {
            y: reconstruct(raster.y(), step),
            u: reconstruct(raster.u(), step),
            v: reconstruct(raster.v(), step),
        };
        Ok((bytes, recon))
    }
}

// ── Prediction helpers ───────────────────────────────────────────

/// Spatial prediction over the quantized plane: each sample predicted
/// from its already-coded above/left neighbours.
fn intra_residuals(plane: &Plane<u8>, step: u8, out: &mut Vec<u8>) {
    let quantized = quantize(plane, step);
    let seed = 128 / step;
    for ctx in quantized.contexts() {
        let predicted = match (ctx.above, ctx.left) {
            (Some(a), Some(l)) => ((a as u16 + l as u16) / 2) as u8,
            (Some(a), None) => a,
            (None, Some(l)) => l,
            (None, None) => seed,
        };
        out.push(ctx.value.wrapping_sub(predicted));
    }
}

/// Temporal prediction: residual against the reference reconstruction
/// quantized at the current step.
fn inter_residuals(plane: &Plane<u8>, reference: &Plane<u8>, step: u8, out: &mut Vec<u8>) {
    debug_assert_eq!(plane.width(), reference.width());
    debug_assert_eq!(plane.height(), reference.height());
    for (cur, prev) in plane.as_slice().iter().zip(reference.as_slice()) {
        out.push((cur / step).wrapping_sub(prev / step));
    }
}

fn quantize(plane: &Plane<u8>, step: u8) -> Plane<u8> {
    let cells = plane.as_slice().iter().map(|v| v / step).collect();
    Plane::from_vec(plane.width(), plane.height(), cells)
}

/// Midpoint dequantization, saturating at 255.
fn reconstruct(plane: &Plane<u8>, step: u8) -> Plane<u8> {
    let cells = plane
        .as_slice()
        .iter()
        .map(|v| {
            let q = (v / step) as u16;
            (q * step as u16 + step as u16 / 2).min(255) as u8
        })
        .collect();
    Plane::from_vec(plane.width(), plane.height(), cells)
}

// ── Tests ────────────────────────────────────────────────────────
