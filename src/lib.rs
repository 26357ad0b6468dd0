//! Crate root: public surface, the convolution spec, and engine-wide invariants
//!
//! This module is the **single canonical entry-point** for downstream users of
//! the library. It centralizes the [`ConvSpec`] descriptor, the shared size
//! aliases, and re-exports the submodules that implement the streaming engine.
//!
//! ## Invariants (engine-wide)
//!
//! - **Output shape.** `out_H = ⌊(H−1)/sH⌋+1` and `out_W = ⌊(W−1)/sW⌋+1`.
//!   The kernel extent is deliberately absent from both formulas: the engine
//!   computes a *same-size strided* cross-correlation with zero padding at the
//!   global matrix edges, so every stride position yields an output cell.
//!
//! - **Streaming discipline.** No participant ever materializes the full
//!   input or output. Work flows through `Chunk`s whose tiles are sized by the
//!   memory budget; at any moment a participant holds at most two input tiles
//!   and two output tiles.
//!
//! - **Kernel sharing.** The kernel is read once, wrapped in an `Arc`, and
//!   shared read-only by every participant and every evaluator worker. It is
//!   bit-identical everywhere before the first chunk is processed.
//!
//! - **Disjoint writes.** Participants own disjoint output row ranges; the
//!   output file header is written exactly once, before any payload byte.
//!
//! If an invariant is violated at runtime the failure mode is a **precise
//! error** (never UB); we **forbid unsafe** throughout the crate.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

use std::sync::Arc;

/// Global byte budget brokerage (global → per-participant → chunk rows).
pub mod budget;
/// Binary matrix file codec (fixed header + row-major f32 payload).
pub mod codec;
/// Pure geometry: output dims, halo arithmetic, chunk sizing.
pub mod geometry;
/// Participant coordinator: row partition, barriers, collective open/close.
pub mod group;
/// Seeded random matrix generation.
pub mod matgen;
/// Zero-border padding of binary matrix files.
pub mod pad;
/// Double-buffered streaming pipeline (read / compute / write overlap).
pub mod pipeline;
/// Chunk planner: output-row ranges to halo-aware tile descriptors.
pub mod plan;
/// Text ↔ binary matrix conversion.
pub mod text;
/// The row-span file I/O capability and its implementations.
pub mod transport;
/// Windowed kernel evaluator (shared-memory parallel).
pub mod window;

// ============================================================================
// Canonical re-exports
// ============================================================================

pub use crate::codec::{CodecError, MatrixFile};
pub use crate::group::{run_group, GroupError, RunSummary};
pub use crate::pipeline::PipelineError;
pub use crate::plan::Chunk;

/// Parameters of one convolution run, replicated on every participant.
///
/// Built once at startup from the input and kernel headers, then immutable.
/// Cloning is cheap: the kernel payload is behind an `Arc`.
#[derive(Clone, Debug)]
pub struct ConvSpec {
    /// Input matrix height.
    pub h: u32,
    /// Input matrix width.
    pub w: u32,
    /// Kernel height.
    pub k_h: u32,
    /// Kernel width.
    pub k_w: u32,
    /// Vertical stride.
    pub s_h: u32,
    /// Horizontal stride.
    pub s_w: u32,
    /// Output height, `⌊(H−1)/sH⌋+1`.
    pub out_h: u32,
    /// Output width, `⌊(W−1)/sW⌋+1`.
    pub out_w: u32,
    /// Kernel payload, row-major `k_h·k_w` values, shared read-only.
    pub kernel: Arc<[f32]>,
}

/// Errors raised while assembling a [`ConvSpec`].
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// Input dimensions must both be at least 1.
    #[error("input dimensions must be positive (got {h}x{w})")]
    BadInputDims {
        /// Offending height.
        h: u32,
        /// Offending width.
        w: u32,
    },
    /// Kernel dimensions must both be at least 1.
    #[error("kernel dimensions must be positive (got {k_h}x{k_w})")]
    BadKernelDims {
        /// Offending kernel height.
        k_h: u32,
        /// Offending kernel width.
        k_w: u32,
    },
    /// Strides must both be at least 1.
    #[error("strides must be positive (got {s_h}x{s_w})")]
    BadStrides {
        /// Offending vertical stride.
        s_h: u32,
        /// Offending horizontal stride.
        s_w: u32,
    },
    /// Kernel payload length must equal `k_h·k_w`.
    #[error("kernel payload holds {found} values, expected {expected}")]
    KernelLen {
        /// Expected element count.
        expected: usize,
        /// Actual element count.
        found: usize,
    },
}

impl ConvSpec {
    /// Validate the run parameters and derive the output dimensions.
    pub fn new(
        h: u32,
        w: u32,
        k_h: u32,
        k_w: u32,
        s_h: u32,
        s_w: u32,
        kernel: Arc<[f32]>,
    ) -> Result<Self, SpecError> {
        if h == 0 || w == 0 {
            return Err(SpecError::BadInputDims { h, w });
        }
        if k_h == 0 || k_w == 0 {
            return Err(SpecError::BadKernelDims { k_h, k_w });
        }
        if s_h == 0 || s_w == 0 {
            return Err(SpecError::BadStrides { s_h, s_w });
        }
        let expected = k_h as usize * k_w as usize;
        if kernel.len() != expected {
            return Err(SpecError::KernelLen { expected, found: kernel.len() });
        }
        let (out_h, out_w) = geometry::output_dims(h, w, s_h, s_w);
        Ok(Self { h, w, k_h, k_w, s_h, s_w, out_h, out_w, kernel })
    }
}

// ============================================================================
// Test support
// ============================================================================
