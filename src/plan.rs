//! Chunk planner
//!
//! Converts a participant's assigned output row range into the sequence of
//! [`Chunk`] descriptors the pipeline consumes. The planner is a pure
//! iterator: it allocates nothing beyond the descriptors themselves, and all
//! halo arithmetic is delegated to [`crate::geometry`].

use crate::codec::row_offset;
use crate::geometry;
use crate::ConvSpec;

/// One pipeline unit: a contiguous output row span plus the halo-aware input
/// span that evaluates it, with both file offsets precomputed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// First output row (inclusive, global).
    pub chunk_start: u32,
    /// Last output row (exclusive, global).
    pub chunk_end: u32,
    /// Output rows in this chunk, `chunk_end − chunk_start`.
    pub chunk_out_h: u32,
    /// First input row the chunk needs (global, clamped).
    pub input_row_start: u32,
    /// Input rows the chunk needs.
    pub num_input_rows: u32,
    /// Byte offset of the input span in the input file.
    pub input_offset: u64,
    /// Byte offset of the output span in the output file.
    pub output_offset: u64,
}

impl Chunk {
    /// Build the chunk starting at output row `chunk_start`, capped at
    /// `row_end`.
    pub fn build(chunk_start: u32, chunk_rows: u32, row_end: u32, spec: &ConvSpec) -> Self {
        let chunk_end = chunk_start.saturating_add(chunk_rows).min(row_end);
        let (input_row_start, num_input_rows) = geometry::input_rows_for_output_range(
            chunk_start,
            chunk_end,
            spec.s_h,
            spec.k_h,
            spec.h,
        );
        Self {
            chunk_start,
            chunk_end,
            chunk_out_h: chunk_end - chunk_start,
            input_row_start,
            num_input_rows,
            input_offset: row_offset(spec.w, input_row_start),
            output_offset: row_offset(spec.out_w, chunk_start),
        }
    }

    /// Input elements the chunk reads.
    #[inline]
    pub fn input_elems(&self, spec: &ConvSpec) -> usize {
        self.num_input_rows as usize * spec.w as usize
    }

    /// Output elements the chunk writes.
    #[inline]
    pub fn output_elems(&self, spec: &ConvSpec) -> usize {
        self.chunk_out_h as usize * spec.out_w as usize
    }
}

/// Pure iterator over the chunks covering `[row_start, row_end)`.
#[derive(Clone, Debug)]
pub struct ChunkPlan {
    spec: ConvSpec,
    chunk_rows: u32,
    next_start: u32,
    row_end: u32,
    total: u32,
}

impl ChunkPlan {
    /// Plan chunks of height `chunk_rows` over the output rows
    /// `[row_start, row_end)`.
    pub fn new(spec: &ConvSpec, row_start: u32, row_end: u32, chunk_rows: u32) -> Self {
        debug_assert!(chunk_rows >= 1, "chunk height must be positive");
        debug_assert!(row_start <= row_end, "inverted row range");
        let span = row_end.saturating_sub(row_start);
        Self {
            spec: spec.clone(),
            chunk_rows: chunk_rows.max(1),
            next_start: row_start,
            row_end,
            total: span.div_ceil(chunk_rows.max(1)),
        }
    }

    /// Total chunks this plan will emit.
    #[inline]
    pub fn total(&self) -> u32 {
        self.total
    }
}

impl Iterator for ChunkPlan {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next_start >= self.row_end {
            return None;
        }
        let chunk =
            Chunk::build(self.next_start, self.chunk_rows, self.row_end, &self.spec);
        self.next_start = chunk.chunk_end;
        Some(chunk)
    }
}

/// Worst-case tile extents over every chunk a plan can emit; the pipeline
/// provisions its buffers from this once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileShape {
    /// Elements a single input tile must hold.
    pub input_elems: usize,
    /// Elements a single output tile must hold.
    pub output_elems: usize,
}

impl TileShape {
    /// Worst-case shape for chunks of height `chunk_rows`.
    ///
    /// A full-height chunk needs at most `chunk_rows·sH + kH` input rows
    /// (fewer when the input itself is shorter).
    pub fn worst_case(spec: &ConvSpec, chunk_rows: u32) -> Self {
        let max_input_rows =
            (chunk_rows as u64 * spec.s_h as u64 + spec.k_h as u64).min(spec.h as u64);
        let output_rows = (chunk_rows as u64).max(1);
        Self {
            input_elems: (max_input_rows * spec.w as u64) as usize,
            output_elems: (output_rows * spec.out_w as u64) as usize,
        }
    }

    /// Resident bytes of one input+output tile pair.
    #[inline]
    pub fn tile_pair_bytes(&self) -> u64 {
        (self.input_elems as u64 + self.output_elems as u64) * 4
    }
}
