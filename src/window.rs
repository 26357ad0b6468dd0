//! Windowed kernel evaluator
//!
//! Fills an output tile from an input tile by sliding the kernel window over
//! every stride position. Row indices are tile-local: the caller states which
//! absolute input row the tile starts at and which absolute output row the
//! tile produces first, and the evaluator translates between the two.
//!
//! Sampling is zero-padded: a window position that falls outside the tile's
//! rows or the matrix's columns contributes `0.0`. The planner's halo math
//! guarantees the tile holds every in-bounds row a window can touch, so the
//! tile-local row check is exactly the global edge check.
//!
//! Parallelism: a static rayon partition, one output row per work item. The
//! kernel is a single immutable slice shared by every worker. Within one
//! output cell the summation runs in fixed `ki, kj` row-major order, so each
//! cell's value is deterministic no matter how rows are scheduled.

use rayon::prelude::*;

/// One evaluator invocation: an input tile, the kernel, and the geometry
/// binding tile-local indices to absolute rows.
#[derive(Debug)]
pub struct Window<'a> {
    /// Input tile, `tile_rows · w` elements, holding absolute input rows
    /// `[input_row_start, input_row_start + tile_rows)`.
    pub input: &'a [f32],
    /// Kernel, row-major `k_h · k_w`.
    pub kernel: &'a [f32],
    /// Rows resident in the input tile.
    pub tile_rows: u32,
    /// Matrix width (tile rows are always full width).
    pub w: u32,
    /// Kernel height.
    pub k_h: u32,
    /// Kernel width.
    pub k_w: u32,
    /// Vertical stride.
    pub s_h: u32,
    /// Horizontal stride.
    pub s_w: u32,
    /// Output width.
    pub out_w: u32,
    /// Absolute input row held at tile row 0.
    pub input_row_start: u32,
    /// Absolute output row produced by tile output row 0.
    pub output_row_start: u32,
}

impl Window<'_> {
    /// Fill `output` (`n · out_w` elements for `n` output rows) in parallel.
    pub fn fill(&self, output: &mut [f32]) {
        debug_assert_eq!(self.input.len(), self.tile_rows as usize * self.w as usize);
        debug_assert_eq!(output.len() % self.out_w.max(1) as usize, 0);

        let half_h = ((self.k_h - 1) / 2) as i64;
        let half_w = ((self.k_w - 1) / 2) as i64;

        output
            .par_chunks_mut(self.out_w as usize)
            .enumerate()
            .for_each(|(row, out_row)| {
                let center_row = (row as i64 + self.output_row_start as i64)
                    * self.s_h as i64
                    - self.input_row_start as i64;
                for (col, out) in out_row.iter_mut().enumerate() {
                    let center_col = col as i64 * self.s_w as i64;
                    *out = self.apply(center_row, center_col, half_h, half_w);
                }
            });
    }

    /// Accumulate one window in fixed `ki, kj` order with zero padding.
    #[inline]
    fn apply(&self, center_row: i64, center_col: i64, half_h: i64, half_w: i64) -> f32 {
        let mut sum = 0.0f32;
        for ki in 0..self.k_h as i64 {
            for kj in 0..self.k_w as i64 {
                let i = center_row + ki - half_h;
                let j = center_col + kj - half_w;

                let sample = if i >= 0
                    && i < self.tile_rows as i64
                    && j >= 0
                    && j < self.w as i64
                {
                    self.input[(i * self.w as i64 + j) as usize]
                } else {
                    0.0
                };

                sum += sample * self.kernel[(ki * self.k_w as i64 + kj) as usize];
            }
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{naive_reference, seeded_matrix};
    use crate::ConvSpec;

    fn eval_whole(spec: &ConvSpec, input: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; spec.out_h as usize * spec.out_w as usize];
        Window {
            input,
            kernel: &spec.kernel,
            tile_rows: spec.h,
            w: spec.w,
            k_h: spec.k_h,
            k_w: spec.k_w,
            s_h: spec.s_h,
            s_w: spec.s_w,
            out_w: spec.out_w,
            input_row_start: 0,
            output_row_start: 0,
        }
        .fill(&mut out);
        out
    }

    #[test]
    fn single_cell() {
        // 1x1 input, 1x1 kernel: O = I·K.
        let spec = ConvSpec::new(1, 1, 1, 1, 1, 1, vec![2.0].into()).unwrap();
        assert_eq!(eval_whole(&spec, &[3.0]), [6.0]);
    }

    #[test]
    fn centered_delta_kernel_is_identity() {
        let mut k = vec![0.0f32; 9];
        k[4] = 1.0;
        let spec = ConvSpec::new(3, 3, 3, 3, 1, 1, k.into()).unwrap();
        let input: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        assert_eq!(eval_whole(&spec, &input), input);
    }

    #[test]
    fn one_by_one_kernel_is_bitwise_identity() {
        let spec = ConvSpec::new(17, 13, 1, 1, 1, 1, vec![1.0].into()).unwrap();
        let input = seeded_matrix(17 * 13, 7);
        let out = eval_whole(&spec, &input);
        assert_eq!(
            bytemuck::cast_slice::<f32, u8>(&out),
            bytemuck::cast_slice::<f32, u8>(&input)
        );
    }

    #[test]
    fn strided_ones_over_ones() {
        // 4x4 ones, 3x3 ones kernel, stride 2: edge cells see fewer in-bounds
        // samples.
        let spec = ConvSpec::new(4, 4, 3, 3, 2, 2, vec![1.0; 9].into()).unwrap();
        let input = vec![1.0f32; 16];
        assert_eq!(eval_whole(&spec, &input), [4.0, 6.0, 6.0, 9.0]);
    }

    #[test]
    fn column_matrix_zero_pads_both_ends() {
        let spec = ConvSpec::new(5, 1, 3, 1, 1, 1, vec![1.0; 3].into()).unwrap();
        let input = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(eval_whole(&spec, &input), [3.0, 6.0, 9.0, 12.0, 9.0]);
    }

    #[test]
    fn corner_window_matches_zero_padded_sum() {
        // O[0,0] sums the window centered at (0,0) with negative coordinates
        // contributing zero.
        let spec = ConvSpec::new(6, 6, 3, 3, 1, 1, seeded_matrix(9, 3).into()).unwrap();
        let input = seeded_matrix(36, 4);
        let out = eval_whole(&spec, &input);

        let mut expect = 0.0f32;
        for ki in 0..3i64 {
            for kj in 0..3i64 {
                let (i, j) = (ki - 1, kj - 1);
                let sample = if i >= 0 && j >= 0 {
                    input[(i * 6 + j) as usize]
                } else {
                    0.0
                };
                expect += sample * spec.kernel[(ki * 3 + kj) as usize];
            }
        }
        assert_eq!(out[0], expect);
    }

    #[test]
    fn tile_offsets_reproduce_the_full_pass() {
        // Evaluate rows [4, 9) from a haloed tile and compare with the rows
        // of a whole-matrix pass.
        let spec =
            ConvSpec::new(20, 8, 5, 3, 1, 1, seeded_matrix(15, 9).into()).unwrap();
        let input = seeded_matrix(20 * 8, 10);
        let whole = eval_whole(&spec, &input);

        let (tile_start, tile_rows) =
            crate::geometry::input_rows_for_output_range(4, 9, 1, 5, 20);
        let tile = &input[tile_start as usize * 8..(tile_start + tile_rows) as usize * 8];
        let mut out = vec![0.0f32; 5 * spec.out_w as usize];
        Window {
            input: tile,
            kernel: &spec.kernel,
            tile_rows,
            w: spec.w,
            k_h: spec.k_h,
            k_w: spec.k_w,
            s_h: spec.s_h,
            s_w: spec.s_w,
            out_w: spec.out_w,
            input_row_start: tile_start,
            output_row_start: 4,
        }
        .fill(&mut out);

        assert_eq!(out, whole[4 * spec.out_w as usize..9 * spec.out_w as usize]);
    }

    #[test]
    fn matches_reference_on_seeded_matrix() {
        let spec =
            ConvSpec::new(33, 29, 5, 5, 2, 3, seeded_matrix(25, 1).into()).unwrap();
        let input = seeded_matrix(33 * 29, 2);
        assert_eq!(eval_whole(&spec, &input), naive_reference(&spec, &input));
    }
}
