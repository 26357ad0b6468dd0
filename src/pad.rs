//! Zero-border padding of binary matrix files
//!
//! Frames an `H×W` matrix file inside an `(H+pad)×(W+pad)` file whose border
//! is zero, streaming one padded row at a time. The border extents can be
//! derived from a kernel shape: the rows/columns a centered window reaches
//! beyond the matrix edge.

use std::path::Path;

use crate::codec::{CodecError, MatrixFile};

/// Zero-border extents on each side of a matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MatrixPadding {
    /// Rows added above.
    pub rows_before: u16,
    /// Rows added below.
    pub rows_after: u16,
    /// Columns added on the left.
    pub cols_before: u16,
    /// Columns added on the right.
    pub cols_after: u16,
}

impl MatrixPadding {
    /// The border a centered `k_h×k_w` window reaches past the matrix edge.
    pub fn for_kernel(k_h: u32, k_w: u32) -> Self {
        if k_h == 0 || k_w == 0 {
            return Self::default();
        }
        Self {
            rows_before: ((k_h - 1) / 2) as u16,
            rows_after: (k_h / 2) as u16,
            cols_before: ((k_w - 1) / 2) as u16,
            cols_after: (k_w / 2) as u16,
        }
    }

    /// Padded dimensions of an `h×w` matrix.
    pub fn padded_dims(&self, h: u32, w: u32) -> (u32, u32) {
        (
            h + self.rows_before as u32 + self.rows_after as u32,
            w + self.cols_before as u32 + self.cols_after as u32,
        )
    }
}

/// Write `dst` as `src` framed by `padding` zeros.
pub fn apply_padding(
    src: &Path,
    dst: &Path,
    padding: &MatrixPadding,
) -> Result<(), CodecError> {
    let input = MatrixFile::open_read(src)?;
    let (h, w) = (input.height(), input.width());
    let (padded_h, padded_w) = padding.padded_dims(h, w);

    // The created file is zero-filled, so only the payload rows need writing;
    // the border rows above and below are already correct.
    let output = MatrixFile::create(dst, padded_h, padded_w)?;

    let mut row_buf = vec![0.0f32; w as usize];
    let mut padded_row = vec![0.0f32; padded_w as usize];
    let col_start = padding.cols_before as usize;

    for row in 0..h {
        input.read_rows(row, 1, &mut row_buf)?;
        padded_row[col_start..col_start + w as usize].copy_from_slice(&row_buf);
        output.write_rows(padding.rows_before as u32 + row, 1, &padded_row)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_derived_padding() {
        assert_eq!(
            MatrixPadding::for_kernel(3, 3),
            MatrixPadding { rows_before: 1, rows_after: 1, cols_before: 1, cols_after: 1 }
        );
        // Even extents put the larger half after, matching the window's
        // asymmetric reach.
        assert_eq!(
            MatrixPadding::for_kernel(4, 2),
            MatrixPadding { rows_before: 1, rows_after: 2, cols_before: 0, cols_after: 1 }
        );
        assert_eq!(MatrixPadding::for_kernel(1, 1), MatrixPadding::default());
    }

    #[test]
    fn frames_payload_in_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");

        let m = MatrixFile::create(&src, 2, 2).unwrap();
        m.write_rows(0, 2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        drop(m);

        apply_padding(&src, &dst, &MatrixPadding::for_kernel(3, 3)).unwrap();

        let padded = MatrixFile::open_read(&dst).unwrap();
        assert_eq!((padded.height(), padded.width()), (4, 4));
        #[rustfmt::skip]
        assert_eq!(
            padded.read_all().unwrap(),
            [
                0.0, 0.0, 0.0, 0.0,
                0.0, 1.0, 2.0, 0.0,
                0.0, 3.0, 4.0, 0.0,
                0.0, 0.0, 0.0, 0.0,
            ]
        );
    }

    #[test]
    fn zero_padding_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");

        let m = MatrixFile::create(&src, 3, 2).unwrap();
        m.write_rows(0, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        drop(m);

        apply_padding(&src, &dst, &MatrixPadding::default()).unwrap();
        assert_eq!(std::fs::read(&src).unwrap(), std::fs::read(&dst).unwrap());
    }
}
