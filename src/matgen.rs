//! Seeded random matrix generation
//!
//! Fills a binary matrix file (or an in-memory kernel) with uniform values
//! drawn from `{0.00, 0.01, …, 1.00}`. Generation is chunked so arbitrarily
//! large matrices stream through a fixed-size buffer, and fully deterministic
//! for a given seed.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec::{CodecError, MatrixFile};

/// Elements generated per write.
const CHUNK_ELEMS: usize = 10_000;

/// Create `path` as an `h×w` matrix of seeded random values.
pub fn generate_matrix_file(
    path: &Path,
    h: u32,
    w: u32,
    seed: u64,
) -> Result<(), CodecError> {
    let file = MatrixFile::create(path, h, w)?;
    let mut rng = StdRng::seed_from_u64(seed);

    let row_elems = w as usize;
    let rows_per_chunk = (CHUNK_ELEMS / row_elems).max(1) as u32;
    let mut buf = vec![0.0f32; rows_per_chunk as usize * row_elems];

    let mut row = 0u32;
    while row < h {
        let rows = rows_per_chunk.min(h - row);
        let elems = rows as usize * row_elems;
        for v in &mut buf[..elems] {
            *v = rng.gen_range(0..=100) as f32 / 100.0;
        }
        file.write_rows(row, rows, &buf)?;
        row += rows;
    }
    Ok(())
}

/// Generate a `k_h×k_w` kernel in memory from a seed.
pub fn generate_kernel(k_h: u32, k_w: u32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..k_h as usize * k_w as usize)
        .map(|_| rng.gen_range(0..=100) as f32 / 100.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_a_seed() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        generate_matrix_file(&a, 13, 7, 42).unwrap();
        generate_matrix_file(&b, 13, 7, 42).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());

        let c = dir.path().join("c.bin");
        generate_matrix_file(&c, 13, 7, 43).unwrap();
        assert_ne!(std::fs::read(&a).unwrap(), std::fs::read(&c).unwrap());
    }

    #[test]
    fn values_are_quantized_unit_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        generate_matrix_file(&path, 20, 30, 7).unwrap();
        let m = MatrixFile::open_read(&path).unwrap();
        for v in m.read_all().unwrap() {
            assert!((0.0..=1.0).contains(&v));
            let scaled = v * 100.0;
            assert_eq!(scaled, scaled.round());
        }
    }

    #[test]
    fn kernel_generation_matches_shape() {
        let k = generate_kernel(3, 5, 2025);
        assert_eq!(k.len(), 15);
        assert_eq!(k, generate_kernel(3, 5, 2025));
    }
}
