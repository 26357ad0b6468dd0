//! Binary matrix file codec
//!
//! The canonical on-disk format is a fixed 8-byte header — `H` then `W`, both
//! little-endian `u32` — followed by `H·W` row-major IEEE-754 32-bit floats.
//! All payload access is **positional** (`pread`/`pwrite` style), so one
//! handle tolerates concurrent reads and writes on disjoint row spans without
//! any locking or cursor discipline.
//!
//! Payload bytes are viewed through `bytemuck` casts between `[f32]` and
//! `[u8]`; the format is little-endian on disk, matching the native layout of
//! every target this engine runs on.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Size of the `{H, W}` header preceding the payload.
pub const HEADER_BYTES: u64 = 8;

/// Byte offset of the first element of `row` in a matrix of width `w`.
#[inline]
pub fn row_offset(w: u32, row: u32) -> u64 {
    HEADER_BYTES + row as u64 * w as u64 * 4
}

/// Errors surfaced by the codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Opening an existing matrix file failed.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Creating a matrix file failed.
    #[error("failed to create {path}: {source}")]
    Create {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The header is unreadable or describes an empty matrix.
    #[error("{path}: invalid matrix header ({reason})")]
    Header {
        /// Offending path.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },
    /// The file is shorter than the payload its header advertises.
    #[error("{path}: payload truncated (need {expected} bytes, file has {actual})")]
    Truncated {
        /// Offending path.
        path: PathBuf,
        /// Bytes the header requires.
        expected: u64,
        /// Bytes actually present.
        actual: u64,
    },
    /// A positional read or write failed mid-run.
    #[error("{op} failed: {source}")]
    Io {
        /// Which operation faulted.
        op: &'static str,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// An open binary matrix file: dimensions plus a positional handle.
#[derive(Debug)]
pub struct MatrixFile {
    file: File,
    h: u32,
    w: u32,
}

impl MatrixFile {
    /// Open an existing matrix read-only, validating its header and length.
    pub fn open_read(path: &Path) -> Result<Self, CodecError> {
        let file = File::open(path).map_err(|source| CodecError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mut header = [0u8; HEADER_BYTES as usize];
        file.read_exact_at(&mut header, 0).map_err(|e| CodecError::Header {
            path: path.to_path_buf(),
            reason: format!("short read: {e}"),
        })?;
        let h = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let w = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if h == 0 || w == 0 {
            return Err(CodecError::Header {
                path: path.to_path_buf(),
                reason: format!("empty matrix {h}x{w}"),
            });
        }

        let expected = HEADER_BYTES + h as u64 * w as u64 * 4;
        let actual = file
            .metadata()
            .map_err(|source| CodecError::Open { path: path.to_path_buf(), source })?
            .len();
        if actual < expected {
            return Err(CodecError::Truncated {
                path: path.to_path_buf(),
                expected,
                actual,
            });
        }

        Ok(Self { file, h, w })
    }

    /// Create an `h×w` matrix file: write the header and size the payload
    /// region (zero-filled) so later row writes land inside the file.
    pub fn create(path: &Path, h: u32, w: u32) -> Result<Self, CodecError> {
        let this = Self::preallocate(path, h, w)?;
        this.write_header()?;
        Ok(this)
    }

    /// Create and size an `h×w` matrix file but **defer the header write**.
    ///
    /// Used by the group layer, where exactly one participant publishes the
    /// header (via [`MatrixFile::write_header`]) after the collective open and
    /// before any payload write.
    pub fn preallocate(path: &Path, h: u32, w: u32) -> Result<Self, CodecError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| CodecError::Create {
                path: path.to_path_buf(),
                source,
            })?;
        let total = HEADER_BYTES + h as u64 * w as u64 * 4;
        file.set_len(total).map_err(|source| CodecError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { file, h, w })
    }

    /// Publish the `{H, W}` header at offset 0.
    pub fn write_header(&self) -> Result<(), CodecError> {
        let mut header = [0u8; HEADER_BYTES as usize];
        header[0..4].copy_from_slice(&self.h.to_le_bytes());
        header[4..8].copy_from_slice(&self.w.to_le_bytes());
        self.file
            .write_all_at(&header, 0)
            .map_err(|source| CodecError::Io { op: "header write", source })
    }

    /// Matrix height.
    #[inline]
    pub fn height(&self) -> u32 {
        self.h
    }

    /// Matrix width.
    #[inline]
    pub fn width(&self) -> u32 {
        self.w
    }

    /// Read `row_count` whole rows starting at `row_start` into `out`.
    ///
    /// `out` must hold at least `row_count · W` elements; only that prefix is
    /// filled. Safe to call concurrently on disjoint row spans.
    pub fn read_rows(
        &self,
        row_start: u32,
        row_count: u32,
        out: &mut [f32],
    ) -> Result<(), CodecError> {
        let elems = row_count as usize * self.w as usize;
        debug_assert!(out.len() >= elems, "read buffer undersized");
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut out[..elems]);
        self.file
            .read_exact_at(bytes, row_offset(self.w, row_start))
            .map_err(|source| CodecError::Io { op: "row read", source })
    }

    /// Write `row_count` whole rows starting at `row_start` from `data`.
    ///
    /// Safe to call concurrently on disjoint row spans.
    pub fn write_rows(
        &self,
        row_start: u32,
        row_count: u32,
        data: &[f32],
    ) -> Result<(), CodecError> {
        let elems = row_count as usize * self.w as usize;
        debug_assert!(data.len() >= elems, "write buffer undersized");
        let bytes: &[u8] = bytemuck::cast_slice(&data[..elems]);
        self.file
            .write_all_at(bytes, row_offset(self.w, row_start))
            .map_err(|source| CodecError::Io { op: "row write", source })
    }

    /// Read the whole payload into a fresh vector. Intended for kernels and
    /// other small matrices; the streaming paths never call this.
    pub fn read_all(&self) -> Result<Vec<f32>, CodecError> {
        let mut out = vec![0.0f32; self.h as usize * self.w as usize];
        self.read_rows(0, self.h, &mut out)?;
        Ok(out)
    }
}
