//! The row-span file I/O capability
//!
//! The pipeline needs exactly one thing from the outside world: disjoint
//! random-access reads and writes of contiguous row spans on a shared matrix
//! file. [`RowIo`] captures that capability; the coordinator picks between
//! two implementations at runtime:
//!
//! - [`PositionalIo`] — each participant opens its own descriptor on the
//!   path. The single-process case; no coordination needed.
//! - [`CollectiveIo`] — the group opens the file **once** and every
//!   participant receives a clone of the same shared handle, mirroring a
//!   collective open on a communicator. Disjoint byte ranges keep the shared
//!   descriptor safe without locking.
//!
//! Opens carry an [`AccessHint`]. The standard library file layer has no
//! channel for them, so they are advertised to the trace log only; a
//! transport with real hint support would forward them.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::codec::{CodecError, MatrixFile};

/// Advisory access pattern for an open, in the spirit of collective-I/O
/// `access_style` hints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessHint {
    /// The file will be read once, front to back.
    ReadOnceSequential,
    /// Every byte will be written exactly once, front to back.
    WriteOnceSequential,
}

impl AccessHint {
    fn as_str(self) -> &'static str {
        match self {
            AccessHint::ReadOnceSequential => "read_once,sequential",
            AccessHint::WriteOnceSequential => "write_once,sequential",
        }
    }
}

/// Disjoint random-access row-span I/O on one matrix file.
pub trait RowIo: Send + Sync {
    /// Matrix height of the underlying file.
    fn height(&self) -> u32;
    /// Matrix width of the underlying file.
    fn width(&self) -> u32;
    /// Read `row_count` rows starting at `row_start` into `out`.
    fn read_rows(&self, row_start: u32, row_count: u32, out: &mut [f32])
        -> Result<(), CodecError>;
    /// Write `row_count` rows starting at `row_start` from `data`.
    fn write_rows(&self, row_start: u32, row_count: u32, data: &[f32])
        -> Result<(), CodecError>;
}

/// Per-participant positional I/O: the participant owns its descriptor.
#[derive(Debug)]
pub struct PositionalIo {
    inner: MatrixFile,
}

impl PositionalIo {
    /// Open an existing matrix for reading.
    pub fn open_read(path: &Path, hint: AccessHint) -> Result<Self, CodecError> {
        debug!(path = %path.display(), hint = hint.as_str(), "positional open");
        Ok(Self { inner: MatrixFile::open_read(path)? })
    }

    /// Create a matrix for writing. With a single participant there is no
    /// header protocol to honor, so the header is written immediately.
    pub fn create(
        path: &Path,
        h: u32,
        w: u32,
        hint: AccessHint,
    ) -> Result<Self, CodecError> {
        debug!(path = %path.display(), hint = hint.as_str(), "positional create");
        Ok(Self { inner: MatrixFile::create(path, h, w)? })
    }
}

impl RowIo for PositionalIo {
    fn height(&self) -> u32 {
        self.inner.height()
    }
    fn width(&self) -> u32 {
        self.inner.width()
    }
    fn read_rows(
        &self,
        row_start: u32,
        row_count: u32,
        out: &mut [f32],
    ) -> Result<(), CodecError> {
        self.inner.read_rows(row_start, row_count, out)
    }
    fn write_rows(
        &self,
        row_start: u32,
        row_count: u32,
        data: &[f32],
    ) -> Result<(), CodecError> {
        self.inner.write_rows(row_start, row_count, data)
    }
}

/// Group-shared I/O: one descriptor opened collectively, cloned to every
/// participant.
#[derive(Clone, Debug)]
pub struct CollectiveIo {
    inner: Arc<MatrixFile>,
}

impl CollectiveIo {
    /// Collectively open an existing matrix read-only. Returns one handle per
    /// participant, all backed by the same descriptor.
    pub fn open_read_group(
        path: &Path,
        hint: AccessHint,
        participants: usize,
    ) -> Result<Vec<Self>, CodecError> {
        debug!(
            path = %path.display(),
            hint = hint.as_str(),
            participants,
            "collective open"
        );
        let shared = Arc::new(MatrixFile::open_read(path)?);
        Ok((0..participants).map(|_| Self { inner: Arc::clone(&shared) }).collect())
    }

    /// Collectively create the output matrix, **without** writing its header:
    /// publishing the header is participant 0's job, after the open and
    /// before any payload write.
    pub fn create_group(
        path: &Path,
        h: u32,
        w: u32,
        hint: AccessHint,
        participants: usize,
    ) -> Result<Vec<Self>, CodecError> {
        debug!(
            path = %path.display(),
            hint = hint.as_str(),
            participants,
            "collective create"
        );
        let shared = Arc::new(MatrixFile::preallocate(path, h, w)?);
        Ok((0..participants).map(|_| Self { inner: Arc::clone(&shared) }).collect())
    }

    /// Publish the header. Call on exactly one participant.
    pub fn write_header(&self) -> Result<(), CodecError> {
        self.inner.write_header()
    }
}

impl RowIo for CollectiveIo {
    fn height(&self) -> u32 {
        self.inner.height()
    }
    fn width(&self) -> u32 {
        self.inner.width()
    }
    fn read_rows(
        &self,
        row_start: u32,
        row_count: u32,
        out: &mut [f32],
    ) -> Result<(), CodecError> {
        self.inner.read_rows(row_start, row_count, out)
    }
    fn write_rows(
        &self,
        row_start: u32,
        row_count: u32,
        data: &[f32],
    ) -> Result<(), CodecError> {
        self.inner.write_rows(row_start, row_count, data)
    }
}
