//! Double-buffered streaming pipeline
//!
//! One pipeline per participant. It owns two input tiles and two output
//! tiles, and walks its chunk plan with a two-slot state machine that keeps
//! three activities in flight at once:
//!
//! - a pending **read** filling the next chunk's input tile,
//! - the **evaluator** running over the current chunk,
//! - a pending **write** draining the previous chunk's output tile.
//!
//! I/O requests are tickets: a spawned worker takes ownership of the tile,
//! performs one positional read or write, and hands the tile back when the
//! ticket is waited on. Tile ownership therefore moves through the
//! read → compute → write phases one holder at a time, which is what makes
//! the overlap safe without any locking on tile memory.
//!
//! Writes complete in output-row order up to the two-slot reorder; chunks
//! land on disjoint byte ranges, so the reorder is unobservable.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::info;

use crate::codec::CodecError;
use crate::plan::{Chunk, ChunkPlan, TileShape};
use crate::transport::RowIo;
use crate::window::Window;
use crate::ConvSpec;

/// Errors surfaced by a participant's pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A tile read or write failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A chunk needs a larger tile than was provisioned; a planner bug.
    #[error("{kind} tile too small ({needed} elements > {provided} provisioned)")]
    TileOverflow {
        /// Which tile kind overflowed.
        kind: &'static str,
        /// Elements the chunk needs.
        needed: usize,
        /// Elements the tile holds.
        provided: usize,
    },
    /// An I/O worker disappeared without reporting a result.
    #[error("i/o ticket worker panicked")]
    TicketLost,
}

/// Wall-time accounting for one pipeline run.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineStats {
    /// Chunks processed.
    pub chunks: u32,
    /// Seconds spent blocked on tile I/O (read waits plus write waits).
    pub io_secs: f64,
    /// Seconds spent inside the evaluator.
    pub conv_secs: f64,
}

/// An in-flight tile transfer. Waiting returns the tile to the caller.
struct IoTicket {
    handle: JoinHandle<(Vec<f32>, Result<(), CodecError>)>,
}

impl IoTicket {
    fn read(io: Arc<dyn RowIo>, row_start: u32, rows: u32, mut tile: Vec<f32>) -> Self {
        Self {
            handle: thread::spawn(move || {
                let res = io.read_rows(row_start, rows, &mut tile);
                (tile, res)
            }),
        }
    }

    fn write(io: Arc<dyn RowIo>, row_start: u32, rows: u32, tile: Vec<f32>) -> Self {
        Self {
            handle: thread::spawn(move || {
                let res = io.write_rows(row_start, rows, &tile);
                (tile, res)
            }),
        }
    }

    fn wait(self) -> Result<Vec<f32>, PipelineError> {
        let (tile, res) = self.handle.join().map_err(|_| PipelineError::TicketLost)?;
        res?;
        Ok(tile)
    }
}

/// Drive one participant's assigned output rows `[row_start, row_end)`
/// through the double-buffered loop.
pub fn run(
    spec: &ConvSpec,
    participant: usize,
    row_start: u32,
    row_end: u32,
    chunk_rows: u32,
    input: Arc<dyn RowIo>,
    output: Arc<dyn RowIo>,
) -> Result<PipelineStats, PipelineError> {
    let mut plan = ChunkPlan::new(spec, row_start, row_end, chunk_rows);
    let chunk_total = plan.total();
    let mut stats = PipelineStats::default();
    if chunk_total == 0 {
        return Ok(stats);
    }

    let shape = TileShape::worst_case(spec, chunk_rows);
    let mut input_tiles: [Option<Vec<f32>>; 2] = [
        Some(vec![0.0; shape.input_elems]),
        Some(vec![0.0; shape.input_elems]),
    ];
    let mut output_tiles: [Option<Vec<f32>>; 2] = [
        Some(vec![0.0; shape.output_elems]),
        Some(vec![0.0; shape.output_elems]),
    ];
    let mut read_pending: [Option<IoTicket>; 2] = [None, None];
    let mut write_pending: [Option<IoTicket>; 2] = [None, None];
    let mut staged: [Option<Chunk>; 2] = [None, None];

    let mut slot = 0usize;

    // Prologue: stage chunk 0 and start its read.
    if let Some(first) = plan.next() {
        check_tile(&first, spec, &shape)?;
        let tile = input_tiles[slot].take().expect("prologue input tile resident");
        read_pending[slot] = Some(IoTicket::read(
            Arc::clone(&input),
            first.input_row_start,
            first.num_input_rows,
            tile,
        ));
        staged[slot] = Some(first);
    }

    let mut completed = 0u32;
    while completed < chunk_total {
        let chunk_begin = Instant::now();

        // a. The current slot's input must be resident before compute.
        let ticket = read_pending[slot].take().expect("read ticket pending on slot");
        let in_tile = ticket.wait()?;
        let chunk = staged[slot].take().expect("chunk staged on slot");

        // b. Evaluate into this slot's output tile.
        let mut out_tile = output_tiles[slot].take().expect("output tile resident");
        let conv_begin = Instant::now();
        Window {
            input: &in_tile[..chunk.input_elems(spec)],
            kernel: &spec.kernel,
            tile_rows: chunk.num_input_rows,
            w: spec.w,
            k_h: spec.k_h,
            k_w: spec.k_w,
            s_h: spec.s_h,
            s_w: spec.s_w,
            out_w: spec.out_w,
            input_row_start: chunk.input_row_start,
            output_row_start: chunk.chunk_start,
        }
        .fill(&mut out_tile[..chunk.output_elems(spec)]);
        let conv_time = conv_begin.elapsed();

        input_tiles[slot] = Some(in_tile);

        // c. Start draining this chunk's output.
        write_pending[slot] = Some(IoTicket::write(
            Arc::clone(&output),
            chunk.chunk_start,
            chunk.chunk_out_h,
            out_tile,
        ));
        completed += 1;

        // d. Stage the next chunk into the other slot. Its previous write
        // must finish first: the write still owns that output tile.
        if let Some(next) = plan.next() {
            let other = slot ^ 1;
            if let Some(w) = write_pending[other].take() {
                output_tiles[other] = Some(w.wait()?);
            }
            check_tile(&next, spec, &shape)?;
            let tile = input_tiles[other].take().expect("prefetch input tile resident");
            read_pending[other] = Some(IoTicket::read(
                Arc::clone(&input),
                next.input_row_start,
                next.num_input_rows,
                tile,
            ));
            staged[other] = Some(next);
        }

        let chunk_time = chunk_begin.elapsed();
        let io_time = chunk_time.checked_sub(conv_time).unwrap_or(Duration::ZERO);
        stats.io_secs += io_time.as_secs_f64();
        stats.conv_secs += conv_time.as_secs_f64();

        let tile_mib = (chunk.num_input_rows as u64 * spec.w as u64
            + chunk.chunk_out_h as u64 * spec.out_w as u64) as f64
            * 4.0
            / (1024.0 * 1024.0);
        info!(
            "participant={} chunk={}/{} out_rows={}-{} in_rows={} tile_mib={:.1} time={:.4}s (io={:.4}s conv={:.4}s)",
            participant,
            completed,
            chunk_total,
            chunk.chunk_start,
            chunk.chunk_end,
            chunk.num_input_rows,
            tile_mib,
            chunk_time.as_secs_f64(),
            io_time.as_secs_f64(),
            conv_time.as_secs_f64(),
        );

        if completed < chunk_total {
            slot ^= 1;
        }
    }

    // Epilogue: drain every outstanding ticket before the files close.
    for pending in &mut write_pending {
        if let Some(ticket) = pending.take() {
            ticket.wait()?;
        }
    }
    for pending in &mut read_pending {
        if let Some(ticket) = pending.take() {
            ticket.wait()?;
        }
    }

    stats.chunks = completed;
    Ok(stats)
}

fn check_tile(chunk: &Chunk, spec: &ConvSpec, shape: &TileShape) -> Result<(), PipelineError> {
    let need_in = chunk.input_elems(spec);
    if need_in > shape.input_elems {
        return Err(PipelineError::TileOverflow {
            kind: "input",
            needed: need_in,
            provided: shape.input_elems,
        });
    }
    let need_out = chunk.output_elems(spec);
    if need_out > shape.output_elems {
        return Err(PipelineError::TileOverflow {
            kind: "output",
            needed: need_out,
            provided: shape.output_elems,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MatrixFile;
    use crate::testutil::{naive_reference, seeded_matrix};
    use crate::transport::{AccessHint, PositionalIo};

    fn run_once(
        spec: &ConvSpec,
        input: &[f32],
        chunk_rows: u32,
        dir: &std::path::Path,
        tag: &str,
    ) -> Vec<f32> {
        let in_path = dir.join(format!("in_{tag}.bin"));
        let out_path = dir.join(format!("out_{tag}.bin"));

        let m = MatrixFile::create(&in_path, spec.h, spec.w).unwrap();
        m.write_rows(0, spec.h, input).unwrap();
        drop(m);

        let src: Arc<dyn RowIo> = Arc::new(
            PositionalIo::open_read(&in_path, AccessHint::ReadOnceSequential).unwrap(),
        );
        let dst: Arc<dyn RowIo> = Arc::new(
            PositionalIo::create(
                &out_path,
                spec.out_h,
                spec.out_w,
                AccessHint::WriteOnceSequential,
            )
            .unwrap(),
        );

        let stats = run(spec, 0, 0, spec.out_h, chunk_rows, src, dst).unwrap();
        assert_eq!(stats.chunks, spec.out_h.div_ceil(chunk_rows));

        MatrixFile::open_read(&out_path).unwrap().read_all().unwrap()
    }

    #[test]
    fn matches_reference_for_assorted_chunk_heights() {
        let dir = tempfile::tempdir().unwrap();
        let spec =
            ConvSpec::new(47, 21, 5, 3, 2, 1, seeded_matrix(15, 5).into()).unwrap();
        let input = seeded_matrix(47 * 21, 6);
        let want = naive_reference(&spec, &input);

        // Chunk height must not change a single bit of the output.
        for (tag, chunk_rows) in [("a", 1u32), ("b", 3), ("c", 7), ("d", 100)] {
            let got = run_once(&spec, &input, chunk_rows, dir.path(), tag);
            assert_eq!(got, want, "chunk_rows={chunk_rows}");
        }
    }

    #[test]
    fn single_row_chunks_under_starved_budget() {
        // chunk_rows = 1 is the floor the budget broker can hand out; the
        // pipeline must still produce the reference output.
        let dir = tempfile::tempdir().unwrap();
        let spec =
            ConvSpec::new(12, 9, 3, 3, 1, 1, seeded_matrix(9, 8).into()).unwrap();
        let input = seeded_matrix(12 * 9, 9);
        let got = run_once(&spec, &input, 1, dir.path(), "starved");
        assert_eq!(got, naive_reference(&spec, &input));
    }

    #[test]
    fn empty_row_range_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ConvSpec::new(8, 8, 1, 1, 1, 1, vec![1.0].into()).unwrap();
        let in_path = dir.path().join("in.bin");
        let out_path = dir.path().join("out.bin");
        let m = MatrixFile::create(&in_path, 8, 8).unwrap();
        m.write_rows(0, 8, &vec![0.0; 64]).unwrap();
        drop(m);

        let src: Arc<dyn RowIo> = Arc::new(
            PositionalIo::open_read(&in_path, AccessHint::ReadOnceSequential).unwrap(),
        );
        let dst: Arc<dyn RowIo> = Arc::new(
            PositionalIo::create(&out_path, 8, 8, AccessHint::WriteOnceSequential)
                .unwrap(),
        );
        let stats = run(&spec, 3, 5, 5, 4, src, dst).unwrap();
        assert_eq!(stats.chunks, 0);
    }
}
