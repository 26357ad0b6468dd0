//! Participant coordinator
//!
//! Splits `out_H` across a group of participants and drives one pipeline per
//! participant. Participants interact only through:
//!
//! - the shared, immutable [`ConvSpec`] (the spec/kernel broadcast),
//! - the collectively opened input and output handles,
//! - the group barriers,
//! - disjoint writes to the output file.
//!
//! The phase protocol mirrors a collective-I/O run: barrier 0 once every
//! participant holds the spec, a single header write by participant 0,
//! barrier 1 before any payload write, pipelines, then a final join before
//! the files close. Participants whose row range is empty skip the chunk
//! work but still take part in every collective step.
//!
//! The first participant error aborts the run; there are no retries.

use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use tracing::info;

use crate::budget::BudgetBroker;
use crate::codec::CodecError;
use crate::pipeline::{self, PipelineError, PipelineStats};
use crate::transport::{AccessHint, CollectiveIo, PositionalIo, RowIo};
use crate::ConvSpec;

/// One member of the group and its assigned output rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Participant {
    /// Identity index, `0 ≤ index < count`.
    pub index: usize,
    /// Group size.
    pub count: usize,
    /// First assigned output row (inclusive).
    pub row_start: u32,
    /// Last assigned output row (exclusive).
    pub row_end: u32,
}

impl Participant {
    /// Assign output rows by even ⌈out_H / count⌉ blocks. Trailing
    /// participants may receive an empty range.
    pub fn assign(index: usize, count: usize, out_h: u32) -> Self {
        let count = count.max(1);
        let rows_per = out_h.div_ceil(count as u32);
        let row_start = (index as u64 * rows_per as u64).min(out_h as u64) as u32;
        let row_end = ((index as u64 + 1) * rows_per as u64).min(out_h as u64) as u32;
        Self { index, count, row_start, row_end }
    }

    /// Output rows this participant owns.
    #[inline]
    pub fn row_count(&self) -> u32 {
        self.row_end - self.row_start
    }
}

/// Errors surfaced by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    /// Opening or creating a shared file failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The input file does not match the spec's dimensions.
    #[error("input file is {found_h}x{found_w}, expected {want_h}x{want_w}")]
    InputShape {
        /// Height read from the file.
        found_h: u32,
        /// Width read from the file.
        found_w: u32,
        /// Height the spec demands.
        want_h: u32,
        /// Width the spec demands.
        want_w: u32,
    },
    /// A participant's pipeline failed.
    #[error("participant {index}: {source}")]
    Participant {
        /// Which participant faulted.
        index: usize,
        /// The underlying pipeline failure.
        #[source]
        source: PipelineError,
    },
    /// A participant crashed without reporting an error.
    #[error("participant {index} panicked")]
    ParticipantPanic {
        /// Which participant crashed.
        index: usize,
    },
}

/// Aggregate accounting for one group run.
#[derive(Clone, Copy, Debug)]
pub struct RunSummary {
    /// Group size.
    pub participants: usize,
    /// Chunk height every participant used.
    pub chunk_rows: u32,
    /// Chunks processed across the group.
    pub chunks: u32,
    /// Group-wide seconds blocked on tile I/O.
    pub io_secs: f64,
    /// Group-wide seconds inside the evaluator.
    pub conv_secs: f64,
    /// Wall time of the whole run.
    pub total_secs: f64,
}

/// Run the convolution `spec` over `input_path` into `output_path` with a
/// group of `participants`, bounded by `budget_bytes` of tile memory.
pub fn run_group(
    spec: &ConvSpec,
    participants: usize,
    input_path: &Path,
    output_path: &Path,
    budget_bytes: u64,
) -> Result<RunSummary, GroupError> {
    let participants = participants.max(1);
    let broker = BudgetBroker::new(budget_bytes);
    // A generous budget on a small output would otherwise provision tiles
    // far beyond what any chunk can use.
    let chunk_rows = broker.chunk_rows(spec, participants).min(spec.out_h).max(1);

    info!(
        "participants={} mem_total={:.3}GB mem_per_participant={:.3}GB chunk_rows={} out_size={}x{}",
        participants,
        broker.global_bytes() as f64 / 1e9,
        broker.per_participant(participants) as f64 / 1e9,
        chunk_rows,
        spec.out_h,
        spec.out_w,
    );

    // Collective open: one descriptor per file, shared by the whole group.
    // A lone participant opens positionally instead; its create publishes
    // the header immediately, so the header step below becomes a no-op.
    let mut header_writer: Option<CollectiveIo> = None;
    let (inputs, outputs): (Vec<Arc<dyn RowIo>>, Vec<Arc<dyn RowIo>>) =
        if participants == 1 {
            let input: Arc<dyn RowIo> = Arc::new(PositionalIo::open_read(
                input_path,
                AccessHint::ReadOnceSequential,
            )?);
            check_shape(spec, input.as_ref())?;
            let output: Arc<dyn RowIo> = Arc::new(PositionalIo::create(
                output_path,
                spec.out_h,
                spec.out_w,
                AccessHint::WriteOnceSequential,
            )?);
            (vec![input], vec![output])
        } else {
            let ins = CollectiveIo::open_read_group(
                input_path,
                AccessHint::ReadOnceSequential,
                participants,
            )?;
            check_shape(spec, &ins[0])?;
            let outs = CollectiveIo::create_group(
                output_path,
                spec.out_h,
                spec.out_w,
                AccessHint::WriteOnceSequential,
                participants,
            )?;
            header_writer = Some(outs[0].clone());
            (
                ins.into_iter().map(|io| Arc::new(io) as Arc<dyn RowIo>).collect(),
                outs.into_iter().map(|io| Arc::new(io) as Arc<dyn RowIo>).collect(),
            )
        };

    let barrier = Arc::new(Barrier::new(participants));
    let begin = Instant::now();

    let mut joined: Vec<(usize, thread::Result<Result<PipelineStats, PipelineError>>)> =
        Vec::with_capacity(participants);

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(participants);
        let mut inputs = inputs;
        let mut outputs = outputs;

        for index in (0..participants).rev() {
            let part = Participant::assign(index, participants, spec.out_h);
            let input = inputs.pop().expect("one input handle per participant");
            let output = outputs.pop().expect("one output handle per participant");
            let header = if index == 0 { header_writer.take() } else { None };
            let barrier = Arc::clone(&barrier);
            let spec = spec.clone();

            handles.push((
                index,
                scope.spawn(move || -> Result<PipelineStats, PipelineError> {
                    // Barrier 0: every participant holds the same spec and
                    // kernel before any file byte moves.
                    barrier.wait();

                    let header_result = match header {
                        Some(h) => h.write_header().map_err(PipelineError::from),
                        None => Ok(()),
                    };

                    // Barrier 1: the header precedes every payload write.
                    // Reached even on a failed header write so no participant
                    // is left waiting; the error surfaces right after.
                    barrier.wait();
                    header_result?;

                    info!(
                        "participant={} rows={}-{} chunks={}",
                        part.index,
                        part.row_start,
                        part.row_end,
                        part.row_count().div_ceil(chunk_rows),
                    );

                    pipeline::run(
                        &spec,
                        part.index,
                        part.row_start,
                        part.row_end,
                        chunk_rows,
                        input,
                        output,
                    )
                    // The scope join below is the final barrier: every
                    // pipeline has finished before any handle drops and the
                    // files close.
                }),
            ));
        }

        for (index, handle) in handles.into_iter().rev() {
            joined.push((index, handle.join()));
        }
    });

    let mut summary = RunSummary {
        participants,
        chunk_rows,
        chunks: 0,
        io_secs: 0.0,
        conv_secs: 0.0,
        total_secs: 0.0,
    };
    for (index, result) in joined {
        match result {
            Ok(Ok(stats)) => {
                summary.chunks += stats.chunks;
                summary.io_secs += stats.io_secs;
                summary.conv_secs += stats.conv_secs;
            }
            Ok(Err(source)) => return Err(GroupError::Participant { index, source }),
            Err(_) => return Err(GroupError::ParticipantPanic { index }),
        }
    }
    summary.total_secs = begin.elapsed().as_secs_f64();

    info!(
        "participants={} chunk_rows={} chunks={} total={:.3}s io={:.3}s conv={:.3}s",
        summary.participants,
        summary.chunk_rows,
        summary.chunks,
        summary.total_secs,
        summary.io_secs,
        summary.conv_secs,
    );
    Ok(summary)
}

fn check_shape(spec: &ConvSpec, input: &dyn RowIo) -> Result<(), GroupError> {
    if input.height() != spec.h || input.width() != spec.w {
        return Err(GroupError::InputShape {
            found_h: input.height(),
            found_w: input.width(),
            want_h: spec.h,
            want_w: spec.w,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MatrixFile, HEADER_BYTES};
    use crate::plan::ChunkPlan;
    use crate::testutil::{naive_reference, seeded_matrix};

    #[test]
    fn assignment_partitions_exactly() {
        for (out_h, count) in [(100u32, 1usize), (100, 3), (7, 4), (2, 8), (1, 1)] {
            let parts: Vec<Participant> =
                (0..count).map(|i| Participant::assign(i, count, out_h)).collect();
            // Disjoint, ordered, covering [0, out_h).
            let mut expect = 0;
            for p in &parts {
                assert_eq!(p.row_start, expect.min(out_h));
                assert!(p.row_end >= p.row_start);
                expect = p.row_end.max(expect);
            }
            assert_eq!(parts.last().unwrap().row_end, out_h);
            let total: u32 = parts.iter().map(|p| p.row_count()).sum();
            assert_eq!(total, out_h);
        }
    }

    #[test]
    fn output_byte_ranges_are_disjoint_and_exhaustive() {
        // Every (participant, chunk) write span, collected over the whole
        // group, must tile [8, 8 + 4·out_H·out_W) exactly.
        let spec =
            ConvSpec::new(53, 17, 3, 3, 2, 1, seeded_matrix(9, 1).into()).unwrap();
        for count in [1usize, 2, 4, 8] {
            let mut spans: Vec<(u64, u64)> = Vec::new();
            for i in 0..count {
                let p = Participant::assign(i, count, spec.out_h);
                for chunk in ChunkPlan::new(&spec, p.row_start, p.row_end, 3) {
                    let len = chunk.output_elems(&spec) as u64 * 4;
                    spans.push((chunk.output_offset, len));
                }
            }
            spans.sort_unstable();
            let mut cursor = HEADER_BYTES;
            for (offset, len) in spans {
                assert_eq!(offset, cursor, "gap or overlap at byte {cursor}");
                cursor = offset + len;
            }
            assert_eq!(
                cursor,
                HEADER_BYTES + spec.out_h as u64 * spec.out_w as u64 * 4
            );
        }
    }

    fn write_input(path: &Path, spec: &ConvSpec, data: &[f32]) {
        let m = MatrixFile::create(path, spec.h, spec.w).unwrap();
        m.write_rows(0, spec.h, data).unwrap();
    }

    #[test]
    fn group_size_does_not_change_output_bits() {
        let dir = tempfile::tempdir().unwrap();
        let spec =
            ConvSpec::new(64, 48, 5, 5, 1, 1, seeded_matrix(25, 21).into()).unwrap();
        let input = seeded_matrix(64 * 48, 22);
        let in_path = dir.path().join("in.bin");
        write_input(&in_path, &spec, &input);
        let want = naive_reference(&spec, &input);

        for count in [1usize, 2, 4, 8] {
            let out_path = dir.path().join(format!("out_{count}.bin"));
            let summary =
                run_group(&spec, count, &in_path, &out_path, 256 << 20).unwrap();
            assert_eq!(summary.participants, count);

            let out = MatrixFile::open_read(&out_path).unwrap();
            assert_eq!((out.height(), out.width()), (spec.out_h, spec.out_w));
            assert_eq!(out.read_all().unwrap(), want, "participants={count}");
        }
    }

    #[test]
    fn budget_regimes_do_not_change_output_bits() {
        let dir = tempfile::tempdir().unwrap();
        let spec =
            ConvSpec::new(40, 32, 3, 3, 2, 2, seeded_matrix(9, 31).into()).unwrap();
        let input = seeded_matrix(40 * 32, 32);
        let in_path = dir.path().join("in.bin");
        write_input(&in_path, &spec, &input);
        let want = naive_reference(&spec, &input);

        // Spanning well over 10x in budget forces several chunk_rows
        // regimes, including the single-row floor.
        for (tag, budget) in [("tight", 64u64), ("low", 3400), ("high", 64 << 20)] {
            let out_path = dir.path().join(format!("out_{tag}.bin"));
            let summary = run_group(&spec, 2, &in_path, &out_path, budget).unwrap();
            if budget == 64 {
                assert_eq!(summary.chunk_rows, 1);
            }
            let out = MatrixFile::open_read(&out_path).unwrap();
            assert_eq!(out.read_all().unwrap(), want, "budget={budget}");
        }
    }

    #[test]
    fn oversubscribed_group_tolerates_idle_participants() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ConvSpec::new(3, 3, 1, 1, 1, 1, vec![1.0].into()).unwrap();
        let input: Vec<f32> = (0..9).map(|v| v as f32).collect();
        let in_path = dir.path().join("in.bin");
        write_input(&in_path, &spec, &input);

        // 8 participants, 3 output rows: five members are idle.
        let out_path = dir.path().join("out.bin");
        run_group(&spec, 8, &in_path, &out_path, 1 << 20).unwrap();
        let out = MatrixFile::open_read(&out_path).unwrap();
        assert_eq!(out.read_all().unwrap(), input);
    }

    #[test]
    fn rejects_mismatched_input_shape() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ConvSpec::new(4, 4, 1, 1, 1, 1, vec![1.0].into()).unwrap();
        let in_path = dir.path().join("in.bin");
        let m = MatrixFile::create(&in_path, 5, 4).unwrap();
        m.write_rows(0, 5, &vec![0.0; 20]).unwrap();
        drop(m);

        let out_path = dir.path().join("out.bin");
        assert!(matches!(
            run_group(&spec, 2, &in_path, &out_path, 1 << 20),
            Err(GroupError::InputShape { found_h: 5, .. })
        ));
    }
}
