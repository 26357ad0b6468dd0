//! Text ↔ binary matrix conversion
//!
//! The text format is one header line `H W` followed by `H` rows of `W`
//! whitespace-separated decimal floats. Values are printed with three
//! fractional digits on the way out, so a binary→text→binary round trip is
//! exact up to that printed precision.
//!
//! Both directions stream: rows are buffered in chunks of roughly
//! [`DEFAULT_CHUNK_ELEMS`] elements, never the whole matrix.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::codec::{CodecError, MatrixFile};

/// Default element count per conversion chunk.
pub const DEFAULT_CHUNK_ELEMS: usize = 8192;

/// Errors surfaced by the text converter.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// Opening or creating a text file failed.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The `H W` header line is missing or malformed.
    #[error("{path}: invalid dimension header ({reason})")]
    Header {
        /// Offending path.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },
    /// A payload value failed to parse.
    #[error("{path}: row {row}: {reason}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Zero-based matrix row.
        row: u32,
        /// What was wrong with it.
        reason: String,
    },
    /// A row held fewer values than the header advertised.
    #[error("{path}: row {row} holds {found} values, expected {expected}")]
    RowWidth {
        /// Offending path.
        path: PathBuf,
        /// Zero-based matrix row.
        row: u32,
        /// Advertised width.
        expected: u32,
        /// Values actually present.
        found: u32,
    },
    /// The file ended before `H` rows were read.
    #[error("{path}: expected {expected} rows, found {found}")]
    MissingRows {
        /// Offending path.
        path: PathBuf,
        /// Advertised height.
        expected: u32,
        /// Rows actually present.
        found: u32,
    },
    /// A raw read or write failed.
    #[error("{op} failed: {source}")]
    Io {
        /// Which operation faulted.
        op: &'static str,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The binary side faulted.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

fn parse_header(path: &Path, line: &str) -> Result<(u32, u32), TextError> {
    let mut it = line.split_whitespace();
    let h = it
        .next()
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or_else(|| TextError::Header {
            path: path.to_path_buf(),
            reason: format!("bad height in {line:?}"),
        })?;
    let w = it
        .next()
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or_else(|| TextError::Header {
            path: path.to_path_buf(),
            reason: format!("bad width in {line:?}"),
        })?;
    if h == 0 || w == 0 {
        return Err(TextError::Header {
            path: path.to_path_buf(),
            reason: format!("empty matrix {h}x{w}"),
        });
    }
    Ok((h, w))
}

/// Convert a text matrix to the binary format. Returns the parsed dims.
pub fn text_to_binary(
    txt_path: &Path,
    bin_path: &Path,
    chunk_elems: usize,
) -> Result<(u32, u32), TextError> {
    let txt = File::open(txt_path).map_err(|source| TextError::Open {
        path: txt_path.to_path_buf(),
        source,
    })?;
    let mut lines = BufReader::new(txt).lines();

    let header = lines
        .next()
        .ok_or_else(|| TextError::Header {
            path: txt_path.to_path_buf(),
            reason: "empty file".into(),
        })?
        .map_err(|source| TextError::Io { op: "header read", source })?;
    let (h, w) = parse_header(txt_path, &header)?;

    let out = MatrixFile::create(bin_path, h, w)?;

    let chunk = chunk_elems.max(1);
    let rows_per_chunk = (chunk / w as usize).max(1) as u32;
    let mut buf: Vec<f32> = Vec::with_capacity(rows_per_chunk as usize * w as usize);
    let mut flushed = 0u32;

    for row in 0..h {
        let line = match lines.next() {
            Some(l) => l.map_err(|source| TextError::Io { op: "row read", source })?,
            None => {
                return Err(TextError::MissingRows {
                    path: txt_path.to_path_buf(),
                    expected: h,
                    found: row,
                })
            }
        };

        let mut count = 0u32;
        for tok in line.split_whitespace() {
            if count == w {
                break; // extra trailing tokens are ignored
            }
            let v: f32 = tok.parse().map_err(|e| TextError::Parse {
                path: txt_path.to_path_buf(),
                row,
                reason: format!("token {tok:?}: {e}"),
            })?;
            buf.push(v);
            count += 1;
        }
        if count != w {
            return Err(TextError::RowWidth {
                path: txt_path.to_path_buf(),
                row,
                expected: w,
                found: count,
            });
        }

        if buf.len() == rows_per_chunk as usize * w as usize {
            out.write_rows(flushed, rows_per_chunk, &buf)?;
            flushed += rows_per_chunk;
            buf.clear();
        }
    }
    if !buf.is_empty() {
        let rows = (buf.len() / w as usize) as u32;
        out.write_rows(flushed, rows, &buf)?;
    }
    Ok((h, w))
}

/// Convert a binary matrix to the text format (three fractional digits).
pub fn binary_to_text(
    bin_path: &Path,
    txt_path: &Path,
    chunk_elems: usize,
) -> Result<(), TextError> {
    let m = MatrixFile::open_read(bin_path)?;
    let (h, w) = (m.height(), m.width());

    let txt = File::create(txt_path).map_err(|source| TextError::Open {
        path: txt_path.to_path_buf(),
        source,
    })?;
    let mut out = BufWriter::new(txt);
    writeln!(out, "{h} {w}").map_err(|source| TextError::Io { op: "header write", source })?;

    let chunk = chunk_elems.max(1);
    let rows_per_chunk = (chunk / w as usize).max(1) as u32;
    let mut buf = vec![0.0f32; rows_per_chunk as usize * w as usize];

    let mut row = 0u32;
    while row < h {
        let rows = rows_per_chunk.min(h - row);
        m.read_rows(row, rows, &mut buf)?;
        for r in 0..rows {
            // Rows are newline-separated; the final row carries no trailing
            // newline.
            if row + r > 0 {
                out.write_all(b"\n")
                    .map_err(|source| TextError::Io { op: "row write", source })?;
            }
            let line = &buf[r as usize * w as usize..(r + 1) as usize * w as usize];
            for (c, v) in line.iter().enumerate() {
                if c > 0 {
                    out.write_all(b" ")
                        .map_err(|source| TextError::Io { op: "row write", source })?;
                }
                write!(out, "{v:.3}")
                    .map_err(|source| TextError::Io { op: "row write", source })?;
            }
        }
        row += rows;
    }
    out.flush().map_err(|source| TextError::Io { op: "flush", source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::seeded_matrix;

    #[test]
    fn text_round_trip_is_exact_at_printed_precision() {
        let dir = tempfile::tempdir().unwrap();
        let bin_a = dir.path().join("a.bin");
        let txt = dir.path().join("a.txt");
        let bin_b = dir.path().join("b.bin");

        // Two-decimal values survive three-digit printing exactly.
        let payload = seeded_matrix(9 * 5, 11);
        let m = MatrixFile::create(&bin_a, 9, 5).unwrap();
        m.write_rows(0, 9, &payload).unwrap();
        drop(m);

        binary_to_text(&bin_a, &txt, DEFAULT_CHUNK_ELEMS).unwrap();
        let (h, w) = text_to_binary(&txt, &bin_b, DEFAULT_CHUNK_ELEMS).unwrap();
        assert_eq!((h, w), (9, 5));
        assert_eq!(std::fs::read(&bin_a).unwrap(), std::fs::read(&bin_b).unwrap());
    }

    #[test]
    fn text_output_shape() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("m.bin");
        let txt = dir.path().join("m.txt");
        let m = MatrixFile::create(&bin, 2, 3).unwrap();
        m.write_rows(0, 2, &[0.0, 0.5, 1.0, 1.5, 2.0, 2.5]).unwrap();
        drop(m);

        binary_to_text(&bin, &txt, DEFAULT_CHUNK_ELEMS).unwrap();
        let body = std::fs::read_to_string(&txt).unwrap();
        assert_eq!(body, "2 3\n0.000 0.500 1.000\n1.500 2.000 2.500");
    }

    #[test]
    fn parses_hand_written_text() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("in.txt");
        let bin = dir.path().join("in.bin");
        std::fs::write(&txt, "2 2\n1 2\n3.5 -4\n").unwrap();

        text_to_binary(&txt, &bin, DEFAULT_CHUNK_ELEMS).unwrap();
        let m = MatrixFile::open_read(&bin).unwrap();
        assert_eq!(m.read_all().unwrap(), [1.0, 2.0, 3.5, -4.0]);
    }

    #[test]
    fn rejects_ragged_and_short_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("x.bin");

        let ragged = dir.path().join("ragged.txt");
        std::fs::write(&ragged, "2 3\n1 2 3\n4 5\n").unwrap();
        assert!(matches!(
            text_to_binary(&ragged, &bin, DEFAULT_CHUNK_ELEMS),
            Err(TextError::RowWidth { row: 1, expected: 3, found: 2, .. })
        ));

        let short = dir.path().join("short.txt");
        std::fs::write(&short, "3 2\n1 2\n").unwrap();
        assert!(matches!(
            text_to_binary(&short, &bin, DEFAULT_CHUNK_ELEMS),
            Err(TextError::MissingRows { expected: 3, found: 1, .. })
        ));

        let bad = dir.path().join("bad.txt");
        std::fs::write(&bad, "1 2\n1 banana\n").unwrap();
        assert!(matches!(
            text_to_binary(&bad, &bin, DEFAULT_CHUNK_ELEMS),
            Err(TextError::Parse { row: 0, .. })
        ));

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "0 4\n").unwrap();
        assert!(matches!(
            text_to_binary(&empty, &bin, DEFAULT_CHUNK_ELEMS),
            Err(TextError::Header { .. })
        ));
    }
}
