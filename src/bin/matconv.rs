//! matconv: convert matrices between text and binary, or pad them
//!
//! Modes (exactly one):
//! - `--to-bin`: text → binary
//! - `--to-txt`: binary → text (three fractional digits)
//! - `--pad`:    binary → binary with a zero border sized for `-kH`/`-kW`

#![forbid(unsafe_code)]

use std::env;
use std::path::Path;
use std::process;

use convstream::pad::{apply_padding, MatrixPadding};
use convstream::text;

fn print_usage(program: &str) {
    eprintln!("Usage: {program} --to-bin|--to-txt|--pad -i <in> -o <out> [-kH N -kW N]");
    eprintln!("  --to-bin   convert a text matrix to binary");
    eprintln!("  --to-txt   convert a binary matrix to text");
    eprintln!("  --pad      frame a binary matrix with zeros for a kH x kW kernel");
}

fn flag_value(args: &[String], names: &[&str]) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        for name in names {
            if a == name {
                return it.next().cloned();
            }
            if let Some(rest) = a.strip_prefix(name) {
                if let Some(value) = rest.strip_prefix('=') {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage(&args[0]);
        return Ok(());
    }

    let to_bin = args.iter().any(|a| a == "--to-bin");
    let to_txt = args.iter().any(|a| a == "--to-txt");
    let do_pad = args.iter().any(|a| a == "--pad");
    if [to_bin, to_txt, do_pad].iter().filter(|m| **m).count() != 1 {
        eprintln!("Error: pick exactly one of --to-bin, --to-txt, --pad");
        print_usage(&args[0]);
        process::exit(2);
    }

    let input = flag_value(&args[1..], &["-i", "--input"]);
    let output = flag_value(&args[1..], &["-o", "--output"]);
    let (Some(input), Some(output)) = (input, output) else {
        eprintln!("Error: -i and -o are both required");
        print_usage(&args[0]);
        process::exit(2);
    };
    let (input, output) = (Path::new(&input), Path::new(&output));

    if to_bin {
        let (h, w) = text::text_to_binary(input, output, text::DEFAULT_CHUNK_ELEMS)?;
        eprintln!("wrote {h}x{w} binary matrix to {}", output.display());
    } else if to_txt {
        text::binary_to_text(input, output, text::DEFAULT_CHUNK_ELEMS)?;
        eprintln!("wrote text matrix to {}", output.display());
    } else {
        let k_h = flag_value(&args[1..], &["-kH", "--kH"]).and_then(|s| s.parse::<u32>().ok());
        let k_w = flag_value(&args[1..], &["-kW", "--kW"]).and_then(|s| s.parse::<u32>().ok());
        let (Some(k_h), Some(k_w)) = (k_h, k_w) else {
            eprintln!("Error: --pad needs -kH and -kW");
            print_usage(&args[0]);
            process::exit(2);
        };
        let padding = MatrixPadding::for_kernel(k_h, k_w);
        apply_padding(input, output, &padding)?;
        eprintln!(
            "wrote padded matrix to {} (border {}+{} rows, {}+{} cols)",
            output.display(),
            padding.rows_before,
            padding.rows_after,
            padding.cols_before,
            padding.cols_after,
        );
    }
    Ok(())
}
