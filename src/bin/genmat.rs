//! genmat: generate a seeded random binary matrix file
//!
//! Values are uniform over `{0.00, 0.01, …, 1.00}`; the same seed always
//! produces the same file.

#![forbid(unsafe_code)]

use std::env;
use std::process;

use convstream::matgen;

fn print_usage(program: &str) {
    eprintln!("Usage: {program} -H <rows> -W <cols> -o <file.bin> [--seed N]");
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

    let h = flag_value(&args[1..], &["-H", "--height"]).and_then(|s| s.parse::<u32>().ok());
    let w = flag_value(&args[1..], &["-W", "--width"]).and_then(|s| s.parse::<u32>().ok());
    let out = flag_value(&args[1..], &["-o", "--output"]);
    let seed = flag_value(&args[1..], &["--seed"])
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(1234);

    let (Some(h), Some(w), Some(out)) = (h, w, out) else {
        eprintln!("Error: -H, -W and -o are all required");
        print_usage(&args[0]);
        process::exit(2);
    };
    if h == 0 || w == 0 {
        eprintln!("Error: dimensions must be positive (got {h}x{w})");
        process::exit(2);
    }

    matgen::generate_matrix_file(out.as_ref(), h, w, seed)?;
    eprintln!("wrote {h}x{w} matrix to {out} (seed {seed})");
    Ok(())
}
