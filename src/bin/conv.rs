//! conv: streaming strided convolution over binary matrix files
//!
//! The driver around the engine: parses the argument surface, stages text
//! inputs into binary temp files, generates seeded inputs when none are
//! given, runs the participant group, and optionally converts the result
//! back to text.
//!
//! Environment:
//! - `CONV_TEMP_DIR` / `CONV_TMP_DIR`: staging directory (default `./tmp`)
//! - `CONV_MEM_GB`: overrides `-M/--memory`
//! - `CONVERT_BIN`: `0`/`false` keeps the output binary (skips bin→txt)
//!
//! Exit codes: 0 success, 2 invalid arguments or missing dimensions,
//! 1 fatal I/O or allocation failure.

#![forbid(unsafe_code)]

use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use convstream::budget::{BudgetBroker, DEFAULT_BUDGET_GIB};
use convstream::codec::MatrixFile;
use convstream::{matgen, run_group, text, ConvSpec};

/// Seed for a generated input matrix.
const INPUT_SEED: u64 = 1234;
/// Seed for a generated kernel.
const KERNEL_SEED: u64 = 2025;

fn print_usage(program: &str) {
    eprintln!("Usage: {program} [OPTIONS]");
    eprintln!("Options:");
    eprintln!("  -H, --height=N        Input matrix height (required if no -f)");
    eprintln!("  -W, --width=N         Input matrix width (required if no -f)");
    eprintln!("  -kH N                 Kernel height (required if no -g)");
    eprintln!("  -kW N                 Kernel width (required if no -g)");
    eprintln!("  -sH N                 Vertical stride (default: 1)");
    eprintln!("  -sW N                 Horizontal stride (default: 1)");
    eprintln!("  -f, --input=FILE      Input matrix file (.txt or .bin)");
    eprintln!("  -g, --kernel=FILE     Kernel file (.txt or .bin)");
    eprintln!("  -o, --output=FILE     Output file (required)");
    eprintln!("  -M, --memory=GB       Memory budget in GiB (default: {DEFAULT_BUDGET_GIB})");
    eprintln!("  -n, --participants=N  Group size (default: 1)");
    eprintln!("  -h, --help            Display this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {program} -H 1000 -W 1000 -kH 5 -kW 5 -o output.txt");
    eprintln!("  {program} -f input.txt -g kernel.txt -sH 2 -sW 2 -o output.txt");
    eprintln!("  {program} --input=input.bin --kernel=kernel.bin -M 16 -n 4 -o out.txt");
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

fn flag_present(args: &[String], names: &[&str]) -> bool {
    args.iter().any(|a| names.contains(&a.as_str()))
}

fn parse_dim(args: &[String], names: &[&str], what: &str) -> Result<u32, String> {
    match flag_value(args, names) {
        None => Ok(0),
        Some(s) => s
            .parse::<u32>()
            .map_err(|_| format!("invalid {what} value: {s}")),
    }
}

struct CliArgs {
    h: u32,
    w: u32,
    k_h: u32,
    k_w: u32,
    s_h: u32,
    s_w: u32,
    input: Option<String>,
    kernel: Option<String>,
    output: String,
    memory_gb: f64,
    participants: usize,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let h = parse_dim(args, &["-H", "--height"], "height")?;
    let w = parse_dim(args, &["-W", "--width"], "width")?;
    let k_h = parse_dim(args, &["-kH", "--kH"], "kernel height")?;
    let k_w = parse_dim(args, &["-kW", "--kW"], "kernel width")?;

    let s_h = match flag_value(args, &["-sH", "--sH"]) {
        None => 1,
        Some(s) => s
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| format!("invalid stride height value: {s}"))?,
    };
    let s_w = match flag_value(args, &["-sW", "--sW"]) {
        None => 1,
        Some(s) => s
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| format!("invalid stride width value: {s}"))?,
    };

    let input = flag_value(args, &["-f", "--input"]);
    let kernel = flag_value(args, &["-g", "--kernel"]);
    let output = flag_value(args, &["-o", "--output"])
        .ok_or("output file (-o/--output) is required")?;

    let memory_gb = match flag_value(args, &["-M", "--memory"]) {
        None => DEFAULT_BUDGET_GIB,
        Some(s) => s
            .parse::<f64>()
            .ok()
            .filter(|v| *v > 0.0)
            .ok_or_else(|| format!("invalid memory budget value: {s}"))?,
    };
    let participants = match flag_value(args, &["-n", "--participants"]) {
        None => 1,
        Some(s) => s
            .parse::<usize>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| format!("invalid participant count: {s}"))?,
    };

    if (k_h == 0 || k_w == 0) && kernel.is_none() {
        return Err(
            "kernel dimensions (-kH and -kW) are required unless a kernel file (-g) is provided"
                .into(),
        );
    }
    if input.is_none() && (h == 0 || w == 0) {
        return Err(
            "either an input file (-f) or dimensions (-H and -W) must be specified".into(),
        );
    }

    Ok(CliArgs {
        h,
        w,
        k_h,
        k_w,
        s_h,
        s_w,
        input,
        kernel,
        output,
        memory_gb,
        participants,
    })
}

fn temp_dir() -> PathBuf {
    env::var("CONV_TEMP_DIR")
        .or_else(|_| env::var("CONV_TMP_DIR"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./tmp"))
}

/// Stage a matrix path into binary form, converting `.txt` files into the
/// temp dir. Returns the binary path and whether it is a temp file.
fn stage_binary(
    path: &str,
    tmp_dir: &Path,
    tag: &str,
    pid: u32,
) -> anyhow::Result<(PathBuf, bool)> {
    if path.ends_with(".txt") {
        let staged = tmp_dir.join(format!("conv_{tag}_{pid}.bin"));
        text::text_to_binary(Path::new(path), &staged, text::DEFAULT_CHUNK_ELEMS)
            .with_context(|| format!("staging {path}"))?;
        Ok((staged, true))
    } else {
        Ok((PathBuf::from(path), false))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stdout)
        .init();

    let args: Vec<String> = env::args().collect();
    if flag_present(&args, &["-h", "--help"]) {
        print_usage(&args[0]);
        return Ok(());
    }
    let cli = match parse_args(&args[1..]) {
        Ok(cli) => cli,
        Err(msg) => {
            eprintln!("Error: {msg}");
            print_usage(&args[0]);
            process::exit(2);
        }
    };

    let tmp_dir = temp_dir();
    std::fs::create_dir_all(&tmp_dir)
        .with_context(|| format!("creating temp dir {}", tmp_dir.display()))?;
    let pid = process::id();
    let mut temp_files: Vec<PathBuf> = Vec::new();

    // --- Input: stage, generate, or use as-is; dims come from the file. ---
    let (in_path, h, w) = match &cli.input {
        Some(path) => {
            let (staged, is_temp) = stage_binary(path, &tmp_dir, "input", pid)?;
            if is_temp {
                temp_files.push(staged.clone());
            }
            let header = MatrixFile::open_read(&staged)
                .with_context(|| format!("reading input header of {}", staged.display()))?;
            let dims = (header.height(), header.width());
            (staged, dims.0, dims.1)
        }
        None => {
            let staged = tmp_dir.join(format!("conv_input_{pid}.bin"));
            info!("generating {}x{} input (seed {})", cli.h, cli.w, INPUT_SEED);
            matgen::generate_matrix_file(&staged, cli.h, cli.w, INPUT_SEED)
                .context("generating input matrix")?;
            temp_files.push(staged.clone());
            (staged, cli.h, cli.w)
        }
    };

    // --- Kernel: a file wins over explicit dims; no file means seeded. ---
    let (k_h, k_w, kernel): (u32, u32, Arc<[f32]>) = match &cli.kernel {
        Some(path) => {
            let (staged, is_temp) = stage_binary(path, &tmp_dir, "kernel", pid)?;
            if is_temp {
                temp_files.push(staged.clone());
            }
            let kf = MatrixFile::open_read(&staged)
                .with_context(|| format!("reading kernel {}", staged.display()))?;
            let (k_h, k_w) = (kf.height(), kf.width());
            (k_h, k_w, kf.read_all().context("reading kernel payload")?.into())
        }
        None => {
            info!("generating {}x{} kernel (seed {})", cli.k_h, cli.k_w, KERNEL_SEED);
            (cli.k_h, cli.k_w, matgen::generate_kernel(cli.k_h, cli.k_w, KERNEL_SEED).into())
        }
    };

    let spec = match ConvSpec::new(h, w, k_h, k_w, cli.s_h, cli.s_w, kernel) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(2);
        }
    };

    // --- Budget and output routing. ---
    let memory_gb = env::var("CONV_MEM_GB")
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .unwrap_or(cli.memory_gb);
    let broker = BudgetBroker::from_gib(memory_gb);

    let convert_output = !matches!(
        env::var("CONVERT_BIN").ok().as_deref(),
        Some("0") | Some("false") | Some("False")
    );
    let internal_out = if convert_output {
        let staged = tmp_dir.join(format!("conv_output_{pid}.bin"));
        temp_files.push(staged.clone());
        staged
    } else if cli.output.ends_with(".bin") {
        PathBuf::from(&cli.output)
    } else {
        PathBuf::from(format!("{}.bin", cli.output))
    };

    // --- The run itself. ---
    let begin = Instant::now();
    run_group(
        &spec,
        cli.participants,
        &in_path,
        &internal_out,
        broker.global_bytes(),
    )
    .context("convolution run failed")?;

    info!(
        "mode=group participants={} threads={} H={} W={} k={}x{} s={}x{} total={:.3}s",
        cli.participants,
        rayon::current_num_threads(),
        spec.h,
        spec.w,
        spec.k_h,
        spec.k_w,
        spec.s_h,
        spec.s_w,
        begin.elapsed().as_secs_f64(),
    );

    if convert_output {
        text::binary_to_text(&internal_out, Path::new(&cli.output), text::DEFAULT_CHUNK_ELEMS)
            .context("converting output to text")?;
    }

    for path in temp_files {
        let _ = std::fs::remove_file(path);
    }
    Ok(())
}
