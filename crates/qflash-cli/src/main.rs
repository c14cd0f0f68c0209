use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;

use qflash_attention::{
    compare, reference_attention, AttentionConfig, BlockedAttentionEngine, LogitScaling, Schedule,
    Verdict,
};
use qflash_core::Tensor;
use qflash_data::{generate_fixture, Fixture, OutputEncoding, OUTPUT_FILE};

const BANNER: &str = r#"
        __ _           _
   __ _/ _| | __ _ ___| |__
  / _` | |_| |/ _` / __| '_ \
 | (_| |  _| | (_| \__ \ | | |
  \__, |_| |_|\__,_|___/_| |_|
     |_|"#;

const REFERENCE_FILE: &str = "Reference_tensor.bin";

#[derive(Parser)]
#[command(
    name = "qflash",
    about = "INT8 blocked attention engine",
    long_about = "Blocked scaled dot-product attention over row-quantized INT8 Q/K/V.\n\nGenerates fixtures, runs the engine under a chosen schedule and checks\nit against a full-precision reference.",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Problem shape shared by the file-based commands.
#[derive(clap::Args, Clone, Copy)]
struct ShapeArgs {
    /// Sequence length N
    #[arg(long, default_value = "32")]
    seq_len: usize,
    /// Query/key dimension
    #[arg(long, default_value = "64")]
    d_k: usize,
    /// Value dimension
    #[arg(long, default_value = "64")]
    d_v: usize,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show version, schedules and logit scaling policies
    Info,
    /// Write a seeded random INT8 fixture (six .bin files)
    Generate {
        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,
        #[command(flatten)]
        shape: ShapeArgs,
        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Run the engine over a fixture directory and write Output_tensor.bin
    Run {
        /// Fixture directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// JSON attention config; overrides the shape and tiling flags
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        shape: ShapeArgs,
        /// Query tile rows (default gcd(N, 16))
        #[arg(long)]
        block_q: Option<usize>,
        /// Key/value tile rows (default gcd(N, 16))
        #[arg(long)]
        block_kv: Option<usize>,
        /// sequential, parallel or pipelined
        #[arg(long, default_value = "sequential")]
        schedule: String,
        /// Channel depth for the pipelined schedule
        #[arg(long, default_value = "4")]
        depth: usize,
        /// inv_sqrt_dk, factor:<f32> or shift:<bits>
        #[arg(long, default_value = "inv_sqrt_dk")]
        logit_scale: String,
        /// Output encoding: f32 or fixed16
        #[arg(long, default_value = "f32")]
        encoding: String,
        /// Compare against the full-precision reference
        #[arg(long)]
        verify: bool,
    },
    /// Write the full-precision reference output for a fixture directory
    Reference {
        /// Fixture directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[command(flatten)]
        shape: ShapeArgs,
        /// inv_sqrt_dk, factor:<f32> or shift:<bits>
        #[arg(long, default_value = "inv_sqrt_dk")]
        logit_scale: String,
    },
    /// Time the reference against every schedule
    Bench {
        /// Sequence lengths to benchmark (comma-separated)
        #[arg(long, default_value = "64,128,256")]
        seq_lens: String,
        /// Head dimension used for d_k and d_v
        #[arg(long, default_value = "64")]
        dim: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Info => {
            cmd_info();
            Ok(())
        }
        Commands::Generate { out, shape, seed } => cmd_generate(&out, shape, seed),
        Commands::Run {
            dir,
            config,
            shape,
            block_q,
            block_kv,
            schedule,
            depth,
            logit_scale,
            encoding,
            verify,
        } => {
            let config = match config {
                Some(path) => load_config(&path)?,
                None => {
                    let mut cfg = AttentionConfig::new(shape.seq_len, shape.d_k, shape.d_v)
                        .with_schedule(parse_schedule(&schedule, depth)?)
                        .with_logit_scaling(parse_logit_scaling(&logit_scale)?);
                    cfg.block_q = block_q.unwrap_or(cfg.block_q);
                    cfg.block_kv = block_kv.unwrap_or(cfg.block_kv);
                    cfg
                }
            };
            cmd_run(&dir, config, parse_encoding(&encoding)?, verify)
        }
        Commands::Reference { dir, shape, logit_scale } => {
            let config = AttentionConfig::new(shape.seq_len, shape.d_k, shape.d_v)
                .with_logit_scaling(parse_logit_scaling(&logit_scale)?);
            cmd_reference(&dir, &config)
        }
        Commands::Bench { seq_lens, dim } => cmd_bench(&seq_lens, dim),
    }
}

fn cmd_info() {
    println!("{}", BANNER);
    println!("  v{}  INT8 blocked attention\n", env!("CARGO_PKG_VERSION"));

    println!("Platform");
    println!("  OS:      {}", std::env::consts::OS);
    println!("  Arch:    {}", std::env::consts::ARCH);
    println!("  Threads: {}", rayon::current_num_threads());

    println!("\nSchedules");
    println!("  sequential  one query tile at a time");
    println!("  parallel    query tiles across the rayon pool");
    println!("  pipelined   load / score / softmax / accumulate stages over bounded channels");

    println!("\nLogit scaling");
    println!("  inv_sqrt_dk   1/sqrt(d_k) (default)");
    println!("  factor:<f>    explicit multiplier");
    println!("  shift:<n>     2^-n, fixed right-shift compatibility policy");

    println!("\nOutput encodings");
    println!("  f32       native-endian f32");
    println!("  fixed16   signed Q5.11, floor + saturate");

    println!("\nAccumulator");
    println!("  exact i32 dot products up to d_k = {}", qflash_kernels::max_exact_dk());
}

fn cmd_generate(out: &Path, shape: ShapeArgs, seed: u64) -> anyhow::Result<()> {
    let fixture = generate_fixture(shape.seq_len, shape.d_k, shape.d_v, seed);
    fixture
        .save(out)
        .with_context(|| format!("writing fixture to {}", out.display()))?;
    println!(
        "Wrote N={} d_k={} d_v={} (seed {}) to {}",
        shape.seq_len,
        shape.d_k,
        shape.d_v,
        seed,
        out.display()
    );
    Ok(())
}

fn cmd_run(dir: &Path, config: AttentionConfig, encoding: OutputEncoding, verify: bool) -> anyhow::Result<()> {
    let engine = BlockedAttentionEngine::new(config)?;
    let fixture = Fixture::load(dir, config.seq_len, config.d_k, config.d_v)
        .with_context(|| format!("loading fixture from {}", dir.display()))?;

    let start = Instant::now();
    let output = engine.compute(&fixture.q, &fixture.k, &fixture.v)?;
    let elapsed = start.elapsed();
    info!(
        n = config.seq_len,
        block_q = config.block_q,
        block_kv = config.block_kv,
        schedule = ?config.schedule,
        elapsed_ms = elapsed.as_secs_f64() * 1e3,
        "engine finished"
    );

    let out_path = dir.join(OUTPUT_FILE);
    encoding.write(&out_path, &output)?;
    println!("Output written to {} ({:?})", out_path.display(), encoding);

    if !verify {
        return Ok(());
    }

    let reference = reference_attention(&fixture.q, &fixture.k, &fixture.v, engine.logit_scale())?;
    let report = compare(&output, &reference)?;
    let (r, c) = report.max_error_at;

    println!("\nSample values");
    for row in 0..config.seq_len.min(4) {
        println!(
            "  [{row}][0]  engine {:>12.8}  reference {:>12.8}",
            output.get(row, 0),
            reference.get(row, 0)
        );
    }
    println!("\nMSE:            {:.8}", report.mse);
    println!("RMSE:           {:.8}", report.rmse);
    println!("Max abs error:  {:.8} at [{r}][{c}]", report.max_abs_error);
    println!("  engine {:.8}  reference {:.8}", report.engine_value, report.reference_value);
    println!("\n{}", report.verdict());

    if report.verdict() == Verdict::Fail {
        bail!("verification failed: RMSE {:.6}", report.rmse);
    }
    Ok(())
}

fn cmd_reference(dir: &Path, config: &AttentionConfig) -> anyhow::Result<()> {
    config.validate()?;
    let fixture = Fixture::load(dir, config.seq_len, config.d_k, config.d_v)
        .with_context(|| format!("loading fixture from {}", dir.display()))?;
    let reference = reference_attention(&fixture.q, &fixture.k, &fixture.v, config.logit_scale())?;
    let out_path = dir.join(REFERENCE_FILE);
    OutputEncoding::F32.write(&out_path, &reference)?;
    println!("Reference written to {}", out_path.display());
    Ok(())
}

fn cmd_bench(seq_lens: &str, dim: usize) -> anyhow::Result<()> {
    let seq_lens: Vec<usize> = seq_lens
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    println!("=== INT8 Blocked Attention Benchmark (d = {dim}) ===\n");
    println!(
        "{:<10} {:>14} {:>14} {:>14} {:>14} {:>10}",
        "SeqLen", "Reference (ms)", "Sequential", "Parallel", "Pipelined", "RMSE"
    );
    println!("{}", "-".repeat(81));

    for &n in &seq_lens {
        let fixture = generate_fixture(n, dim, dim, 42);
        let (q, k, v) = (&fixture.q, &fixture.k, &fixture.v);
        let iters = if n <= 128 { 20 } else if n <= 256 { 5 } else { 2 };
        let base = AttentionConfig::new(n, dim, dim);

        let scale = base.logit_scale();
        let mut reference = Tensor::zeros(n, dim);
        let ref_s = time_it(iters, || -> anyhow::Result<()> {
            reference = reference_attention(q, k, v, scale)?;
            Ok(())
        })?;

        let mut timings = Vec::new();
        let mut last = Tensor::zeros(n, dim);
        for schedule in [
            Schedule::Sequential,
            Schedule::Parallel,
            Schedule::Pipelined { depth: 4 },
        ] {
            let engine = BlockedAttentionEngine::new(base.with_schedule(schedule))?;
            timings.push(time_it(iters, || -> anyhow::Result<()> {
                last = engine.compute(q, k, v)?;
                Ok(())
            })?);
        }
        let rmse = compare(&last, &reference)?.rmse;

        println!(
            "{:<10} {:>12.3}ms {:>12.3}ms {:>12.3}ms {:>12.3}ms {:>10.2e}",
            format!("N={n}"),
            ref_s * 1e3,
            timings[0] * 1e3,
            timings[1] * 1e3,
            timings[2] * 1e3,
            rmse,
        );
    }
    Ok(())
}

fn time_it(iters: usize, mut f: impl FnMut() -> anyhow::Result<()>) -> anyhow::Result<f64> {
    f()?; // warmup
    let start = Instant::now();
    for _ in 0..iters {
        f()?;
    }
    Ok(start.elapsed().as_secs_f64() / iters as f64)
}

fn load_config(path: &Path) -> anyhow::Result<AttentionConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: AttentionConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

fn parse_schedule(name: &str, depth: usize) -> anyhow::Result<Schedule> {
    Ok(match name {
        "sequential" => Schedule::Sequential,
        "parallel" => Schedule::Parallel,
        "pipelined" => Schedule::Pipelined { depth },
        other => bail!("unknown schedule '{other}' (expected sequential, parallel or pipelined)"),
    })
}

fn parse_logit_scaling(arg: &str) -> anyhow::Result<LogitScaling> {
    if arg == "inv_sqrt_dk" {
        return Ok(LogitScaling::InvSqrtDk);
    }
    if let Some(f) = arg.strip_prefix("factor:") {
        let f: f32 = f.parse().with_context(|| format!("bad logit factor '{f}'"))?;
        return Ok(LogitScaling::Factor(f));
    }
    if let Some(bits) = arg.strip_prefix("shift:") {
        let bits: u32 = bits.parse().with_context(|| format!("bad logit shift '{bits}'"))?;
        return Ok(LogitScaling::RightShift(bits));
    }
    bail!("unknown logit scaling '{arg}' (expected inv_sqrt_dk, factor:<f> or shift:<n>)")
}

fn parse_encoding(name: &str) -> anyhow::Result<OutputEncoding> {
    Ok(match name {
        "f32" => OutputEncoding::F32,
        "fixed16" => OutputEncoding::Fixed16,
        other => bail!("unknown encoding '{other}' (expected f32 or fixed16)"),
    })
}
