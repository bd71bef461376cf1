//! octet CLI - blockwise 8-bit tensor compression and optimizer comparison.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use octet_core::{BlockSize, MemoryStats, OptimizerConfig, OptimizerFamily, StateBits};
use octet_optim::BlockwiseOptimizer;
use octet_quant::{
    dequantize_buffer, estimate_quantiles, quantize_blockwise, quantize_dynamic, Codebook,
    QuantizedBuffer, RandomStream, Rounding, DEFAULT_QUANTILE_OFFSET,
};

mod container;

/// Codec used for standalone tensor compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CodecChoice {
    /// Dynamic tree mapping - no codebook stored, good for heavy-tailed data
    #[default]
    Dynamic,
    /// 256 evenly spaced levels
    Linear,
    /// Quantiles fitted to the input tensor
    Quantile,
}

impl CodecChoice {
    const ALL: [CodecChoice; 3] = [Self::Dynamic, Self::Linear, Self::Quantile];

    fn name(self) -> &'static str {
        match self {
            Self::Dynamic => "dynamic",
            Self::Linear => "linear",
            Self::Quantile => "quantile",
        }
    }
}

#[derive(Parser)]
#[command(name = "octet")]
#[command(author, version, about = "Blockwise 8-bit quantization and 8-bit optimizers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Quantize a raw f32 file into an octet container
    Quantize {
        /// Input file of little-endian f32 values
        #[arg(short, long)]
        input: PathBuf,

        /// Output container path
        #[arg(short, long)]
        output: PathBuf,

        /// Codec
        #[arg(long, value_enum, default_value = "dynamic")]
        codec: CodecChoice,

        /// Use the unsigned variant (input must be non-negative)
        #[arg(long)]
        unsigned: bool,

        /// Elements per absmax block (power of two, 2..=4096)
        #[arg(long, default_value = "4096")]
        block_size: usize,

        /// Stochastic rounding instead of round-to-nearest
        #[arg(long)]
        stochastic: bool,

        /// Seed for the stochastic rounding stream
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Offset into the stochastic rounding stream
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Decode an octet container back into a raw f32 file
    Dequantize {
        /// Input container path
        #[arg(short, long)]
        input: PathBuf,

        /// Output file of little-endian f32 values
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Measure reconstruction error of every codec on a raw f32 file
    Roundtrip {
        /// Input file of little-endian f32 values
        #[arg(short, long)]
        input: PathBuf,

        /// Elements per absmax block
        #[arg(long, default_value = "4096")]
        block_size: usize,

        /// Use the unsigned codec variants
        #[arg(long)]
        unsigned: bool,
    },

    /// Train a synthetic quadratic with 32-bit and 8-bit optimizer state
    Compare {
        /// Optimizer configuration file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Optimizer family when no config is given
        #[arg(long, default_value = "adam")]
        family: String,

        /// Number of parameters
        #[arg(long, default_value = "65536")]
        size: usize,

        /// Optimization steps
        #[arg(long, default_value = "100")]
        steps: u32,
    },

    /// Write a sample optimizer configuration
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "optim.yaml")]
        output: PathBuf,

        /// Optimizer family
        #[arg(long, default_value = "adam")]
        family: String,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Quantize {
            input,
            output,
            codec,
            unsigned,
            block_size,
            stochastic,
            seed,
            offset,
        } => {
            let block_size = BlockSize::new(block_size)?;
            let stream = stochastic.then(|| RandomStream::new(seed));
            let rounding = match &stream {
                Some(stream) => Rounding::Stochastic { stream, offset },
                None => Rounding::Nearest,
            };
            run_quantize(&input, &output, codec, !unsigned, block_size, rounding)?;
        }

        Commands::Dequantize { input, output } => {
            let buffer = container::read(&input)?;
            let values: Vec<f32> = dequantize_buffer(&buffer)?;
            container::write_raw_f32(&output, &values)?;
            tracing::info!(
                elements = values.len(),
                scheme = ?buffer.scheme(),
                "dequantized {}",
                input.display()
            );
            println!("Wrote {} values to {}", values.len(), output.display());
        }

        Commands::Roundtrip {
            input,
            block_size,
            unsigned,
        } => {
            let block_size = BlockSize::new(block_size)?;
            run_roundtrip(&input, block_size, !unsigned)?;
        }

        Commands::Compare {
            config,
            family,
            size,
            steps,
        } => {
            let config = match config {
                Some(path) => OptimizerConfig::from_file(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => OptimizerConfig::for_family(parse_family(&family)?),
            };
            run_compare(config, size, steps)?;
        }

        Commands::InitConfig { output, family } => {
            generate_sample_config(&output, parse_family(&family)?)?;
        }
    }

    Ok(())
}

fn parse_family(name: &str) -> anyhow::Result<OptimizerFamily> {
    match OptimizerFamily::ALL
        .iter()
        .find(|f| f.name().eq_ignore_ascii_case(name))
    {
        Some(family) => Ok(*family),
        None => bail!(
            "unknown optimizer family '{}' (expected one of: momentum, adam, rmsprop, adagrad)",
            name
        ),
    }
}

/// Quantize `values` with the chosen codec.
fn quantize_with(
    values: &[f32],
    codec: CodecChoice,
    signed: bool,
    block_size: BlockSize,
    rounding: Rounding<'_>,
) -> anyhow::Result<QuantizedBuffer> {
    if !signed && values.iter().any(|v| *v < 0.0) {
        bail!("unsigned codec requested but the input has negative values");
    }
    let buffer = match codec {
        CodecChoice::Dynamic => quantize_dynamic(values, block_size, signed, rounding)?,
        CodecChoice::Linear => {
            quantize_blockwise(values, &Codebook::linear(signed), block_size, rounding)?
        }
        CodecChoice::Quantile => {
            let codebook = estimate_quantiles(values, DEFAULT_QUANTILE_OFFSET, true)?;
            quantize_blockwise(values, &codebook, block_size, rounding)?
        }
    };
    Ok(buffer)
}

fn run_quantize(
    input: &Path,
    output: &Path,
    codec: CodecChoice,
    signed: bool,
    block_size: BlockSize,
    rounding: Rounding<'_>,
) -> anyhow::Result<()> {
    let values = container::read_raw_f32(input)?;
    if values.is_empty() {
        bail!("{} contains no values", input.display());
    }

    println!("========================================");
    println!("  octet Quantize");
    println!("========================================");
    println!("Input:       {}", input.display());
    println!("Output:      {}", output.display());
    println!("Elements:    {}", format_count(values.len()));
    println!("Codec:       {}", codec.name());
    println!("Signed:      {}", signed);
    println!("Block Size:  {}", block_size);
    println!("Rounding:    {}", if rounding.is_stochastic() { "stochastic" } else { "nearest" });
    println!("========================================\n");

    let start = Instant::now();
    let buffer = quantize_with(&values, codec, signed, block_size, rounding)?;
    container::write(output, &buffer)?;
    tracing::info!(
        elements = values.len(),
        blocks = buffer.num_blocks(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "quantized {}",
        input.display()
    );

    let stats = ErrorStats::measure(&values, &dequantize_buffer::<f32>(&buffer)?);
    println!("Stored:      {}", format_bytes(buffer.memory_bytes()));
    println!("Original:    {}", format_bytes(values.len() * 4));
    println!("Ratio:       {:.2}x", compression_ratio(&buffer));
    println!("Max Error:   {:.3e}", stats.max_abs);
    println!("RMSE:        {:.3e}", stats.rmse);

    Ok(())
}

fn run_roundtrip(input: &Path, block_size: BlockSize, signed: bool) -> anyhow::Result<()> {
    let values = container::read_raw_f32(input)?;
    if values.is_empty() {
        bail!("{} contains no values", input.display());
    }

    println!("========================================");
    println!("  octet Roundtrip");
    println!("========================================");
    println!("Input:       {}", input.display());
    println!("Elements:    {}", format_count(values.len()));
    println!("Block Size:  {}", block_size);
    println!("========================================\n");

    println!(
        "{:<10} {:>12} {:>12} {:>12} {:>8}",
        "codec", "max_abs", "mean_abs", "rmse", "ratio"
    );
    for codec in CodecChoice::ALL {
        let buffer = quantize_with(&values, codec, signed, block_size, Rounding::Nearest)?;
        let back: Vec<f32> = dequantize_buffer(&buffer)?;
        let stats = ErrorStats::measure(&values, &back);
        println!(
            "{:<10} {:>12.3e} {:>12.3e} {:>12.3e} {:>7.2}x",
            codec.name(),
            stats.max_abs,
            stats.mean_abs,
            stats.rmse,
            compression_ratio(&buffer)
        );
    }

    Ok(())
}

/// Reconstruction error between an original tensor and its decoded copy.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ErrorStats {
    max_abs: f32,
    mean_abs: f64,
    rmse: f64,
}

impl ErrorStats {
    fn measure(original: &[f32], decoded: &[f32]) -> Self {
        let mut max_abs = 0.0f32;
        let mut sum_abs = 0.0f64;
        let mut sum_sq = 0.0f64;
        for (a, b) in original.iter().zip(decoded) {
            let d = (a - b).abs();
            max_abs = max_abs.max(d);
            sum_abs += f64::from(d);
            sum_sq += f64::from(d) * f64::from(d);
        }
        let n = original.len().max(1) as f64;
        Self {
            max_abs,
            mean_abs: sum_abs / n,
            rmse: (sum_sq / n).sqrt(),
        }
    }
}

fn compression_ratio(buffer: &QuantizedBuffer) -> f64 {
    (buffer.len() * 4) as f64 / buffer.memory_bytes().max(1) as f64
}

/// Synthetic diagonal quadratic `0.5 * sum(h_i * (p_i - t_i)^2)`.
struct Quadratic {
    target: Vec<f32>,
    curvature: Vec<f32>,
}

impl Quadratic {
    fn new(n: usize) -> Self {
        Self {
            target: (0..n).map(|i| (i as f32 * 0.37).sin()).collect(),
            curvature: (0..n).map(|i| 0.5 + (i % 7) as f32 / 7.0).collect(),
        }
    }

    fn loss(&self, p: &[f32]) -> f64 {
        p.iter()
            .zip(&self.target)
            .zip(&self.curvature)
            .map(|((p, t), h)| 0.5 * f64::from(*h) * f64::from(p - t).powi(2))
            .sum()
    }

    fn gradient(&self, p: &[f32]) -> Vec<f32> {
        p.iter()
            .zip(&self.target)
            .zip(&self.curvature)
            .map(|((p, t), h)| h * (p - t))
            .collect()
    }
}

/// Train `objective` for `steps` steps and return the loss trace, final
/// parameters and state memory.
fn train(
    objective: &Quadratic,
    config: OptimizerConfig,
    steps: u32,
) -> anyhow::Result<(Vec<f64>, Vec<f32>, MemoryStats)> {
    let n = objective.target.len();
    let mut optimizer = BlockwiseOptimizer::new(config)?;
    let mut params = HashMap::from([("w".to_string(), vec![0.0f32; n])]);
    let mut losses = Vec::with_capacity(steps as usize + 1);
    losses.push(objective.loss(&params["w"]));

    for _ in 0..steps {
        let grads = HashMap::from([("w".to_string(), objective.gradient(&params["w"]))]);
        optimizer.update_all(&grads, &mut params)?;
        losses.push(objective.loss(&params["w"]));
    }

    let memory = optimizer.memory_usage();
    let weights = params.remove("w").unwrap_or_default();
    Ok((losses, weights, memory))
}

fn run_compare(config: OptimizerConfig, size: usize, steps: u32) -> anyhow::Result<()> {
    if size == 0 || steps == 0 {
        bail!("size and steps must be positive");
    }
    config.validate()?;

    println!("========================================");
    println!("  octet 32-bit vs 8-bit Optimizer");
    println!("========================================");
    println!("Family:      {}", config.family);
    println!("Parameters:  {}", format_count(size));
    println!("Steps:       {}", steps);
    println!("LR:          {:.2e}", config.lr);
    println!("Block Size:  {}", config.block_size);
    println!("Codec:       {:?}", config.codec);
    println!("========================================\n");

    let objective = Quadratic::new(size);

    let full = OptimizerConfig {
        state_bits: StateBits::ThirtyTwo,
        ..config.clone()
    };
    let eight = OptimizerConfig {
        state_bits: StateBits::Eight,
        min_8bit_size: 0,
        ..config
    };

    let start = Instant::now();
    let (loss32, w32, mem32) = train(&objective, full, steps)?;
    let elapsed32 = start.elapsed();
    let start = Instant::now();
    let (loss8, w8, mem8) = train(&objective, eight, steps)?;
    let elapsed8 = start.elapsed();
    tracing::info!(
        ms_32bit = elapsed32.as_millis() as u64,
        ms_8bit = elapsed8.as_millis() as u64,
        "training finished"
    );

    println!("{:>6} {:>14} {:>14}", "step", "loss_32bit", "loss_8bit");
    let stride = (steps as usize / 10).max(1);
    for (step, (a, b)) in loss32.iter().zip(&loss8).enumerate() {
        if step % stride == 0 || step == steps as usize {
            println!("{:>6} {:>14.6e} {:>14.6e}", step, a, b);
        }
    }

    let max_diff = w32
        .iter()
        .zip(&w8)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);

    println!("\n========================================");
    println!("  Summary");
    println!("========================================");
    println!("Max Param Diff:  {:.3e}", max_diff);
    println!("32-bit State:    {}", format_bytes(mem32.state_bytes));
    println!("8-bit State:     {}", format_bytes(mem8.state_bytes));
    println!("Memory Saved:    {:.1}%", mem8.memory_saved() * 100.0);
    println!("32-bit Time:     {:.2?}", elapsed32);
    println!("8-bit Time:      {:.2?}", elapsed8);
    println!("========================================");

    Ok(())
}

fn generate_sample_config(output: &Path, family: OptimizerFamily) -> anyhow::Result<()> {
    let config = OptimizerConfig::for_family(family);
    let yaml = config.to_yaml_string()?;
    std::fs::write(output, yaml)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("Sample configuration written to: {}", output.display());
    println!("\nYou can edit this file and compare optimizers with:");
    println!("  octet compare --config {}", output.display());

    Ok(())
}

/// Format an element count with suffix (K, M, B).
fn format_count(count: usize) -> String {
    if count >= 1_000_000_000 {
        format!("{:.2}B", count as f64 / 1_000_000_000.0)
    } else if count >= 1_000_000 {
        format!("{:.2}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.2}K", count as f64 / 1_000.0)
    } else {
        format!("{}", count)
    }
}

fn format_bytes(bytes: usize) -> String {
    if bytes >= 1 << 30 {
        format!("{:.2} GiB", bytes as f64 / (1u64 << 30) as f64)
    } else if bytes >= 1 << 20 {
        format!("{:.2} MiB", bytes as f64 / (1u64 << 20) as f64)
    } else if bytes >= 1 << 10 {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_quantize() {
        let cli = Cli::try_parse_from([
            "octet", "quantize", "-i", "x.f32", "-o", "x.oct", "--codec", "quantile",
            "--stochastic",
        ])
        .unwrap();
        match cli.command {
            Commands::Quantize {
                codec,
                stochastic,
                block_size,
                ..
            } => {
                assert_eq!(codec, CodecChoice::Quantile);
                assert!(stochastic);
                assert_eq!(block_size, 4096);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_parse_family() {
        assert_eq!(parse_family("RMSprop").unwrap(), OptimizerFamily::RmsProp);
        assert!(parse_family("lamb").is_err());
    }

    #[test]
    fn test_unsigned_rejects_negative_input() {
        let err = quantize_with(
            &[1.0, -1.0],
            CodecChoice::Dynamic,
            false,
            BlockSize::B4096,
            Rounding::Nearest,
        )
        .unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn test_every_codec_reconstructs_closely() {
        let x: Vec<f32> = (0..10_000).map(|i| (i as f32 * 0.011).sin() * 3.0).collect();
        for codec in CodecChoice::ALL {
            let q = quantize_with(&x, codec, true, BlockSize::B4096, Rounding::Nearest).unwrap();
            let back: Vec<f32> = dequantize_buffer(&q).unwrap();
            let stats = ErrorStats::measure(&x, &back);
            assert!(stats.max_abs < 0.1, "{}: {:?}", codec.name(), stats);
            assert!(compression_ratio(&q) > 3.9);
        }
    }

    #[test]
    fn test_compare_training_reduces_loss() {
        let objective = Quadratic::new(4096);
        let config = OptimizerConfig {
            lr: 1e-2,
            min_8bit_size: 0,
            ..OptimizerConfig::default()
        };
        let (losses, _, memory) = train(&objective, config, 50).unwrap();
        assert!(losses[50] < losses[0]);
        assert!(memory.memory_saved() > 0.7);
    }

    #[test]
    fn test_sample_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("optim.yaml");
        generate_sample_config(&path, OptimizerFamily::Momentum).unwrap();
        let loaded = OptimizerConfig::from_file(&path).unwrap();
        assert_eq!(loaded, OptimizerConfig::for_family(OptimizerFamily::Momentum));
    }
}
