use anyhow::{Context, Result};
use burn::backend::candle::{Candle, CandleDevice};
use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::wgpu::{Wgpu, WgpuDevice};
use burn::backend::Autodiff;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{bf16, f16};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use ctnerf::config::{BackendKind, DeviceSpec, InferenceConfig, Precision, TrainingConfig};
use ctnerf::inference::generate_ct;
use ctnerf::training::train;

type NdArrayBackend = NdArray<f32>;
type WgpuBackend = Wgpu;
type CandleBackend = Candle<f32, i64>;
type CandleHalfBackend = Candle<f16, i64>;
type CandleBf16Backend = Candle<bf16, i64>;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
enum ConfigKind {
    Training,
    Inference,
}

#[derive(Parser)]
#[command(name = "ctnerf")]
#[command(about = "Neural CT reconstruction from X-ray projections")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train coarse and fine attenuation models from a training config.
    Train {
        #[arg(long, short = 'c')]
        config: PathBuf,
    },
    /// Generate a CT volume from a trained checkpoint.
    Infer {
        #[arg(long, short = 'c')]
        config: PathBuf,
    },
    /// Check a config file without running it.
    Validate {
        #[arg(long, short = 'c')]
        config: PathBuf,

        #[arg(long, default_value = "training", value_enum)]
        kind: ConfigKind,
    },
    /// Write a config template.
    InitConfig {
        #[arg(long, default_value = "training", value_enum)]
        kind: ConfigKind,

        #[arg(long, short, default_value = "config.yaml")]
        output: PathBuf,
    },
    Backends,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ctnerf=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Backends) => {
            print_backends();
            Ok(())
        }
        Some(Commands::Train { config }) => run_train(&config),
        Some(Commands::Infer { config }) => run_infer(&config),
        Some(Commands::Validate { config, kind }) => validate_config(&config, kind),
        Some(Commands::InitConfig { kind, output }) => init_config(kind, &output),
    }
}

fn print_backends() {
    println!("=== ctnerf - neural CT reconstruction ===\n");
    println!("Supported devices (the `device` config key):\n");
    println!("  cpu | ndarray     - CPU backend using ndarray");
    println!("                      Best for: development, small volumes\n");
    println!("  gpu | wgpu        - GPU backend using WebGPU");
    println!("                      Best for: cross-platform GPU acceleration\n");
    println!("  cuda[:N]          - Candle on CUDA device N");
    println!("  mps | metal[:N]   - Candle on Metal device N");
    println!("                      float16/bfloat16 precision runs on these\n");
    println!("Commands:");
    println!("  train       - Train from a training config");
    println!("  infer       - Generate a CT volume from an inference config");
    println!("  validate    - Check a config file");
    println!("  init-config - Write a config template");
    println!("  backends    - Show this help message\n");
    println!("Run 'ctnerf <command> --help' for more options.");
}

fn wgpu_device(index: usize) -> WgpuDevice {
    if index == 0 {
        WgpuDevice::default()
    } else {
        WgpuDevice::DiscreteGpu(index)
    }
}

fn candle_device(spec: DeviceSpec) -> CandleDevice {
    match spec.backend {
        BackendKind::CandleMetal => CandleDevice::metal(spec.index),
        _ => CandleDevice::cuda(spec.index),
    }
}

fn print_device_info(spec: DeviceSpec, precision: Precision) {
    match spec.backend {
        BackendKind::NdArray => {
            println!("Backend: NdArray (CPU)");
            println!("  Accelerator: CPU (pure Rust, no hardware acceleration)");
        }
        BackendKind::Wgpu => {
            let accel = match wgpu_device(spec.index) {
                WgpuDevice::DiscreteGpu(idx) => format!("Discrete GPU #{}", idx),
                WgpuDevice::IntegratedGpu(idx) => format!("Integrated GPU #{}", idx),
                WgpuDevice::VirtualGpu(idx) => format!("Virtual GPU #{}", idx),
                WgpuDevice::Cpu => "CPU (software rendering)".to_string(),
                WgpuDevice::DefaultDevice => "Default GPU".to_string(),
                _ => "WebGPU Device".to_string(),
            };
            println!("Backend: WGPU (WebGPU)");
            println!("  Accelerator: {}", accel);
        }
        BackendKind::CandleCuda | BackendKind::CandleMetal => {
            let accel = match candle_device(spec) {
                CandleDevice::Cpu => "CPU".to_string(),
                CandleDevice::Cuda(cuda_dev) => format!("CUDA GPU #{}", cuda_dev.index),
                CandleDevice::Metal(metal_dev) => format!("Metal GPU #{}", metal_dev.index),
            };
            println!("Backend: Candle");
            println!("  Accelerator: {}", accel);
        }
    }
    println!("  Precision: {}", precision);
    println!();
}

/// Half precision is only wired up for Candle; other backends compute in float32.
fn supported_precision(spec: DeviceSpec, requested: Precision) -> Precision {
    match spec.backend {
        BackendKind::CandleCuda | BackendKind::CandleMetal => requested,
        _ if requested != Precision::F32 => {
            tracing::warn!(
                "{} precision is not supported on {}; using float32",
                requested,
                spec.backend
            );
            Precision::F32
        }
        _ => Precision::F32,
    }
}

fn run_train(path: &Path) -> Result<()> {
    let config = TrainingConfig::load_from_yaml(path)
        .with_context(|| format!("failed to load training config {}", path.display()))?;
    config.validate().context("invalid training config")?;

    let spec = config.device_spec()?;
    let precision = supported_precision(spec, config.precision());
    print_device_info(spec, precision);

    match (spec.backend, precision) {
        (BackendKind::NdArray, _) => {
            run_training::<Autodiff<NdArrayBackend>>(&config, &NdArrayDevice::Cpu)
        }
        (BackendKind::Wgpu, _) => {
            run_training::<Autodiff<WgpuBackend>>(&config, &wgpu_device(spec.index))
        }
        (_, Precision::F16) => {
            run_training::<Autodiff<CandleHalfBackend>>(&config, &candle_device(spec))
        }
        (_, Precision::BF16) => {
            run_training::<Autodiff<CandleBf16Backend>>(&config, &candle_device(spec))
        }
        (_, Precision::F32) => {
            run_training::<Autodiff<CandleBackend>>(&config, &candle_device(spec))
        }
    }
}

fn run_training<B: AutodiffBackend>(config: &TrainingConfig, device: &B::Device) -> Result<()> {
    let outcome = train::<B>(config, device).context("training failed")?;
    println!(
        "Training complete: epoch {}, loss {:.6}",
        outcome.final_epoch, outcome.final_loss
    );
    println!("Checkpoints: {}", config.run_checkpoint_dir().display());
    Ok(())
}

fn run_infer(path: &Path) -> Result<()> {
    let config = InferenceConfig::load_from_yaml(path)
        .with_context(|| format!("failed to load inference config {}", path.display()))?;
    config.validate().context("invalid inference config")?;

    let spec = config.device_spec()?;
    print_device_info(spec, Precision::F32);

    match spec.backend {
        BackendKind::NdArray => run_generation::<NdArrayBackend>(&config, &NdArrayDevice::Cpu),
        BackendKind::Wgpu => run_generation::<WgpuBackend>(&config, &wgpu_device(spec.index)),
        BackendKind::CandleCuda | BackendKind::CandleMetal => {
            run_generation::<CandleBackend>(&config, &candle_device(spec))
        }
    }
}

fn run_generation<B: Backend>(config: &InferenceConfig, device: &B::Device) -> Result<()> {
    let path = generate_ct::<B>(config, device).context("CT generation failed")?;
    println!("CT volume written to {}", path.display());
    Ok(())
}

fn validate_config(path: &Path, kind: ConfigKind) -> Result<()> {
    match kind {
        ConfigKind::Training => {
            let config = TrainingConfig::load_from_yaml(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            config.validate().context("invalid training config")?;
            println!(
                "{}: valid training config (run `{}`, {} epochs, device {})",
                path.display(),
                config.run_name,
                config.training.epochs,
                config.device_spec()?
            );
        }
        ConfigKind::Inference => {
            let config = InferenceConfig::load_from_yaml(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            config.validate().context("invalid inference config")?;
            println!(
                "{}: valid inference config ({} model, output {})",
                path.display(),
                config.model_type,
                config.output_path().display()
            );
        }
    }
    Ok(())
}

fn init_config(kind: ConfigKind, output: &Path) -> Result<()> {
    let command = match kind {
        ConfigKind::Training => {
            TrainingConfig::default_config().save_to_yaml(output)?;
            "train"
        }
        ConfigKind::Inference => {
            InferenceConfig::default_config().save_to_yaml(output)?;
            "infer"
        }
    };
    println!("Config file created: {}", output.display());
    println!("\nYou can edit this file and run:");
    println!("  ctnerf {} --config {}", command, output.display());
    Ok(())
}
