mod controller;
mod error;
#[cfg(feature = "gpu")]
mod gpu;
#[cfg(test)]
mod mock;
mod registry;
mod render;
mod traits;
mod verify;

use std::time::Duration;

use clap::Parser;
use error::VramLockError;
use traits::{LockConfig, DEFAULT_SLICE_MIB};

#[cfg(feature = "gpu")]
use std::convert::Infallible;

#[cfg(feature = "gpu")]
use controller::LockController;

#[cfg(feature = "gpu")]
use gpu::{enumerate_gpus, select_gpu, WgpuSliceDevice};

#[cfg(feature = "gpu")]
use render::TerminalSink;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Probes GPU VRAM slice by slice and keeps unstable slices locked",
    long_about = None
)]
struct Args {
    /// GPU to probe (use --list-gpus to see available)
    #[arg(default_value_t = 0)]
    gpu_index: usize,

    /// Size of each probed slice in MiB
    #[arg(default_value_t = DEFAULT_SLICE_MIB, value_parser = clap::value_parser!(u32).range(1..))]
    slice_mebibytes: u32,

    /// List available GPUs and exit
    #[arg(long, default_value_t = false)]
    list_gpus: bool,

    /// Timeout per GPU wait (e.g., '30s', '2m')
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Wake-up interval once parked (e.g., '1m', '1h')
    #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
    heartbeat: Duration,
}

/// Builds the lock configuration, rejecting values clap cannot check.
fn lock_config(args: &Args) -> Result<LockConfig, VramLockError> {
    if args.heartbeat.is_zero() {
        return Err(VramLockError::Config(
            "--heartbeat must be greater than zero".to_string(),
        ));
    }

    Ok(LockConfig {
        heartbeat: args.heartbeat,
        ..LockConfig::with_slice_mib(args.slice_mebibytes)
    })
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    // Handle --list-gpus early
    if args.list_gpus {
        #[cfg(feature = "gpu")]
        {
            let gpus = enumerate_gpus();
            if gpus.is_empty() {
                println!("No GPUs found.");
            } else {
                println!("Available GPUs:");
                for gpu_info in &gpus {
                    println!("  {}", gpu_info);
                }
            }
        }
        #[cfg(not(feature = "gpu"))]
        {
            println!("GPU support not compiled. Build with: cargo build --features gpu");
        }
        std::process::exit(0);
    }

    #[cfg(feature = "gpu")]
    {
        let err = match run_gpu_lock(&args) {
            Ok(never) => match never {},
            Err(err) => err,
        };
        eprintln!("{}", fatal_message(&err));
        std::process::exit(err.exit_code());
    }

    #[cfg(not(feature = "gpu"))]
    {
        eprintln!("Error: GPU support not compiled.");
        eprintln!("Build with: cargo build --features gpu");
        std::process::exit(1);
    }
}

/// The single stderr line printed before exiting on failure.
#[cfg(any(feature = "gpu", test))]
fn fatal_message(err: &VramLockError) -> String {
    format!("Error: {}", err)
}

/// Probes the selected GPU and parks forever. Only returns on failure.
#[cfg(feature = "gpu")]
fn run_gpu_lock(args: &Args) -> Result<Infallible, VramLockError> {
    let config = lock_config(args)?;

    let (adapter, gpu_info) = select_gpu(args.gpu_index)?;
    log::info!("Selected {}", gpu_info);

    let device = WgpuSliceDevice::new(adapter, gpu_info, config.slice_size, args.timeout)?;
    let mut controller = LockController::new(device, TerminalSink::new(), config)?;
    controller.run_until_parked()?;
    controller.park()
}
