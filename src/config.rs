//! Process-level configuration: a YAML run file plus the handful of
//! command-line options every rank reads at startup (spec.md §6
//! "Environment knobs"). No implicit environment is read.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Command-line surface, mirroring the teacher's `CommandLineOptions`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommandLineOptions {
    /// Path to the YAML run configuration.
    pub config_path: PathBuf,

    /// Restart from a checkpoint folder instead of starting fresh.
    #[arg(long)]
    pub restart_from: Option<PathBuf>,

    /// Number of host worker threads driving the task scheduler.
    #[arg(long)]
    pub num_threads: Option<usize>,

    /// Repeat for more verbose logging (info -> debug -> trace).
    #[arg(short, action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

/// The rank grid a run is launched on (spec.md §6 "Process topology").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RankGrid {
    pub nx: i32,
    pub ny: i32,
    pub nz: i32,
}

impl RankGrid {
    pub fn dims(&self) -> [i32; 3] {
        [self.nx, self.ny, self.nz]
    }

    pub fn world_size(&self) -> usize {
        (self.nx * self.ny * self.nz).max(0) as usize
    }
}

/// Deserializable run configuration: rank grid, subdomain extent,
/// timestep, checkpoint cadence, and the GPU-aware-MPI flag (spec.md §6
/// "Environment knobs").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub rank_grid: RankGrid,
    pub subdomain_extent: [f64; 3],
    pub dt: f64,
    #[serde(default = "default_checkpoint_stride")]
    pub checkpoint_stride: u32,
    #[serde(default)]
    pub gpu_aware_mpi: bool,
    #[serde(default)]
    pub checkpoint_folder: PathBuf,
}

fn default_checkpoint_stride() -> u32 {
    0
}

impl RunConfig {
    pub fn from_yaml_file(path: &std::path::Path) -> Result<Self, CoreError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Configuration(crate::error::ConfigurationError::UnknownComponent(format!("config file {:?}: {e}", path))))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| CoreError::Configuration(crate::error::ConfigurationError::UnknownComponent(format!("malformed config {:?}: {e}", path))))
    }
}

/// Set up per-rank logging: a terminal logger on rank 0 plus a
/// `logs/rank_<n>.log` file on every rank (spec.md §2 "Logging",
/// grounded in the teacher's `simulation_builder.rs::log_setup`).
pub fn log_setup(rank: i32, verbosity: u8) {
    use log::LevelFilter;
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};

    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let output_path = format!("logs/rank_{rank}.log");
    let output_path = std::path::Path::new(&output_path);
    if let Some(parent) = output_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file = match std::fs::File::create(output_path) {
        Ok(f) => f,
        Err(e) => {
            log::warn!("could not create log file {:?}: {e}; logging to terminal only", output_path);
            let _ = TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto);
            return;
        }
    };
    if rank == 0 {
        let _ = CombinedLogger::init(vec![
            TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
            WriteLogger::new(level, Config::default(), file),
        ]);
    } else {
        let _ = WriteLogger::init(level, Config::default(), file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_round_trips_through_yaml() {
        let yaml = "\
rank_grid:
  nx: 2
  ny: 1
  nz: 1
subdomain_extent: [10.0, 10.0, 10.0]
dt: 0.001
checkpoint_stride: 100
";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, yaml).unwrap();
        let cfg = RunConfig::from_yaml_file(&path).unwrap();
        assert_eq!(cfg.rank_grid.world_size(), 2);
        assert_eq!(cfg.checkpoint_stride, 100);
        assert!(!cfg.gpu_aware_mpi);
    }
}
