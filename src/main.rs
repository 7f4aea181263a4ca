use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use ta::des;
use ta::leakage::Calibration;
use ta::ta::{recover, Config, Recovery, Strategy};
use ta::tools::{filter_outliers, read_datafile, write_array, write_json, OUTLIER_THRESHOLD};
use ta::Error;

/// Apply P. Kocher's timing attack to recover the last DES round key.
#[derive(Parser)]
#[command(name = "ta", version)]
struct Cli {
    /// Name of the data file (generated with ta_acquisition)
    datafile: PathBuf,

    /// Number of experiments to use
    n: usize,

    /// Timings at or above this value are treated as failed measurements
    #[arg(long, default_value_t = OUTLIER_THRESHOLD)]
    threshold: f64,

    /// Average time per Hamming weight (0 to 4) of an SBox output
    #[arg(long, value_delimiter = ',')]
    calibration: Option<Vec<f64>>,

    /// Feed all experiments to a single PCC context
    #[arg(long)]
    sequential: bool,

    /// Experiments per PCC context in parallel mode
    #[arg(long, default_value_t = 512)]
    chunk: usize,

    /// Save the PCCs of all subkey hypotheses in npy
    #[arg(long)]
    corr_out: Option<PathBuf>,

    /// Save a JSON summary of the attack
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    progress: bool,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: tracing::Level,
}

#[derive(Serialize)]
struct Report<'a> {
    key: String,
    experiments: usize,
    usable: usize,
    config: &'a Config,
    fragments: Vec<FragmentReport>,
}

#[derive(Serialize)]
struct FragmentReport {
    part: usize,
    subkey: usize,
    pcc: f64,
    runner_up: f64,
}

impl<'a> Report<'a> {
    fn new(recovery: &Recovery, experiments: usize, config: &'a Config) -> Self {
        Self {
            key: recovery.key_hex(),
            experiments,
            usable: recovery.experiments(),
            config,
            fragments: recovery
                .fragments()
                .iter()
                .map(|f| FragmentReport {
                    part: f.part,
                    subkey: f.guess,
                    pcc: f.best_pcc(),
                    runner_up: f.runner_up(),
                })
                .collect(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Before doing anything else, check the correctness of the DES library
    if !des::check() {
        return Err(Error::SelfTest.into());
    }
    if cli.n < 1 {
        return Err(Error::InvalidArgument(format!(
            "number of experiments to use shall be greater than 1 ({})",
            cli.n
        ))
        .into());
    }

    let calibration = match cli.calibration {
        Some(values) => Calibration(values.try_into().map_err(|v: Vec<f64>| {
            Error::InvalidArgument(format!("calibration needs 5 values, got {}", v.len()))
        })?),
        None => Calibration::default(),
    };

    let experiments = read_datafile(&cli.datafile, cli.n)?;
    let usable = filter_outliers(&experiments, cli.threshold);

    let config = Config {
        calibration,
        strategy: if cli.sequential {
            Strategy::Sequential
        } else {
            Strategy::Parallel { chunk: cli.chunk }
        },
        progress: cli.progress,
    };
    let recovery = recover(&usable, config.clone())?;

    if let Some(path) = &cli.corr_out {
        write_array(path, recovery.corr().view())
            .with_context(|| format!("cannot write {}", path.display()))?;
    }
    if let Some(path) = &cli.report {
        write_json(path, &Report::new(&recovery, experiments.len(), &config))
            .with_context(|| format!("cannot write {}", path.display()))?;
    }

    // Print last round key
    println!("{}", recovery.key_hex());
    Ok(())
}
