use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressIterator;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use ta::des;
use ta::simulate::{Simulator, SimulatorConfig};
use ta::tools::progress_bar;
use ta::Error;
use tracing::info;

/// Simulate timing acquisitions of a data dependent DES implementation.
#[derive(Parser)]
#[command(name = "ta_acquisition", version)]
struct Cli {
    /// Number of experiments
    n: usize,

    /// 64 bits secret key (random if omitted)
    #[arg(value_parser = parse_key)]
    key: Option<u64>,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Amplitude of the uniform measurement noise
    #[arg(long, default_value_t = SimulatorConfig::default().jitter)]
    jitter: f64,

    /// Probability of a failed measurement
    #[arg(long, default_value_t = 0.0)]
    failure_rate: f64,

    /// Number of final rounds whose timing depends on the data
    #[arg(long, default_value_t = 16)]
    leaky_rounds: usize,

    /// Output directory for ta.dat and ta.key
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: tracing::Level,
}

fn parse_key(s: &str) -> std::result::Result<u64, String> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid key {s:?}: {e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !des::check() {
        return Err(Error::SelfTest.into());
    }
    if cli.n < 1 {
        return Err(Error::InvalidArgument(format!(
            "number of experiments shall be greater than 1 ({})",
            cli.n
        ))
        .into());
    }

    let config = SimulatorConfig {
        jitter: cli.jitter,
        failure_rate: cli.failure_rate,
        leaky_rounds: cli.leaky_rounds,
        ..Default::default()
    };
    let mut sim = match cli.key {
        Some(key) => Simulator::new(key, cli.seed, config)?,
        None => Simulator::with_random_key(cli.seed, config)?,
    };

    fs::create_dir_all(&cli.dir).with_context(|| format!("cannot create {}", cli.dir.display()))?;
    let key_path = cli.dir.join("ta.key");
    let dat_path = cli.dir.join("ta.dat");
    fs::write(&key_path, sim.describe_key())
        .with_context(|| format!("cannot write {}", key_path.display()))?;

    let mut dat = BufWriter::new(
        File::create(&dat_path).with_context(|| format!("cannot write {}", dat_path.display()))?,
    );
    for _ in (0..cli.n).progress_with(progress_bar(cli.n)) {
        let x = sim.sample();
        writeln!(dat, "0x{:016x} {:.6}", x.ct, x.time)?;
    }
    dat.flush()?;

    info!(
        data = %dat_path.display(),
        key = %format!("0x{:016x}", sim.key()),
        "acquisitions stored"
    );
    eprintln!("Last round key (hex): 0x{:012x}", sim.last_round_key());
    println!("0x{:012x}", sim.last_round_key());
    Ok(())
}
