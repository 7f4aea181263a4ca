use indicatif::{ProgressBar, ProgressStyle};
use ndarray::ArrayView2;
use ndarray_npy::WriteNpyExt;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

/// Timings at or above this value flag a failed measurement.
pub const OUTLIER_THRESHOLD: f64 = 1_000_000.0;

/// One acquisition: a cipher text and the time it took to compute it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Experiment {
    pub ct: u64,
    pub time: f64,
}

/// Reads the first `n` experiments of a data file. Each line holds a
/// hexadecimal cipher text and a decimal timing, separated by blanks. Any
/// malformed or missing line rejects the whole file.
pub fn read_datafile<P: AsRef<Path>>(path: P, n: usize) -> Result<Vec<Experiment>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path).map_err(|e| Error::load(path, None, e))?);
    let mut experiments = Vec::with_capacity(n);
    let mut lines = reader.lines();
    for line_no in 1..=n {
        let line = match lines.next() {
            Some(line) => line.map_err(|e| Error::load(path, Some(line_no), e))?,
            None => {
                return Err(Error::load(
                    path,
                    None,
                    format!("only {} experiments, {n} requested", line_no - 1),
                ))
            }
        };
        let experiment = parse_line(&line).map_err(|reason| Error::load(path, Some(line_no), reason))?;
        experiments.push(experiment);
    }
    Ok(experiments)
}

fn parse_line(line: &str) -> std::result::Result<Experiment, String> {
    let mut fields = line.split_whitespace();
    let (Some(ct), Some(time), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err("cannot read cipher text and/or timing measurement".to_string());
    };
    let digits = ct
        .strip_prefix("0x")
        .or_else(|| ct.strip_prefix("0X"))
        .unwrap_or(ct);
    let ct = u64::from_str_radix(digits, 16).map_err(|e| format!("invalid cipher text {ct:?}: {e}"))?;
    let time: f64 = fast_float::parse(time).map_err(|_| format!("invalid timing {time:?}"))?;
    if !time.is_finite() {
        return Err(format!("invalid timing {time:?}"));
    }
    Ok(Experiment { ct, time })
}

/// Drops the failed measurements, cipher text and timing together.
pub fn filter_outliers(experiments: &[Experiment], threshold: f64) -> Vec<Experiment> {
    let kept: Vec<Experiment> = experiments
        .iter()
        .filter(|x| x.time < threshold)
        .copied()
        .collect();
    let dropped = experiments.len() - kept.len();
    if dropped > 0 {
        warn!(dropped, threshold, "outlier measurements discarded");
    }
    kept
}

pub fn write_array<P: AsRef<Path>>(path: P, ar: ArrayView2<f64>) -> anyhow::Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    ar.write_npy(writer)?;
    Ok(())
}

pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> anyhow::Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

/// Creates a [`ProgressBar`] with a predefined default style.
pub fn progress_bar(len: usize) -> ProgressBar {
    let progress_bar = ProgressBar::new(len as u64).with_style(
        ProgressStyle::with_template("{elapsed_precise} {wide_bar} {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress_bar.enable_steady_tick(Duration::from_millis(100));
    progress_bar
}
