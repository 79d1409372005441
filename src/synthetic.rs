//! Seeded synthetic batch and instrument data
//!
//! Reproduces the demo data set: a month of two-phase batches with a few
//! injected CPU spikes, and per-batch instrument tables seeded with a
//! handful of slow trades (few calls, high CPU).

use crate::error::Result;
use crate::pipeline::InstrumentSource;
use crate::records::{BatchRecord, FlaggedPair, InstrumentRecord};
use chrono::{Datelike, Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default seed for the synthetic run
pub const DEFAULT_SEED: u64 = 42;

/// Number of days generated by [`synthetic_batches`]
pub const SYNTHETIC_DAYS: i64 = 30;

/// Phases generated by [`synthetic_batches`]
pub const SYNTHETIC_PHASES: [&str; 2] = ["A", "B"];

/// Instruments per batch, `S001` to `S059`
pub const SYNTHETIC_INSTRUMENTS: u32 = 59;

/// First synthetic business date
pub fn synthetic_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default()
}

/// Normal sample via Box-Muller
fn normal(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    let radius = (-2.0 * u1.ln()).sqrt();
    mean + std_dev * radius * (std::f64::consts::TAU * u2).cos()
}

/// Multiplier applied to the CPU of a batch on a spike day
fn batch_spike(day: i64, phase: &str) -> f64 {
    match (day, phase) {
        (20, "A") => 5.0,
        (15, "B") => 4.5,
        (25, _) => 4.0,
        _ => 1.0,
    }
}

/// 30 days × phases {A, B} of batch aggregates with injected spikes
pub fn synthetic_batches(seed: u64) -> Vec<BatchRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = synthetic_start();

    let mut records = Vec::with_capacity(SYNTHETIC_DAYS as usize * SYNTHETIC_PHASES.len());
    for day in 0..SYNTHETIC_DAYS {
        let date = start + Duration::days(day);
        for phase in SYNTHETIC_PHASES {
            let cpu = normal(&mut rng, 200.0, 40.0) * batch_spike(day, phase);
            let calls = rng.gen_range(80..140);
            let cnt = rng.gen_range(30..60);
            records.push(BatchRecord::new(date, phase, calls, cpu.max(1.0), cnt));
        }
    }
    records
}

/// Per-pair seed, so each batch gets its own instrument draw
fn pair_seed(date: NaiveDate, phase: &str, seed: u64) -> u64 {
    phase
        .bytes()
        .fold(seed ^ ((date.num_days_from_ce() as u64) << 16), |acc, byte| {
            acc.wrapping_mul(31).wrapping_add(u64::from(byte))
        })
}

/// Instrument table for one (date, phase) batch
///
/// S010/S022, S015/S033 and S045 are slow trades by construction.
pub fn synthetic_instruments(date: NaiveDate, phase: &str, seed: u64) -> Vec<InstrumentRecord> {
    let mut rng = StdRng::seed_from_u64(pair_seed(date, phase, seed));

    (1..=SYNTHETIC_INSTRUMENTS)
        .map(|n| {
            let sec_id = format!("S{:03}", n);
            let mut calls: u64 = rng.gen_range(1..20);
            let mut cpu = normal(&mut rng, 10.0, 3.0);

            match sec_id.as_str() {
                "S010" | "S022" => {
                    cpu *= 4.0;
                    calls /= 2;
                }
                "S015" | "S033" => {
                    cpu *= 3.5;
                    calls /= 3;
                }
                "S045" => {
                    cpu *= 5.0;
                    calls = 1;
                }
                _ => {}
            }

            InstrumentRecord::new(date, phase, sec_id, calls.max(1), cpu.max(0.1))
        })
        .collect()
}

/// Instruments of every synthetic batch
pub fn synthetic_instrument_history(seed: u64) -> Vec<InstrumentRecord> {
    let start = synthetic_start();
    (0..SYNTHETIC_DAYS)
        .flat_map(move |day| {
            SYNTHETIC_PHASES.into_iter().flat_map(move |phase| {
                synthetic_instruments(start + Duration::days(day), phase, seed)
            })
        })
        .collect()
}

/// Generates the instruments of a requested pair on demand
#[derive(Debug, Clone, Copy)]
pub struct SyntheticSource {
    seed: u64,
}

impl SyntheticSource {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl InstrumentSource for SyntheticSource {
    fn fetch(&self, pair: &FlaggedPair) -> Result<Vec<InstrumentRecord>> {
        Ok(synthetic_instruments(pair.date, &pair.phase, self.seed))
    }
}
