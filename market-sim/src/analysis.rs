//! Post-run analysis over recorded price series.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::SimResult;
use crate::types::Price;
use crate::world::World;

pub const DEFAULT_BATCH_LEN: usize = 25;
pub const DEFAULT_ALPHA: f64 = 0.05;
pub const DEFAULT_PERMUTATIONS: usize = 10_000;

// ============================================================================
// Steady state
// ============================================================================

/// Tail of a price series judged to be in steady state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteadyState {
    /// Tick indices of the retained prices
    pub indices: Vec<usize>,
    pub prices: Vec<Price>,
}

impl SteadyState {
    fn from_start(prices: &[Price], start: usize) -> Self {
        Self {
            indices: (start..prices.len()).collect(),
            prices: prices[start..].to_vec(),
        }
    }

    pub fn start(&self) -> Option<usize> {
        self.indices.first().copied()
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Two-sided permutation test on the difference of means.
///
/// Returns the p-value with the +1 correction, so it is never exactly zero.
pub fn permutation_test<R: Rng + ?Sized>(
    a: &[f64],
    b: &[f64],
    permutations: usize,
    rng: &mut R,
) -> f64 {
    let observed = (mean(a) - mean(b)).abs();
    let mut pooled: Vec<f64> = a.iter().chain(b).copied().collect();

    let mut extreme = 0usize;
    for _ in 0..permutations {
        pooled.shuffle(rng);
        let (left, right) = pooled.split_at(a.len());
        if (mean(left) - mean(right)).abs() >= observed {
            extreme += 1;
        }
    }

    (extreme + 1) as f64 / (permutations + 1) as f64
}

/// Find where a price series settles.
///
/// Prices are averaged in batches of `batch_len`; for each split of the batch
/// means into a prefix and a suffix, a permutation test compares the two. The
/// first split whose p-value exceeds `alpha` marks the start of the steady
/// state. If none does, the whole series is returned.
pub fn steady_state<R: Rng + ?Sized>(
    prices: &[Price],
    batch_len: usize,
    alpha: f64,
    permutations: usize,
    rng: &mut R,
) -> SteadyState {
    let batch_len = batch_len.max(1);
    let batch_means: Vec<f64> = prices.chunks(batch_len).map(mean).collect();

    for split in 1..batch_means.len() {
        let (head, tail) = batch_means.split_at(split);
        if permutation_test(head, tail, permutations, rng) > alpha {
            return SteadyState::from_start(prices, batch_len * split);
        }
    }

    SteadyState::from_start(prices, 0)
}

// ============================================================================
// Trend line
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub slope: f64,
    pub intercept: f64,
}

impl Trend {
    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Least-squares line through `(xs, ys)`. `None` for fewer than two points or
/// constant `xs`.
pub fn linear_trend(xs: &[f64], ys: &[f64]) -> Option<Trend> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let (mx, my) = (mean(xs), mean(ys));

    let sxx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mx) * (y - my)).sum();

    let slope = sxy / sxx;
    Some(Trend {
        slope,
        intercept: my - slope * mx,
    })
}

// ============================================================================
// Friction sweep
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub friction_rate: f64,
    /// Total friction profit per run, averaged over runs
    pub mean_profit: f64,
}

/// Run `runs` seeded copies of `base` at each friction rate and average the
/// market's total friction profit. Run `r` uses seed `base.seed + r`.
pub fn friction_sweep(base: &RunConfig, rates: &[f64], runs: u32) -> SimResult<Vec<SweepPoint>> {
    let mut points = Vec::with_capacity(rates.len());
    for &friction_rate in rates {
        let mut total = 0.0;
        for run in 0..runs {
            let mut config = base.clone().with_seed(base.seed.wrapping_add(u64::from(run)));
            config.market.friction_rate = Some(friction_rate);

            let mut world = World::from_config(&config)?;
            world.run(config.ticks)?;
            total += world.total_friction_profit();
        }
        points.push(SweepPoint {
            friction_rate,
            mean_profit: if runs == 0 { 0.0 } else { total / f64::from(runs) },
        });
    }
    Ok(points)
}
