use serde::{Deserialize, Serialize};

/// Running mean and variance of a stream of values (Welford's algorithm).
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    pub fn mean(&self) -> f64 {
        if self.n_vals == 0 { f64::NAN } else { self.mean }
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            n_vals: self.n_vals,
            mean: self.mean(),
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                f64::NAN
            },
        }
    }
}

/// Population trajectory of a single trial, analysed after its transient.
pub struct TimeSeries {
    vals: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesReport {
    pub i_equil: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub sem: f64,
    pub is_equil: bool,
}

impl TimeSeries {
    /// Statistics of the values after the equilibration index.
    ///
    /// `is_equil` is false when no candidate index beats the fallback of
    /// discarding the first half, which usually means the population has
    /// not settled yet.
    pub fn report(&self) -> TimeSeriesReport {
        let i_equil = compute_opt_i_equil(&self.vals);
        let equil_vals = &self.vals[i_equil..];
        TimeSeriesReport {
            i_equil,
            mean: compute_mean(equil_vals),
            std_dev: compute_var(equil_vals).sqrt(),
            sem: compute_sem(equil_vals),
            is_equil: i_equil != self.vals.len() / 2,
        }
    }
}

impl FromIterator<f64> for TimeSeries {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self {
            vals: iter.into_iter().collect(),
        }
    }
}

fn compute_mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::NAN;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}

fn compute_var(vals: &[f64]) -> f64 {
    let n_vals = vals.len();
    if n_vals < 2 {
        return f64::NAN;
    }
    let mean = compute_mean(vals);
    vals.iter().map(|&val| (val - mean).powi(2)).sum::<f64>() / (n_vals - 1) as f64
}

/// Standard error of the mean of correlated values.
///
/// Population sizes of consecutive steps are strongly correlated, so the
/// naive `std_dev / sqrt(n)` underestimates the error. Adjacent values are
/// averaged pairwise (Flyvbjerg-Petersen blocking) until the SEM estimate
/// of a level is no longer below the lower error bound of the coarser
/// levels, and that estimate is returned.
fn compute_sem(vals: &[f64]) -> f64 {
    let mut blk_vals = vals.to_vec();
    let mut n_vals = blk_vals.len();
    let mut sem2_ests = Vec::new();
    let mut sem2_errs = Vec::new();

    while n_vals >= 2 {
        let sem2_est = compute_var(&blk_vals) / n_vals as f64;
        let sem2_err = sem2_est * (2.0 / (n_vals as f64 - 1.0)).sqrt();
        sem2_ests.push(sem2_est);
        sem2_errs.push(sem2_err);

        blk_vals = blk_vals
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
            .collect();
        n_vals = blk_vals.len();
    }

    for (idx, &sem2_est) in sem2_ests.iter().enumerate() {
        let max_low = sem2_ests[idx..]
            .iter()
            .zip(sem2_errs[idx..].iter())
            .map(|(s, e)| s - e)
            .fold(f64::NEG_INFINITY, f64::max);

        if sem2_est > max_low {
            return sem2_est.sqrt();
        }
    }

    sem2_ests.last().copied().unwrap_or(f64::NAN).sqrt()
}

/// First step of the settled part of a population trajectory.
///
/// Candidate indices are `n / 2^k`, from the start up to the midpoint. The
/// one whose tail minimises the marginal standard error
/// `var * (m - 1) / m^2` (MSER, `m` the tail length) wins, which cuts off
/// the initial growth or decay of the population. Trajectories too short to
/// have a tail variance keep every value.
fn compute_opt_i_equil(vals: &[f64]) -> usize {
    let n_vals = vals.len();
    if n_vals < 2 {
        return 0;
    }
    let mut min_mse = f64::INFINITY;
    let mut opt_i_equil = n_vals / 2;
    let n_idxs = n_vals.ilog2() + 1;

    for idx in 0..n_idxs {
        let i_equil = n_vals / 2_usize.pow(n_idxs - idx);
        let tail = &vals[i_equil..];
        let n_tail = tail.len();

        let mse = compute_var(tail) * (n_tail - 1) as f64 / n_tail.pow(2) as f64;

        if mse < min_mse {
            min_mse = mse;
            opt_i_equil = i_equil;
        }
    }

    opt_i_equil
}
