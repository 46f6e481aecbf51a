use crate::config::Config;
use crate::driver::{Trajectory, perform_trial};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Simulation engine.
///
/// Holds the configuration, the random number generator and the number of
/// trials performed so far, and provides methods to run batches of trials,
/// save, and load simulations.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    rng: ChaCha12Rng,
    n_trials: usize,
}

impl Engine {
    /// Create a new `Engine` with the given configuration.
    ///
    /// The generator is seeded from `output.seed` if set, and from the OS otherwise.
    pub fn new(cfg: Config) -> Result<Self> {
        let rng = match cfg.output.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };
        Ok(Self {
            cfg,
            rng,
            n_trials: 0,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn n_trials(&self) -> usize {
        self.n_trials
    }

    /// Perform one batch of trials and save their trajectories to a binary file.
    ///
    /// The file is only created once every trial of the batch has succeeded.
    pub fn perform_trials<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let n_trials = self.cfg.output.trials_per_file;

        let mut trajectories = Vec::with_capacity(n_trials);
        for i_trial in 0..n_trials {
            let trajectory = perform_trial(&self.cfg, &mut self.rng)
                .with_context(|| format!("failed to perform trial {}", self.n_trials + i_trial))?;
            log_trajectory(&trajectory);
            trajectories.push(trajectory);

            let progress = 100.0 * (i_trial + 1) as f64 / n_trials as f64;
            log::info!("completed {progress:06.2}%");
        }

        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        for trajectory in &trajectories {
            encode::write(&mut writer, trajectory).context("failed to serialize trajectory")?;
        }
        writer.flush().context("failed to flush writer stream")?;

        self.n_trials += n_trials;

        Ok(())
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }
}

fn log_trajectory(trajectory: &Trajectory) {
    let total = trajectory.total_pop.last().copied().unwrap_or_default();
    match trajectory.resist_pop.as_ref().and_then(|pop| pop.last()) {
        Some(resistant) => log::debug!("final population {total} ({resistant} resistant)"),
        None => log::debug!("final population {total}"),
    }
}
