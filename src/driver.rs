//! Trial loop and aggregation of population trajectories across trials.

use crate::config::{
    Config, InitConfig, ModelConfig, OutputConfig, Prescription, ResistanceConfig,
    TreatmentConfig,
};
use crate::model::{Patient, ResistantVirus, SimpleVirus, TreatedPatient};
use crate::stats::Accumulator;
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of steps of the reference scenarios.
pub const N_STEPS: usize = 300;
/// Step before which the reference drug is prescribed.
pub const TREATMENT_STEP: usize = 150;
/// Drug prescribed in the reference treated scenario.
pub const REFERENCE_DRUG: &str = "guttagonol";

/// Population sizes recorded after every step of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub total_pop: Vec<usize>,
    /// Viruses resistant to all tracked drugs, for treated trials.
    pub resist_pop: Option<Vec<usize>>,
}

/// Mean population at every step over all trials.
#[derive(Debug, Clone, PartialEq)]
pub struct Averages {
    pub total: Vec<f64>,
    pub resistant: Option<Vec<f64>>,
}

/// Run a single trial of `output.n_steps` steps with a fresh patient.
pub fn perform_trial<R: Rng + ?Sized>(cfg: &Config, rng: &mut R) -> Result<Trajectory> {
    let model = &cfg.model;
    let n_steps = cfg.output.n_steps;
    let Some(resistance) = &model.resistance else {
        if cfg.treatment.is_some() {
            bail!("treatment requires resistance parameters");
        }
        let virus = SimpleVirus::new(model.max_birth_prob, model.clear_prob);
        let viruses = vec![virus; cfg.init.n_viruses];
        let mut patient =
            Patient::new(viruses, model.max_pop).context("failed to construct patient")?;

        let total_pop = (0..n_steps).map(|_| patient.update(rng)).collect();
        return Ok(Trajectory {
            total_pop,
            resist_pop: None,
        });
    };

    let virus = ResistantVirus::new(
        model.max_birth_prob,
        model.clear_prob,
        resistance.traits.clone(),
        resistance.mut_prob,
    )
    .context("failed to construct virus")?;
    let viruses = vec![virus; cfg.init.n_viruses];
    let mut patient =
        TreatedPatient::new(viruses, model.max_pop).context("failed to construct patient")?;

    let mut total_pop = Vec::with_capacity(n_steps);
    let mut resist_pop = cfg.treatment.as_ref().map(|_| Vec::with_capacity(n_steps));

    for step in 0..n_steps {
        if let Some(treatment) = &cfg.treatment {
            for pres in treatment.prescriptions.iter().filter(|pres| pres.step == step) {
                patient.add_prescription(pres.drug.as_str());
            }
        }

        total_pop.push(patient.update(rng));

        if let (Some(treatment), Some(resist_pop)) = (&cfg.treatment, resist_pop.as_mut()) {
            resist_pop.push(patient.resist_pop(treatment.tracked_drugs.as_slice()));
        }
    }

    Ok(Trajectory {
        total_pop,
        resist_pop,
    })
}

/// Per-step accumulators of total and resistant populations.
pub struct TrajectoryAccumulator {
    total: Vec<Accumulator>,
    resistant: Option<Vec<Accumulator>>,
}

impl TrajectoryAccumulator {
    pub fn new(n_steps: usize, track_resistant: bool) -> Self {
        let mut total = Vec::new();
        total.resize_with(n_steps, Accumulator::new);
        let resistant = track_resistant.then(|| {
            let mut resistant = Vec::new();
            resistant.resize_with(n_steps, Accumulator::new);
            resistant
        });
        Self { total, resistant }
    }

    pub fn add(&mut self, trajectory: &Trajectory) -> Result<()> {
        add_series(&mut self.total, &trajectory.total_pop)
            .context("invalid total population series")?;
        match (&mut self.resistant, &trajectory.resist_pop) {
            (Some(acc_vec), Some(series)) => {
                add_series(acc_vec, series).context("invalid resistant population series")?
            }
            (None, None) => {}
            _ => bail!("trajectory does not match the tracked populations"),
        }
        Ok(())
    }

    pub fn total(&self) -> &[Accumulator] {
        &self.total
    }

    pub fn resistant(&self) -> Option<&[Accumulator]> {
        self.resistant.as_deref()
    }

    pub fn averages(&self) -> Averages {
        let means = |acc_vec: &[Accumulator]| -> Vec<f64> {
            acc_vec.iter().map(Accumulator::mean).collect()
        };
        Averages {
            total: means(&self.total[..]),
            resistant: self.resistant.as_deref().map(means),
        }
    }
}

fn add_series(acc_vec: &mut [Accumulator], series: &[usize]) -> Result<()> {
    if series.len() != acc_vec.len() {
        bail!(
            "series length must be {}, but is {}",
            acc_vec.len(),
            series.len()
        );
    }
    for (acc, &val) in acc_vec.iter_mut().zip(series) {
        acc.add(val as f64);
    }
    Ok(())
}

/// Run `n_trials` independent trials of `output.n_steps` steps and average
/// them step by step.
///
/// Trials share the random stream `rng` sequentially. The whole run fails
/// if the configuration is invalid or any trial fails.
pub fn run_trials<R: Rng + ?Sized>(
    cfg: &Config,
    n_trials: usize,
    rng: &mut R,
) -> Result<Averages> {
    cfg.validate().context("invalid configuration")?;
    if n_trials == 0 {
        bail!("invalid configuration: number of trials must be at least 1");
    }

    let mut acc = TrajectoryAccumulator::new(cfg.output.n_steps, cfg.treatment.is_some());
    for i_trial in 0..n_trials {
        let trajectory = perform_trial(cfg, rng)
            .with_context(|| format!("failed to perform trial {i_trial}"))?;
        acc.add(&trajectory)?;
    }

    Ok(acc.averages())
}

/// Average total population of untreated patients over the reference scenario.
pub fn simulate_untreated<R: Rng + ?Sized>(
    n_viruses: usize,
    max_pop: usize,
    max_birth_prob: f64,
    clear_prob: f64,
    n_trials: usize,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let cfg = Config {
        model: ModelConfig {
            max_pop,
            max_birth_prob,
            clear_prob,
            resistance: None,
        },
        init: InitConfig { n_viruses },
        treatment: None,
        output: OutputConfig {
            n_steps: N_STEPS,
            trials_per_file: n_trials,
            seed: None,
        },
    };
    let averages = run_trials(&cfg, n_trials, rng)?;
    Ok(averages.total)
}

/// Average total and guttagonol-resistant populations of treated patients,
/// prescribed guttagonol halfway through the reference scenario.
#[allow(clippy::too_many_arguments)]
pub fn simulate_treated<R: Rng + ?Sized>(
    n_viruses: usize,
    max_pop: usize,
    max_birth_prob: f64,
    clear_prob: f64,
    resistances: BTreeMap<String, bool>,
    mut_prob: f64,
    n_trials: usize,
    rng: &mut R,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let cfg = Config {
        model: ModelConfig {
            max_pop,
            max_birth_prob,
            clear_prob,
            resistance: Some(ResistanceConfig {
                mut_prob,
                traits: resistances,
            }),
        },
        init: InitConfig { n_viruses },
        treatment: Some(TreatmentConfig {
            tracked_drugs: vec![REFERENCE_DRUG.to_string()],
            prescriptions: vec![Prescription {
                step: TREATMENT_STEP,
                drug: REFERENCE_DRUG.to_string(),
            }],
        }),
        output: OutputConfig {
            n_steps: N_STEPS,
            trials_per_file: n_trials,
            seed: None,
        },
    };
    let averages = run_trials(&cfg, n_trials, rng)?;
    let resistant = averages
        .resistant
        .context("treated run is missing the resistant population")?;
    Ok((averages.total, resistant))
}
