use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub init: InitConfig,
    #[serde(default)]
    pub treatment: Option<TreatmentConfig>,
    pub output: OutputConfig,
}

/// Virus and patient parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Maximum virus population of a patient.
    pub max_pop: usize,
    /// Maximum reproduction probability of a virus.
    pub max_birth_prob: f64,
    /// Clearance probability of a virus.
    pub clear_prob: f64,

    /// Drug resistance parameters. When present, viruses are resistant
    /// viruses and patients are treated patients.
    #[serde(default)]
    pub resistance: Option<ResistanceConfig>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ResistanceConfig {
    /// Probability that an offspring flips each resistance trait.
    pub mut_prob: f64,
    /// Initial resistance of every virus to each drug.
    pub traits: BTreeMap<String, bool>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    /// Initial number of viruses.
    pub n_viruses: usize,
}

/// Drug schedule and tracked resistances of treated trials.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TreatmentConfig {
    /// Drugs whose combined resistance is recorded at every step.
    pub tracked_drugs: Vec<String>,
    /// Prescriptions added before the update of the given step.
    #[serde(default)]
    pub prescriptions: Vec<Prescription>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub step: usize,
    pub drug: String,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of steps of every trial.
    pub n_steps: usize,
    /// Number of trials written per file.
    pub trials_per_file: usize,
    /// Seed of the random number generator. Seeded from the OS if absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    /// Check every parameter, rejecting configurations the simulation cannot run.
    pub fn validate(&self) -> Result<()> {
        check_num(self.model.max_pop, 1..10_000_000).context("invalid maximum population")?;
        check_num(self.model.max_birth_prob, 0.0..=1.0)
            .context("invalid maximum birth probability")?;
        check_num(self.model.clear_prob, 0.0..=1.0).context("invalid clearance probability")?;

        if let Some(resistance) = &self.model.resistance {
            check_num(resistance.mut_prob, 0.0..=1.0).context("invalid mutation probability")?;
            for drug in resistance.traits.keys() {
                check_drug(drug).context("invalid resistance trait")?;
            }
        }

        check_num(self.init.n_viruses, 0..10_000_000)
            .context("invalid initial number of viruses")?;

        check_num(self.output.n_steps, 1..1_000_000).context("invalid number of steps")?;
        check_num(self.output.trials_per_file, 1..1_000_000)
            .context("invalid number of trials per file")?;

        if let Some(treatment) = &self.treatment {
            if self.model.resistance.is_none() {
                bail!("treatment requires resistance parameters");
            }
            for drug in &treatment.tracked_drugs {
                check_drug(drug).context("invalid tracked drug")?;
            }
            for (i_pres, pres) in treatment.prescriptions.iter().enumerate() {
                check_num(pres.step, 0..self.output.n_steps)
                    .with_context(|| format!("invalid step of prescription {i_pres}"))?;
                check_drug(&pres.drug)
                    .with_context(|| format!("invalid drug of prescription {i_pres}"))?;
            }
        }

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_drug(drug: &str) -> Result<()> {
    if drug.trim().is_empty() {
        bail!("drug name must not be empty");
    }
    Ok(())
}
