use anyhow::{Result, bail};
use rand::prelude::*;
use rand_distr::Bernoulli;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of a single reproduction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Offspring<V> {
    Reproduced(V),
    NoOffspring,
}

/// Behaviour shared by every virus variant.
///
/// Virus particles are immutable: reproduction builds a new particle and
/// never touches the parent.
pub trait Virus: Sized {
    /// Draw one uniform sample and report whether the particle is cleared.
    fn does_clear<R: Rng + ?Sized>(&self, rng: &mut R) -> bool;

    /// Attempt to reproduce at the given population density while
    /// `active_drugs` act on the particle.
    fn reproduce<R: Rng + ?Sized>(
        &self,
        pop_density: f64,
        active_drugs: &BTreeSet<String>,
        rng: &mut R,
    ) -> Offspring<Self>;

    /// Whether the particle resists every drug in `drugs`.
    fn is_resistant_to_all<S: AsRef<str>>(&self, drugs: &[S]) -> bool;
}

/// Virus particle without any drug model.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleVirus {
    max_birth_prob: f64,
    clear_prob: f64,
}

impl SimpleVirus {
    pub fn new(max_birth_prob: f64, clear_prob: f64) -> Self {
        Self {
            max_birth_prob,
            clear_prob,
        }
    }

    pub fn max_birth_prob(&self) -> f64 {
        self.max_birth_prob
    }

    pub fn clear_prob(&self) -> f64 {
        self.clear_prob
    }
}

impl Virus for SimpleVirus {
    fn does_clear<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.random::<f64>() < self.clear_prob
    }

    // Drugs do not act on simple viruses.
    fn reproduce<R: Rng + ?Sized>(
        &self,
        pop_density: f64,
        _active_drugs: &BTreeSet<String>,
        rng: &mut R,
    ) -> Offspring<Self> {
        if draw_birth(self.max_birth_prob, pop_density, rng) {
            Offspring::Reproduced(self.clone())
        } else {
            Offspring::NoOffspring
        }
    }

    fn is_resistant_to_all<S: AsRef<str>>(&self, drugs: &[S]) -> bool {
        drugs.is_empty()
    }
}

/// Virus particle carrying a drug resistance trait per drug.
#[derive(Debug, Clone, PartialEq)]
pub struct ResistantVirus {
    max_birth_prob: f64,
    clear_prob: f64,
    resistances: BTreeMap<String, bool>,
    mut_prob: f64,
    mut_dist: Bernoulli,
}

impl ResistantVirus {
    /// Create a new resistant virus.
    ///
    /// # Errors
    /// Returns an error if `mut_prob` is not a probability.
    pub fn new(
        max_birth_prob: f64,
        clear_prob: f64,
        resistances: BTreeMap<String, bool>,
        mut_prob: f64,
    ) -> Result<Self> {
        let mut_dist = Bernoulli::new(mut_prob)?;
        Ok(Self {
            max_birth_prob,
            clear_prob,
            resistances,
            mut_prob,
            mut_dist,
        })
    }

    pub fn max_birth_prob(&self) -> f64 {
        self.max_birth_prob
    }

    pub fn clear_prob(&self) -> f64 {
        self.clear_prob
    }

    pub fn mut_prob(&self) -> f64 {
        self.mut_prob
    }

    pub fn resistances(&self) -> &BTreeMap<String, bool> {
        &self.resistances
    }

    /// Resistance to a single drug. Drugs missing from the mapping are not resisted.
    pub fn is_resistant_to(&self, drug: &str) -> bool {
        self.resistances.get(drug).copied().unwrap_or(false)
    }
}

impl Virus for ResistantVirus {
    fn does_clear<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.random::<f64>() < self.clear_prob
    }

    fn reproduce<R: Rng + ?Sized>(
        &self,
        pop_density: f64,
        active_drugs: &BTreeSet<String>,
        rng: &mut R,
    ) -> Offspring<Self> {
        if !active_drugs.iter().all(|drug| self.is_resistant_to(drug)) {
            return Offspring::NoOffspring;
        }
        if !draw_birth(self.max_birth_prob, pop_density, rng) {
            return Offspring::NoOffspring;
        }

        // Each trait flips independently of the birth draw and of the other traits.
        let resistances = self
            .resistances
            .iter()
            .map(|(drug, &resistant)| {
                let flip = self.mut_dist.sample(rng);
                (drug.clone(), resistant != flip)
            })
            .collect();

        Offspring::Reproduced(Self {
            max_birth_prob: self.max_birth_prob,
            clear_prob: self.clear_prob,
            resistances,
            mut_prob: self.mut_prob,
            mut_dist: self.mut_dist,
        })
    }

    fn is_resistant_to_all<S: AsRef<str>>(&self, drugs: &[S]) -> bool {
        drugs.iter().all(|drug| self.is_resistant_to(drug.as_ref()))
    }
}

fn draw_birth<R: Rng + ?Sized>(max_birth_prob: f64, pop_density: f64, rng: &mut R) -> bool {
    let birth_prob = max_birth_prob * (1.0 - pop_density);
    rng.random::<f64>() < birth_prob
}

/// Virus population of a patient bounded by a maximum population.
#[derive(Debug, Clone)]
pub struct Patient<V> {
    viruses: Vec<V>,
    max_pop: usize,
}

impl<V: Virus> Patient<V> {
    /// Create a new patient.
    ///
    /// # Errors
    /// Returns an error if `max_pop` is zero, since the population density
    /// would be undefined.
    pub fn new(viruses: Vec<V>, max_pop: usize) -> Result<Self> {
        if max_pop == 0 {
            bail!("invalid configuration: maximum population must be at least 1");
        }
        Ok(Self { viruses, max_pop })
    }

    pub fn viruses(&self) -> &[V] {
        &self.viruses
    }

    pub fn max_pop(&self) -> usize {
        self.max_pop
    }

    pub fn total_pop(&self) -> usize {
        self.viruses.len()
    }

    /// Advance the population by one time step and return its new size.
    pub fn update<R: Rng + ?Sized>(&mut self, rng: &mut R) -> usize {
        self.update_with_drugs(&BTreeSet::new(), rng)
    }

    fn update_with_drugs<R: Rng + ?Sized>(
        &mut self,
        active_drugs: &BTreeSet<String>,
        rng: &mut R,
    ) -> usize {
        // Clear viruses first.
        self.viruses.retain(|virus| !virus.does_clear(rng));

        // Density is fixed for every reproduction attempt of this step.
        let pop_density = self.viruses.len() as f64 / self.max_pop as f64;

        // Only survivors reproduce, offspring wait for the next step.
        let offspring: Vec<V> = self
            .viruses
            .iter()
            .filter_map(|virus| match virus.reproduce(pop_density, active_drugs, rng) {
                Offspring::Reproduced(child) => Some(child),
                Offspring::NoOffspring => None,
            })
            .collect();
        self.viruses.extend(offspring);

        self.viruses.len()
    }
}

/// Patient whose resistant virus population is exposed to prescribed drugs.
#[derive(Debug, Clone)]
pub struct TreatedPatient {
    patient: Patient<ResistantVirus>,
    prescriptions: BTreeSet<String>,
}

impl TreatedPatient {
    /// Create a new treated patient with no prescriptions.
    ///
    /// # Errors
    /// Returns an error if `max_pop` is zero.
    pub fn new(viruses: Vec<ResistantVirus>, max_pop: usize) -> Result<Self> {
        Ok(Self {
            patient: Patient::new(viruses, max_pop)?,
            prescriptions: BTreeSet::new(),
        })
    }

    /// Prescribe a drug for every later step. Prescribing a drug twice has no effect.
    pub fn add_prescription<S: Into<String>>(&mut self, drug: S) {
        self.prescriptions.insert(drug.into());
    }

    pub fn prescriptions(&self) -> &BTreeSet<String> {
        &self.prescriptions
    }

    pub fn viruses(&self) -> &[ResistantVirus] {
        self.patient.viruses()
    }

    pub fn max_pop(&self) -> usize {
        self.patient.max_pop()
    }

    pub fn total_pop(&self) -> usize {
        self.patient.total_pop()
    }

    /// Number of viruses resistant to all of `drugs`.
    pub fn resist_pop<S: AsRef<str>>(&self, drugs: &[S]) -> usize {
        self.patient
            .viruses()
            .iter()
            .filter(|virus| virus.is_resistant_to_all(drugs))
            .count()
    }

    /// Advance the population by one time step under the current prescriptions.
    pub fn update<R: Rng + ?Sized>(&mut self, rng: &mut R) -> usize {
        self.patient.update_with_drugs(&self.prescriptions, rng)
    }
}
