use crate::config::Config;
use crate::driver::{Trajectory, TrajectoryAccumulator};
use crate::stats::{Accumulator, TimeSeries};
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::Serialize;
use serde_value::Value;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

pub trait Obs {
    fn update(&mut self, trajectory: &Trajectory) -> Result<()>;
    fn report(&self) -> Result<Value>;
}

/// Mean total and resistant populations at every step.
pub struct PopSeries {
    acc: TrajectoryAccumulator,
}

impl PopSeries {
    pub fn new(cfg: &Config) -> Self {
        Self {
            acc: TrajectoryAccumulator::new(cfg.output.n_steps, cfg.treatment.is_some()),
        }
    }

    pub fn final_means(&self) -> (f64, Option<f64>) {
        let averages = self.acc.averages();
        let total = averages.total.last().copied().unwrap_or(f64::NAN);
        let resistant = averages.resistant.and_then(|vals| vals.last().copied());
        (total, resistant)
    }
}

impl Obs for PopSeries {
    fn update(&mut self, trajectory: &Trajectory) -> Result<()> {
        self.acc.add(trajectory)
    }

    fn report(&self) -> Result<Value> {
        let total: Vec<_> = self.acc.total().iter().map(Accumulator::report).collect();
        let mut report = vec![("total_pop", to_value(&total)?)];
        if let Some(resistant) = self.acc.resistant() {
            let resistant: Vec<_> = resistant.iter().map(Accumulator::report).collect();
            report.push(("resist_pop", to_value(&resistant)?));
        }
        Ok(named(report))
    }
}

/// Equilibrium population of every trial, averaged across trials.
pub struct EquilPop {
    acc: Accumulator,
    sem_acc: Accumulator,
    n_equil: usize,
}

impl EquilPop {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
            sem_acc: Accumulator::new(),
            n_equil: 0,
        }
    }
}

impl Obs for EquilPop {
    fn update(&mut self, trajectory: &Trajectory) -> Result<()> {
        let time_series: TimeSeries = trajectory
            .total_pop
            .iter()
            .map(|&pop| pop as f64)
            .collect();
        let report = time_series.report();
        self.acc.add(report.mean);
        self.sem_acc.add(report.sem);
        if report.is_equil {
            self.n_equil += 1;
        }
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        Ok(named(vec![(
            "equil_pop",
            named(vec![
                ("mean", to_value(&self.acc.report())?),
                ("sem", to_value(&self.sem_acc.report())?),
                ("n_equil", to_value(&self.n_equil)?),
            ]),
        )]))
    }
}

fn to_value<T: Serialize>(val: &T) -> Result<Value> {
    serde_value::to_value(val).context("failed to convert report")
}

fn named(entries: Vec<(&str, Value)>) -> Value {
    let map: BTreeMap<_, _> = entries
        .into_iter()
        .map(|(key, val)| (Value::String(key.to_string()), val))
        .collect();
    Value::Map(map)
}

pub struct Analyzer {
    cfg: Config,
    pop_series: PopSeries,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(cfg: Config) -> Self {
        let pop_series = PopSeries::new(&cfg);
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![Box::new(EquilPop::new())];
        Self {
            cfg,
            pop_series,
            obs_ptr_vec,
        }
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        for _ in 0..self.cfg.output.trials_per_file {
            let trajectory: Trajectory =
                decode::from_read(&mut reader).context("failed to read trajectory")?;
            self.pop_series
                .update(&trajectory)
                .context("failed to update population series")?;
            for obs in &mut self.obs_ptr_vec {
                obs.update(&trajectory).context("failed to update observable")?;
            }
        }
        Ok(())
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let (total, resistant) = self.pop_series.final_means();
        match resistant {
            Some(resistant) => {
                log::info!("final mean population {total:.2} ({resistant:.2} resistant)")
            }
            None => log::info!("final mean population {total:.2}"),
        }

        let mut reports = vec![self.pop_series.report()?];
        for obs in &self.obs_ptr_vec {
            reports.push(obs.report()?);
        }

        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write_named(&mut writer, &reports).context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InitConfig, ModelConfig, OutputConfig, ResistanceConfig, TreatmentConfig};
    use crate::stats::AccumulatorReport;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct PopSeriesReport {
        total_pop: Vec<AccumulatorReport>,
        resist_pop: Option<Vec<AccumulatorReport>>,
    }

    #[derive(Deserialize)]
    struct EquilPopReport {
        equil_pop: EquilPopFields,
    }

    #[derive(Deserialize)]
    struct EquilPopFields {
        mean: AccumulatorReport,
        sem: AccumulatorReport,
        n_equil: usize,
    }

    fn cfg(n_steps: usize, treated: bool) -> Config {
        Config {
            model: ModelConfig {
                max_pop: 1000,
                max_birth_prob: 0.1,
                clear_prob: 0.05,
                resistance: treated.then(|| ResistanceConfig {
                    mut_prob: 0.005,
                    traits: BTreeMap::from([("guttagonol".to_string(), false)]),
                }),
            },
            init: InitConfig { n_viruses: 100 },
            treatment: treated.then(|| TreatmentConfig {
                tracked_drugs: vec!["guttagonol".to_string()],
                prescriptions: Vec::new(),
            }),
            output: OutputConfig {
                n_steps,
                trials_per_file: 2,
                seed: None,
            },
        }
    }

    fn keys(report: &Value) -> Vec<String> {
        match report {
            Value::Map(map) => map
                .keys()
                .filter_map(|key| match key {
                    Value::String(key) => Some(key.clone()),
                    _ => None,
                })
                .collect(),
            _ => panic!("report must be a map"),
        }
    }

    fn plateau_trajectory() -> Trajectory {
        let total_pop = (0..256)
            .map(|step| {
                if step < 64 {
                    step * 8
                } else if step % 2 == 0 {
                    503
                } else {
                    497
                }
            })
            .collect();
        Trajectory {
            total_pop,
            resist_pop: None,
        }
    }

    #[test]
    fn pop_series_reports_step_mean_and_std_dev() {
        let n_steps = 5;
        let mut obs = PopSeries::new(&cfg(n_steps, false));
        for pop in [2, 4] {
            obs.update(&Trajectory {
                total_pop: vec![pop; n_steps],
                resist_pop: None,
            })
            .unwrap();
        }

        assert_eq!(obs.final_means(), (3.0, None));

        let report = obs.report().unwrap();
        assert_eq!(keys(&report), vec!["total_pop".to_string()]);
        let report: PopSeriesReport = report.deserialize_into().unwrap();
        assert!(report.resist_pop.is_none());
        assert_eq!(report.total_pop.len(), n_steps);
        for step in &report.total_pop {
            assert_eq!(step.n_vals, 2);
            assert_eq!(step.mean, 3.0);
            assert!((step.std_dev - 2.0_f64.sqrt()).abs() < 1e-12);
        }
    }

    #[test]
    fn pop_series_reports_resistant_series_of_treated_runs() {
        let mut obs = PopSeries::new(&cfg(3, true));
        let trials = [
            (vec![10, 12, 14], vec![0, 1, 2]),
            (vec![10, 8, 6], vec![0, 1, 4]),
        ];
        for (total_pop, resist_pop) in trials {
            obs.update(&Trajectory {
                total_pop,
                resist_pop: Some(resist_pop),
            })
            .unwrap();
        }

        assert_eq!(obs.final_means(), (10.0, Some(3.0)));

        let report = obs.report().unwrap();
        assert_eq!(
            keys(&report),
            vec!["resist_pop".to_string(), "total_pop".to_string()]
        );
        let report: PopSeriesReport = report.deserialize_into().unwrap();
        let means: Vec<_> = report.resist_pop.unwrap().iter().map(|step| step.mean).collect();
        assert_eq!(means, vec![0.0, 1.0, 3.0]);
    }

    #[test]
    fn pop_series_rejects_untracked_trajectories() {
        let mut obs = PopSeries::new(&cfg(3, true));
        let untracked = Trajectory {
            total_pop: vec![1, 2, 3],
            resist_pop: None,
        };
        assert!(obs.update(&untracked).is_err());
    }

    #[test]
    fn equil_pop_counts_settled_trials() {
        let ramp = Trajectory {
            total_pop: (0..256).collect(),
            resist_pop: None,
        };
        let mut obs = EquilPop::new();
        obs.update(&plateau_trajectory()).unwrap();
        obs.update(&ramp).unwrap();
        obs.update(&plateau_trajectory()).unwrap();

        let report: EquilPopReport = obs.report().unwrap().deserialize_into().unwrap();
        let equil_pop = report.equil_pop;

        // The ramp never settles: its last half is kept, with mean 191.5.
        assert_eq!(equil_pop.n_equil, 2);
        assert_eq!(equil_pop.mean.n_vals, 3);
        assert!((equil_pop.mean.mean - (500.0 + 500.0 + 191.5) / 3.0).abs() < 1e-9);
        assert_eq!(equil_pop.sem.n_vals, 3);
        assert!(equil_pop.sem.mean.is_finite());
    }
}
