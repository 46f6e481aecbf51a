//! Stochastic simulation of virus populations in untreated and drug-treated patients.

pub mod analysis;
pub mod config;
pub mod driver;
pub mod engine;
pub mod manager;
pub mod model;
pub mod stats;
