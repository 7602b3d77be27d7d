//! Dose-adjustment request flow
//!
//! This library takes a patient's treatment and a dose-adjustment request,
//! selects the most suitable drug model, validates doses, samples and targets,
//! and builds the adjustment instruction handed to a computing engine.

pub mod models;
pub mod drug_model;
pub mod units;
pub mod warnings;
pub mod adjustment;
pub mod services;
pub mod context;
pub mod config;
pub mod intakes;
pub mod covariate;
pub mod selector;
pub mod dose_validator;
pub mod sample_validator;
pub mod target_validator;
pub mod scheduler;
pub mod executor;
pub mod pipeline;
pub mod output;
pub mod example_data;
pub mod errors;

pub use models::*;
pub use pipeline::*;
pub use errors::*;

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, XpertError>;
