use crate::{errors::XpertError, units, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Tunables of the preparation flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XpertConfig {
    pub points_per_hour: f64,
    pub adjustment_window_days: i64,
    pub fallback_adjustment_offset_hours: i64,
    /// Multiple of the half-life added to the last past intake until the
    /// computation time is reached.
    pub half_life_extrapolation_factor: f64,
    pub constraint_lookahead_days: i64,
    pub concentration_unit: String,
    pub intake_horizon_days: i64,
    /// Without covariates and samples, predict with population parameters.
    pub population_when_no_patient_data: bool,
}

impl Default for XpertConfig {
    fn default() -> Self {
        Self {
            points_per_hour: 20.0,
            adjustment_window_days: 7,
            fallback_adjustment_offset_hours: 1,
            half_life_extrapolation_factor: 2.0,
            constraint_lookahead_days: 1,
            concentration_unit: "ug/l".to_string(),
            intake_horizon_days: 30,
            population_when_no_patient_data: true,
        }
    }
}

impl XpertConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: XpertConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.points_per_hour <= 0.0 {
            return Err(XpertError::ConfigError("points_per_hour must be positive".to_string()));
        }
        if self.adjustment_window_days < 0 || self.constraint_lookahead_days < 0 || self.intake_horizon_days < 0 {
            return Err(XpertError::ConfigError("durations must not be negative".to_string()));
        }
        if self.half_life_extrapolation_factor <= 0.0 {
            return Err(XpertError::ConfigError(
                "half_life_extrapolation_factor must be positive".to_string(),
            ));
        }
        if !units::is_concentration(&self.concentration_unit) {
            return Err(XpertError::ConfigError(format!(
                "'{}' is not a concentration unit",
                self.concentration_unit
            )));
        }
        Ok(())
    }
}
