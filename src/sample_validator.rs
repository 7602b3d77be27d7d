use crate::adjustment::{CompartmentsOption, PercentilesTrait, PredictionParameterType};
use crate::config::XpertConfig;
use crate::context::{RequestContext, SampleResult};
use crate::errors::XpertError;
use crate::models::{Sample, SampleId};
use crate::pipeline::FlowStep;
use crate::services::{ComputingService, CycleData, PercentilesData};
use crate::{units, Result};
use chrono::Duration;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Places every sample among the a priori percentiles of the population.
pub struct SampleValidator {
    computing: Arc<dyn ComputingService>,
    config: XpertConfig,
}

impl SampleValidator {
    pub fn new(computing: Arc<dyn ComputingService>, config: XpertConfig) -> Self {
        Self { computing, config }
    }

    fn validate(&self, ctx: &RequestContext) -> Result<BTreeMap<SampleId, SampleResult>> {
        let treatment = ctx.treatment().ok_or(XpertError::MissingTreatment)?;
        if !treatment.samples.is_empty() && treatment.dosage_history.is_empty() {
            return Err(XpertError::SamplesWithoutDosage);
        }
        let model = ctx.drug_model().ok_or(XpertError::MissingDrugModel)?;

        let mut results = BTreeMap::new();
        for sample in &treatment.samples {
            let percentiles = PercentilesTrait {
                start: sample.date - Duration::hours(1),
                end: sample.date + Duration::hours(1),
                ranks: (1..=99).collect(),
                points_per_hour: self.config.points_per_hour,
                parameter_type: PredictionParameterType::Apriori,
                compartments: CompartmentsOption::AllActiveMoieties,
            };

            let data = self
                .computing
                .compute_percentiles(&percentiles, treatment, model)
                .map_err(|e| {
                    log::error!("Percentiles around sample {} failed: {}", sample.date, e);
                    XpertError::PercentilesFailed
                })?;

            let group = Self::group_over_99_percentile(sample, &data)?;
            results.insert(sample.id, SampleResult { sample_id: sample.id, group_over_99_percentile: group });
        }

        Ok(results)
    }

    /// Rank of the first percentile at or above the sample, 100 when the
    /// sample exceeds them all.
    pub fn group_over_99_percentile(sample: &Sample, data: &PercentilesData) -> Result<u32> {
        let invalid = |details: &str| XpertError::InvalidSample {
            date: sample.date.to_string(),
            details: details.to_string(),
        };

        for (rank, cycles) in data.ranks.iter().zip(&data.percentiles) {
            let cycle = cycles
                .iter()
                .find(|c| c.start <= sample.date && sample.date <= c.end)
                .ok_or_else(|| invalid("No cycle data contains the sample date."))?;

            let value = units::convert(sample.value, &sample.unit, &cycle.unit)
                .map_err(|e| invalid(&e.to_string()))?;
            let hours = (sample.date - cycle.start).num_seconds() as f64 / 3600.0;
            let percentile = Self::concentration_at(cycle, hours)
                .ok_or_else(|| invalid("No concentration predicted at the sample date."))?;

            if value <= percentile {
                return Ok(*rank);
            }
        }

        Ok(100)
    }

    /// Linear interpolation between the two points around `hours`.
    fn concentration_at(cycle: &CycleData, hours: f64) -> Option<f64> {
        let points: Vec<(f64, f64)> = cycle
            .times
            .iter()
            .copied()
            .zip(cycle.concentrations.iter().copied())
            .collect();

        points.windows(2).find_map(|pair| {
            let ((t0, c0), (t1, c1)) = (pair[0], pair[1]);
            if hours < t0 || hours > t1 {
                return None;
            }
            if t1 - t0 <= f64::EPSILON {
                return Some(c0);
            }
            Some(c0 + (c1 - c0) * (hours - t0) / (t1 - t0))
        })
        .or_else(|| match points.as_slice() {
            [(t, c)] if (t - hours).abs() <= f64::EPSILON => Some(*c),
            _ => None,
        })
    }
}

impl FlowStep for SampleValidator {
    fn name(&self) -> &'static str {
        "sample validation"
    }

    fn perform(&self, ctx: &mut RequestContext) {
        match self.validate(ctx) {
            Ok(results) => ctx.set_sample_results(results),
            Err(e) => ctx.set_error(e.to_string()),
        }
    }
}
