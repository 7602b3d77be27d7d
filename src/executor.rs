use crate::adjustment::{AdjustmentTrait, PredictionParameterType};
use crate::context::RequestContext;
use crate::drug_model::DrugModel;
use crate::errors::XpertError;
use crate::models::Treatment;
use crate::pipeline::FlowStep;
use crate::services::{AdjustmentData, ComputingService, CycleStatistic, ParameterSet, ParameterValue};
use crate::{units, Result};
use std::sync::Arc;

struct Execution {
    data: AdjustmentData,
    parameters: Vec<ParameterSet>,
    steady_state_statistics: Vec<CycleStatistic>,
}

/// Hands the prepared adjustment trait to the computing engine and gathers
/// the extra predictions needed by the report.
pub struct RequestExecutor {
    computing: Arc<dyn ComputingService>,
}

impl RequestExecutor {
    pub fn new(computing: Arc<dyn ComputingService>) -> Self {
        Self { computing }
    }

    fn execute(&self, ctx: &RequestContext) -> Result<Execution> {
        let treatment = ctx.treatment().ok_or(XpertError::MissingTreatment)?;
        let model = ctx.drug_model().ok_or(XpertError::MissingDrugModel)?;
        let adjustment = ctx.adjustment_trait().ok_or(XpertError::MissingAdjustmentTrait)?;

        let data = self
            .computing
            .compute_adjustment(adjustment, treatment, model)
            .map_err(|e| {
                log::error!("Adjustment computation failed: {}", e);
                XpertError::AdjustmentExecutionFailed
            })?;
        let base_type = adjustment.computing_option.parameter_type;
        let base_parameters = first_cycle_parameters(&data).ok_or(XpertError::NoAdjustmentFound)?;

        let mut parameters = vec![ParameterSet { parameter_type: base_type, values: base_parameters }];

        let steady_state_statistics = self.steady_state_statistics(adjustment, treatment, model)?;

        if base_type == PredictionParameterType::Aposteriori {
            let values = self
                .typical_parameters(adjustment, treatment, model, PredictionParameterType::Apriori)
                .ok_or(XpertError::AprioriParametersFailed)?;
            parameters.push(ParameterSet { parameter_type: PredictionParameterType::Apriori, values });
        }

        let values = self
            .typical_parameters(adjustment, treatment, model, PredictionParameterType::Population)
            .ok_or(XpertError::PopulationParametersFailed)?;
        parameters.push(ParameterSet { parameter_type: PredictionParameterType::Population, values });

        Ok(Execution { data, parameters, steady_state_statistics })
    }

    /// Statistics of the last cycle once the best dosage has been repeated
    /// for the model's steady-state horizon.
    fn steady_state_statistics(
        &self,
        adjustment: &AdjustmentTrait,
        treatment: &Treatment,
        model: &DrugModel,
    ) -> Result<Vec<CycleStatistic>> {
        let half_life = &model.half_life;
        let horizon = units::to_duration(half_life.multiplier * half_life.value, &half_life.unit)?;
        let steady = adjustment.derive(
            adjustment.adjustment_time + horizon,
            adjustment.points_per_hour,
            adjustment.computing_option.parameter_type,
        );

        self.computing
            .compute_adjustment(&steady, treatment, model)
            .ok()
            .and_then(|data| {
                data.adjustments
                    .first()
                    .and_then(|candidate| candidate.cycle_data.last())
                    .map(|cycle| cycle.statistics.clone())
            })
            .ok_or(XpertError::SteadyStateStatisticsFailed)
    }

    fn typical_parameters(
        &self,
        adjustment: &AdjustmentTrait,
        treatment: &Treatment,
        model: &DrugModel,
        parameter_type: PredictionParameterType,
    ) -> Option<Vec<ParameterValue>> {
        let derived = adjustment.derive(adjustment.end, adjustment.points_per_hour, parameter_type);
        match self.computing.compute_adjustment(&derived, treatment, model) {
            Ok(data) => first_cycle_parameters(&data),
            Err(e) => {
                log::error!("{:?} parameters computation failed: {}", parameter_type, e);
                None
            }
        }
    }
}

fn first_cycle_parameters(data: &AdjustmentData) -> Option<Vec<ParameterValue>> {
    let candidate = data.adjustments.first()?;
    Some(
        candidate
            .cycle_data
            .first()
            .map(|cycle| cycle.parameters.clone())
            .unwrap_or_default(),
    )
}

impl FlowStep for RequestExecutor {
    fn name(&self) -> &'static str {
        "request execution"
    }

    fn perform(&self, ctx: &mut RequestContext) {
        match self.execute(ctx) {
            Ok(execution) => {
                log::info!("{} adjustment candidates computed", execution.data.adjustments.len());
                ctx.set_adjustment_data(execution.data);
                for parameters in execution.parameters {
                    ctx.add_parameters(parameters);
                }
                ctx.set_steady_state_statistics(execution.steady_state_statistics);
            }
            Err(e) => ctx.set_error(e.to_string()),
        }
    }
}
