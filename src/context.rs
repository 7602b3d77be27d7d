use crate::adjustment::AdjustmentTrait;
use crate::drug_model::DrugModel;
use crate::intakes::IntakeEvent;
use crate::models::{DataType, DateTime, DoseId, SampleId, Treatment, XpertRequest};
use crate::services::{AdjustmentData, CycleStatistic, ParameterSet};
use crate::warnings::Warning;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovariateSource {
    Patient,
    Model,
}

/// Effective value of one covariate definition of the selected model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateResult {
    pub definition_id: String,
    pub source: CovariateSource,
    pub value: String,
    pub unit: String,
    pub data_type: DataType,
    /// Measurement date of the patient value.
    pub date: Option<DateTime>,
    pub warning: Option<Warning>,
}

impl CovariateResult {
    pub fn get_type(&self) -> CovariateSource {
        self.source
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseResult {
    pub dose_id: DoseId,
    pub warning: Option<Warning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleResult {
    pub sample_id: SampleId,
    /// 1..=100; group `n` lies between percentiles `n-1` and `n`.
    pub group_over_99_percentile: u32,
}

/// Mutable accumulator for one request, threaded through every flow step.
/// Once `error` is set the decision fields are frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    request: XpertRequest,
    treatment: Option<Treatment>,
    computation_time: DateTime,
    drug_model: Option<Arc<DrugModel>>,
    covariate_results: Vec<CovariateResult>,
    soft_constraint_failures: Vec<String>,
    dose_results: BTreeMap<DoseId, DoseResult>,
    sample_results: BTreeMap<SampleId, SampleResult>,
    last_intake: Option<IntakeEvent>,
    adjustment_trait: Option<AdjustmentTrait>,
    adjustment_data: Option<AdjustmentData>,
    parameters: Vec<ParameterSet>,
    steady_state_statistics: Vec<CycleStatistic>,
    error: String,
}

impl RequestContext {
    pub fn new(request: XpertRequest, treatment: Option<Treatment>, computation_time: DateTime) -> Self {
        Self {
            request,
            treatment,
            computation_time,
            drug_model: None,
            covariate_results: Vec::new(),
            soft_constraint_failures: Vec::new(),
            dose_results: BTreeMap::new(),
            sample_results: BTreeMap::new(),
            last_intake: None,
            adjustment_trait: None,
            adjustment_data: None,
            parameters: Vec::new(),
            steady_state_statistics: Vec::new(),
            error: String::new(),
        }
    }

    pub fn request(&self) -> &XpertRequest {
        &self.request
    }

    pub fn treatment(&self) -> Option<&Treatment> {
        self.treatment.as_ref()
    }

    pub fn computation_time(&self) -> DateTime {
        self.computation_time
    }

    pub fn drug_model(&self) -> Option<&Arc<DrugModel>> {
        self.drug_model.as_ref()
    }

    pub fn covariate_results(&self) -> &[CovariateResult] {
        &self.covariate_results
    }

    pub fn soft_constraint_failures(&self) -> &[String] {
        &self.soft_constraint_failures
    }

    pub fn dose_results(&self) -> &BTreeMap<DoseId, DoseResult> {
        &self.dose_results
    }

    pub fn sample_results(&self) -> &BTreeMap<SampleId, SampleResult> {
        &self.sample_results
    }

    pub fn last_intake(&self) -> Option<&IntakeEvent> {
        self.last_intake.as_ref()
    }

    pub fn adjustment_trait(&self) -> Option<&AdjustmentTrait> {
        self.adjustment_trait.as_ref()
    }

    pub fn adjustment_data(&self) -> Option<&AdjustmentData> {
        self.adjustment_data.as_ref()
    }

    pub fn parameters(&self) -> &[ParameterSet] {
        &self.parameters
    }

    pub fn steady_state_statistics(&self) -> &[CycleStatistic] {
        &self.steady_state_statistics
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn should_continue_processing(&self) -> bool {
        self.error.is_empty()
    }

    /// The first error wins; later ones are only logged.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.error.is_empty() {
            self.error = message;
        } else {
            log::debug!("Ignoring error on terminated request: {}", message);
        }
    }

    /// Binds the selected model. A model is bound at most once.
    pub fn bind_drug_model(&mut self, model: Arc<DrugModel>, covariate_results: Vec<CovariateResult>) {
        if !self.should_continue_processing() {
            return;
        }
        if let Some(bound) = &self.drug_model {
            log::warn!("Drug model {} already bound, ignoring {}", bound.id, model.id);
            return;
        }
        self.drug_model = Some(model);
        self.covariate_results = covariate_results;
    }

    pub fn set_soft_constraint_failures(&mut self, failures: Vec<String>) {
        if self.should_continue_processing() {
            self.soft_constraint_failures = failures;
        }
    }

    pub fn set_dose_results(&mut self, results: BTreeMap<DoseId, DoseResult>) {
        if self.should_continue_processing() {
            self.dose_results = results;
        }
    }

    pub fn set_sample_results(&mut self, results: BTreeMap<SampleId, SampleResult>) {
        if self.should_continue_processing() {
            self.sample_results = results;
        }
    }

    pub fn set_last_intake(&mut self, intake: Option<IntakeEvent>) {
        if self.should_continue_processing() {
            self.last_intake = intake;
        }
    }

    pub fn set_adjustment_trait(&mut self, adjustment: AdjustmentTrait) {
        if self.should_continue_processing() {
            self.adjustment_trait = Some(adjustment);
        }
    }

    pub fn set_adjustment_data(&mut self, data: AdjustmentData) {
        if self.should_continue_processing() {
            self.adjustment_data = Some(data);
        }
    }

    pub fn add_parameters(&mut self, parameters: ParameterSet) {
        if self.should_continue_processing() {
            self.parameters.push(parameters);
        }
    }

    pub fn set_steady_state_statistics(&mut self, statistics: Vec<CycleStatistic>) {
        if self.should_continue_processing() {
            self.steady_state_statistics = statistics;
        }
    }
}
