use crate::models::{DateTime, FormulationAndRouteSelectionOption, TargetExtractionOption};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionParameterType {
    Population,
    Apriori,
    Aposteriori,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompartmentsOption {
    AllActiveMoieties,
    AllAnalytes,
    AllCompartments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BestCandidatesOption {
    AllDosages,
    BestDosage,
    BestDosagePerInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadingPolicy {
    NoLoadingDose,
    LoadingDoseAllowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestPeriodPolicy {
    NoRestPeriod,
    RestPeriodAllowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SteadyStateTargetOption {
    AtSteadyState,
    WithinTreatmentTimeRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputingOption {
    pub parameter_type: PredictionParameterType,
    pub compartments: CompartmentsOption,
    pub retrieve_statistics: bool,
    pub retrieve_parameters: bool,
    pub retrieve_covariates: bool,
    /// Concentrations are reported in this unit.
    pub forced_concentration_unit: String,
}

impl ComputingOption {
    pub fn full(parameter_type: PredictionParameterType, concentration_unit: &str) -> Self {
        Self {
            parameter_type,
            compartments: CompartmentsOption::AllActiveMoieties,
            retrieve_statistics: true,
            retrieve_parameters: true,
            retrieve_covariates: true,
            forced_concentration_unit: concentration_unit.to_string(),
        }
    }
}

/// Instruction handed to the computing engine for a dose adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentTrait {
    pub start: DateTime,
    pub end: DateTime,
    pub adjustment_time: DateTime,
    pub points_per_hour: f64,
    pub computing_option: ComputingOption,
    pub best_candidates: BestCandidatesOption,
    pub loading: LoadingPolicy,
    pub rest_period: RestPeriodPolicy,
    pub steady_state_target: SteadyStateTargetOption,
    pub target_extraction: TargetExtractionOption,
    pub formulation_and_route_selection: FormulationAndRouteSelectionOption,
}

impl AdjustmentTrait {
    /// Copy with another horizon, density and parameter type. Derived traits
    /// always ask for the single best dosage.
    pub fn derive(&self, end: DateTime, points_per_hour: f64, parameter_type: PredictionParameterType) -> Self {
        let mut derived = self.clone();
        derived.end = end;
        derived.points_per_hour = points_per_hour;
        derived.computing_option.parameter_type = parameter_type;
        derived.best_candidates = BestCandidatesOption::BestDosage;
        derived
    }
}

/// Instruction for a percentile prediction around a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentilesTrait {
    pub start: DateTime,
    pub end: DateTime,
    pub ranks: Vec<u32>,
    pub points_per_hour: f64,
    pub parameter_type: PredictionParameterType,
    pub compartments: CompartmentsOption,
}
