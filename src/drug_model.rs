use crate::models::{DataType, FormulationAndRoute, TargetType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Soft validation attached to a covariate definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationRule {
    Range { min: Option<f64>, max: Option<f64> },
    OneOf(Vec<f64>),
}

impl ValidationRule {
    pub fn accepts(&self, value: f64) -> bool {
        match self {
            ValidationRule::Range { min, max } => {
                min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
            }
            ValidationRule::OneOf(values) => values.iter().any(|v| (v - value).abs() < f64::EPSILON),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateDefinition {
    pub id: String,
    pub default_value: f64,
    #[serde(default)]
    pub unit: String,
    pub data_type: DataType,
    /// Derived from other covariates, never supplied by the patient.
    #[serde(default)]
    pub computed: bool,
    #[serde(default)]
    pub validation: Option<ValidationRule>,
}

impl CovariateDefinition {
    pub fn new(id: &str, default_value: f64, unit: &str, data_type: DataType) -> Self {
        Self {
            id: id.to_string(),
            default_value,
            unit: unit.to_string(),
            data_type,
            computed: false,
            validation: None,
        }
    }

    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validation = Some(rule);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    Hard,
    Soft,
}

/// Boolean rule over covariate values expressed in the definitions' units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintRule {
    Range {
        covariate: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    Equals {
        covariate: String,
        value: f64,
    },
    All(Vec<ConstraintRule>),
    Any(Vec<ConstraintRule>),
    Not(Box<ConstraintRule>),
}

impl ConstraintRule {
    pub fn required_covariates(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.collect_covariates(&mut ids);
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn collect_covariates<'a>(&'a self, ids: &mut Vec<&'a str>) {
        match self {
            ConstraintRule::Range { covariate, .. } | ConstraintRule::Equals { covariate, .. } => {
                ids.push(covariate)
            }
            ConstraintRule::All(rules) | ConstraintRule::Any(rules) => {
                rules.iter().for_each(|r| r.collect_covariates(ids))
            }
            ConstraintRule::Not(rule) => rule.collect_covariates(ids),
        }
    }

    /// Values missing from `values` make the rule fail.
    pub fn evaluate(&self, values: &HashMap<String, f64>) -> bool {
        match self {
            ConstraintRule::Range { covariate, min, max } => values.get(covariate).map_or(false, |v| {
                min.map_or(true, |m| *v >= m) && max.map_or(true, |m| *v <= m)
            }),
            ConstraintRule::Equals { covariate, value } => values
                .get(covariate)
                .map_or(false, |v| (v - value).abs() < f64::EPSILON),
            ConstraintRule::All(rules) => rules.iter().all(|r| r.evaluate(values)),
            ConstraintRule::Any(rules) => rules.iter().any(|r| r.evaluate(values)),
            ConstraintRule::Not(rule) => !rule.evaluate(values),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConstraint {
    pub id: String,
    pub kind: ConstraintKind,
    pub rule: ConstraintRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidDoses {
    pub from: f64,
    pub to: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardTreatment {
    pub duration: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullFormulationAndRoute {
    pub formulation_and_route: FormulationAndRoute,
    pub valid_doses: ValidDoses,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub standard_treatment: Option<StandardTreatment>,
    #[serde(default)]
    pub loading_dose_recommended: Option<bool>,
    #[serde(default)]
    pub rest_period_recommended: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDefinition {
    pub target_type: TargetType,
    pub min: f64,
    pub best: f64,
    pub max: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveMoiety {
    pub id: String,
    #[serde(default)]
    pub analyte_ids: Vec<String>,
    #[serde(default)]
    pub targets: Vec<TargetDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HalfLife {
    pub value: f64,
    pub unit: String,
    /// Number of half-lives considered enough to reach steady state.
    pub multiplier: f64,
}

/// A pharmacokinetic model candidate for a drug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugModel {
    pub id: String,
    pub drug_id: String,
    #[serde(default)]
    pub covariates: Vec<CovariateDefinition>,
    #[serde(default)]
    pub constraints: Vec<DomainConstraint>,
    pub formulation_and_routes: Vec<FullFormulationAndRoute>,
    #[serde(default)]
    pub active_moieties: Vec<ActiveMoiety>,
    pub half_life: HalfLife,
}

impl DrugModel {
    pub fn formulation_and_route(&self, wanted: &FormulationAndRoute) -> Option<&FullFormulationAndRoute> {
        self.formulation_and_routes
            .iter()
            .find(|entry| &entry.formulation_and_route == wanted)
    }

    /// Entry flagged as default, else the first one.
    pub fn default_formulation_and_route(&self) -> Option<&FullFormulationAndRoute> {
        self.formulation_and_routes
            .iter()
            .find(|entry| entry.is_default)
            .or_else(|| self.formulation_and_routes.first())
    }

    pub fn supports(&self, wanted: &FormulationAndRoute) -> bool {
        self.formulation_and_route(wanted).is_some()
    }

    pub fn has_active_moiety(&self, id: &str) -> bool {
        self.active_moieties.iter().any(|moiety| moiety.id == id)
    }
}
