use crate::config::XpertConfig;
use crate::context::{CovariateResult, RequestContext};
use crate::covariate::CovariateResolver;
use crate::drug_model::{ConstraintKind, DrugModel};
use crate::errors::XpertError;
use crate::models::{DateTime, FormulationAndRoute, PatientCovariate};
use crate::pipeline::FlowStep;
use crate::services::DrugModelRepository;
use crate::Result;
use chrono::Duration;
use itertools::Itertools;
use std::sync::Arc;

enum Compatibility {
    /// Ids of the soft constraints that failed.
    Compatible(Vec<String>),
    Incompatible(String),
}

struct Candidate {
    model: Arc<DrugModel>,
    score: usize,
    covariate_results: Vec<CovariateResult>,
    soft_failures: Vec<String>,
}

/// Picks the drug model that best fits the patient and resolves its covariates.
pub struct ModelSelector {
    repository: Arc<dyn DrugModelRepository>,
    config: XpertConfig,
}

impl ModelSelector {
    pub fn new(repository: Arc<dyn DrugModelRepository>, config: XpertConfig) -> Self {
        Self { repository, config }
    }

    fn select(&self, ctx: &RequestContext) -> Result<Candidate> {
        let treatment = ctx.treatment().ok_or(XpertError::MissingTreatment)?;
        let drug_id = &ctx.request().drug_id;
        let t0 = ctx.computation_time();

        let models = self.repository.models_for_drug(drug_id);
        if models.is_empty() {
            return Err(XpertError::NoModelForDrug(drug_id.clone()));
        }

        let doses = treatment.dosage_history.single_doses();
        let used: Vec<&FormulationAndRoute> = doses.iter().map(|d| &d.formulation_and_route).unique().collect();
        if used.len() > 1 {
            return Err(XpertError::FormulationsAndRoutesDiffer);
        }

        let mut best: Option<Candidate> = None;

        for model in models {
            if let Some(formulation_and_route) = used.first() {
                if !model.supports(formulation_and_route) {
                    log::warn!(
                        "Drug model {} eliminated: formulation and route {:?}/{:?} not supported",
                        model.id,
                        formulation_and_route.formulation,
                        formulation_and_route.route
                    );
                    continue;
                }
            }

            CovariateResolver::check_patient_data(&model, &treatment.covariates)?;

            let soft_failures = match self.check_constraints(&model, &treatment.covariates, t0)? {
                Compatibility::Compatible(failures) => failures,
                Compatibility::Incompatible(constraint) => {
                    log::warn!("Drug model {} eliminated by hard constraint {}", model.id, constraint);
                    continue;
                }
            };

            let (score, covariate_results) = CovariateResolver::score(&model, &treatment.covariates, t0)?;
            log::debug!("Drug model {} scored {}", model.id, score);

            let better = match &best {
                None => true,
                Some(leader) => {
                    score < leader.score
                        || (score == leader.score && model.covariates.len() > leader.model.covariates.len())
                }
            };
            if better {
                best = Some(Candidate { model, score, covariate_results, soft_failures });
            }
        }

        best.ok_or(XpertError::NoCompatibleModel)
    }

    /// Constraints are checked now and one lookahead later, so that a
    /// covariate such as age crossing a bound in between is caught.
    fn check_constraints(
        &self,
        model: &DrugModel,
        covariates: &[PatientCovariate],
        t0: DateTime,
    ) -> Result<Compatibility> {
        let instants = [t0, t0 + Duration::days(self.config.constraint_lookahead_days)];
        let mut soft_failures = Vec::new();

        for constraint in &model.constraints {
            let required = constraint.rule.required_covariates();

            for instant in instants {
                let values = CovariateResolver::values_at(model, covariates, &required, instant).map_err(
                    |(covariate, details)| XpertError::CovariateExtraction {
                        model: model.id.clone(),
                        details: format!("{}: {}", covariate, details),
                    },
                )?;

                if constraint.rule.evaluate(&values) {
                    continue;
                }
                match constraint.kind {
                    ConstraintKind::Hard => return Ok(Compatibility::Incompatible(constraint.id.clone())),
                    ConstraintKind::Soft => {
                        if !soft_failures.contains(&constraint.id) {
                            soft_failures.push(constraint.id.clone());
                        }
                    }
                }
            }
        }

        Ok(Compatibility::Compatible(soft_failures))
    }
}

impl FlowStep for ModelSelector {
    fn name(&self) -> &'static str {
        "model selection"
    }

    fn perform(&self, ctx: &mut RequestContext) {
        match self.select(ctx) {
            Ok(candidate) => {
                log::info!("Selected drug model {} (score {})", candidate.model.id, candidate.score);
                if !candidate.soft_failures.is_empty() {
                    log::warn!(
                        "Soft constraints failed for {}: {}",
                        candidate.model.id,
                        candidate.soft_failures.join(", ")
                    );
                }
                ctx.bind_drug_model(candidate.model, candidate.covariate_results);
                ctx.set_soft_constraint_failures(candidate.soft_failures);
            }
            Err(e) => ctx.set_error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CovariateSource;
    use crate::drug_model::{ConstraintRule, CovariateDefinition, DomainConstraint};
    use crate::example_data::ExampleDataGenerator;
    use crate::models::{AdministrationRoute, DataType, Treatment, XpertRequest};
    use crate::services::InMemoryDrugModelRepository;

    fn selector(models: Vec<DrugModel>) -> ModelSelector {
        ModelSelector::new(
            Arc::new(InMemoryDrugModelRepository::from_models(models)),
            XpertConfig::default(),
        )
    }

    fn context(treatment: Option<Treatment>) -> RequestContext {
        RequestContext::new(
            XpertRequest::new("imatinib"),
            treatment,
            ExampleDataGenerator::computation_time(),
        )
    }

    fn adult_birthdate() -> PatientCovariate {
        PatientCovariate::new(
            "birthdate",
            "1980-01-01T00:00:00",
            DataType::Date,
            "",
            ExampleDataGenerator::date_time(2022, 6, 1, 8),
        )
    }

    fn renamed(mut model: DrugModel, id: &str) -> DrugModel {
        model.id = id.to_string();
        model
    }

    #[test]
    fn test_missing_treatment() {
        let mut ctx = context(None);
        selector(vec![ExampleDataGenerator::imatinib_model()]).perform(&mut ctx);
        assert_eq!(ctx.error(), "No treatment set.");
        assert!(ctx.drug_model().is_none());
    }

    #[test]
    fn test_unknown_drug() {
        let mut ctx = RequestContext::new(
            XpertRequest::new("rifampicin"),
            Some(Treatment::default()),
            ExampleDataGenerator::computation_time(),
        );
        selector(vec![ExampleDataGenerator::imatinib_model()]).perform(&mut ctx);
        assert_eq!(ctx.error(), "No drug model for id rifampicin in the repository.");
    }

    #[test]
    fn test_mixed_formulations_rejected() {
        let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
        let mut other = treatment.dosage_history.time_ranges[0].clone();
        if let crate::models::Dosage::Loop(inner) = &mut other.dosage {
            if let crate::models::Dosage::Single(dose) = inner.as_mut() {
                dose.formulation_and_route.route = AdministrationRoute::IntravenousDrip;
            }
        }
        treatment.dosage_history.time_ranges.push(other);

        let mut ctx = context(Some(treatment));
        selector(vec![ExampleDataGenerator::imatinib_model()]).perform(&mut ctx);
        assert_eq!(
            ctx.error(),
            "All formulations and routes must be equal: formulation and routes differ within treatment."
        );
    }

    #[test]
    fn test_single_compatible_model_wins_regardless_of_score() {
        let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
        treatment.covariates.push(adult_birthdate());
        treatment.covariates.push(PatientCovariate::new(
            "bodyweight",
            "70",
            DataType::Double,
            "kg",
            ExampleDataGenerator::date_time(2022, 6, 1, 8),
        ));

        // Better covered, but for another route.
        let mut intravenous = renamed(ExampleDataGenerator::imatinib_model(), "intravenous");
        intravenous.covariates.truncate(1);
        for entry in &mut intravenous.formulation_and_routes {
            entry.formulation_and_route.route = AdministrationRoute::IntravenousBolus;
        }

        let mut ctx = context(Some(treatment));
        selector(vec![intravenous, ExampleDataGenerator::imatinib_model()]).perform(&mut ctx);
        assert!(ctx.should_continue_processing(), "{}", ctx.error());
        assert_eq!(ctx.drug_model().unwrap().id, ExampleDataGenerator::IMATINIB_MODEL_ID);
    }

    #[test]
    fn test_hard_constraint_eliminates_and_soft_is_recorded() {
        let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
        treatment.covariates.push(PatientCovariate::new(
            "birthdate",
            "2010-01-01T00:00:00",
            DataType::Date,
            "",
            ExampleDataGenerator::date_time(2022, 6, 1, 8),
        ));
        let mut ctx = context(Some(treatment.clone()));
        selector(vec![ExampleDataGenerator::imatinib_model()]).perform(&mut ctx);
        assert_eq!(ctx.error(), "No compatible drug model found.");

        treatment.covariates[0] = adult_birthdate();
        treatment.covariates.push(PatientCovariate::new(
            "bodyweight",
            "150",
            DataType::Double,
            "kg",
            ExampleDataGenerator::date_time(2022, 6, 1, 8),
        ));
        let mut ctx = context(Some(treatment));
        selector(vec![ExampleDataGenerator::imatinib_model()]).perform(&mut ctx);
        assert!(ctx.should_continue_processing(), "{}", ctx.error());
        assert_eq!(ctx.soft_constraint_failures(), &["bodyweight_range".to_string()]);
    }

    #[test]
    fn test_age_crossing_bound_within_lookahead_eliminates() {
        // 39 at the computation time, 40 one day later.
        let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
        treatment.covariates.push(PatientCovariate::new(
            "birthdate",
            "1982-06-21T00:00:00",
            DataType::Date,
            "",
            ExampleDataGenerator::date_time(2022, 6, 1, 8),
        ));
        let mut model = ExampleDataGenerator::imatinib_model();
        model.constraints.push(DomainConstraint {
            id: "age_below_40".to_string(),
            kind: ConstraintKind::Hard,
            rule: ConstraintRule::Range { covariate: "age".to_string(), min: None, max: Some(39.0) },
        });

        let mut ctx = context(Some(treatment.clone()));
        selector(vec![model.clone()]).perform(&mut ctx);
        assert_eq!(ctx.error(), "No compatible drug model found.");

        let no_lookahead = XpertConfig { constraint_lookahead_days: 0, ..XpertConfig::default() };
        let selector = ModelSelector::new(
            Arc::new(InMemoryDrugModelRepository::from_models(vec![model])),
            no_lookahead,
        );
        let mut ctx = context(Some(treatment));
        selector.perform(&mut ctx);
        assert!(ctx.should_continue_processing(), "{}", ctx.error());
    }

    #[test]
    fn test_tie_prefers_richer_model() {
        let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
        treatment.covariates.push(adult_birthdate());

        // Both lack exactly one patient value; the second has one more
        // computed definition.
        let mut lean = renamed(ExampleDataGenerator::imatinib_model(), "lean");
        lean.covariates.retain(|d| d.id == "age" || d.id == "bodyweight");
        let mut rich = renamed(lean.clone(), "rich");
        let mut computed = CovariateDefinition::new("bsa", 1.8, "m2", DataType::Double);
        computed.computed = true;
        rich.covariates.push(computed);

        let mut ctx = context(Some(treatment));
        selector(vec![lean, rich]).perform(&mut ctx);
        assert!(ctx.should_continue_processing(), "{}", ctx.error());
        assert_eq!(ctx.drug_model().unwrap().id, "rich");
    }

    #[test]
    fn test_ambiguous_birthdate_aborts_selection() {
        let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
        treatment.covariates.push(adult_birthdate());
        treatment.covariates.push(PatientCovariate::new(
            "birthdate",
            "1985-01-01T00:00:00",
            DataType::Date,
            "",
            ExampleDataGenerator::date_time(2022, 6, 2, 8),
        ));

        let mut ageless = renamed(ExampleDataGenerator::imatinib_model(), "ageless");
        ageless.covariates.retain(|d| d.id != "age");
        ageless.constraints.clear();

        let mut ctx = context(Some(treatment));
        selector(vec![ExampleDataGenerator::imatinib_model(), ageless]).perform(&mut ctx);
        assert!(!ctx.should_continue_processing());
        assert!(ctx.error().contains(ExampleDataGenerator::IMATINIB_MODEL_ID));
        assert!(ctx.error().contains("covariate age"));
        assert!(ctx.drug_model().is_none());
    }

    #[test]
    fn test_ambiguous_birthdate_aborts_even_when_a_hard_constraint_fails() {
        // The later birthdate makes the patient a child, failing age_adult.
        let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
        treatment.covariates.push(adult_birthdate());
        treatment.covariates.push(PatientCovariate::new(
            "birthdate",
            "2015-01-01T00:00:00",
            DataType::Date,
            "",
            ExampleDataGenerator::date_time(2022, 6, 2, 8),
        ));

        let mut ageless = renamed(ExampleDataGenerator::imatinib_model(), "ageless");
        ageless.covariates.retain(|d| d.id != "age");
        ageless.constraints.retain(|c| !c.rule.required_covariates().contains(&"age"));

        let mut ctx = context(Some(treatment));
        selector(vec![ExampleDataGenerator::imatinib_model(), ageless]).perform(&mut ctx);
        assert!(!ctx.should_continue_processing());
        assert!(ctx.error().contains("Multiple birthdate not allowed."));
        assert!(ctx.drug_model().is_none());
    }

    #[test]
    fn test_birthdate_with_wrong_data_type_aborts() {
        let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
        treatment.covariates.push(PatientCovariate::new(
            "birthdate",
            "1980",
            DataType::Int,
            "",
            ExampleDataGenerator::date_time(2022, 6, 1, 8),
        ));

        let mut ctx = context(Some(treatment));
        selector(vec![ExampleDataGenerator::imatinib_model()]).perform(&mut ctx);
        assert!(ctx.error().contains("Invalid data type for birthdate."));
        assert!(ctx.drug_model().is_none());
    }

    #[test]
    fn test_covariate_sources_of_selected_model() {
        let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
        treatment.covariates.push(adult_birthdate());
        treatment.covariates.push(PatientCovariate::new(
            "bodyweight",
            "70",
            DataType::Double,
            "kg",
            ExampleDataGenerator::date_time(2022, 6, 1, 8),
        ));

        let mut ctx = context(Some(treatment));
        selector(vec![ExampleDataGenerator::imatinib_model()]).perform(&mut ctx);
        assert!(ctx.should_continue_processing(), "{}", ctx.error());

        for result in ctx.covariate_results() {
            let expected = match result.definition_id.as_str() {
                "age" | "bodyweight" => CovariateSource::Patient,
                _ => CovariateSource::Model,
            };
            assert_eq!(result.get_type(), expected, "{}", result.definition_id);
        }
        let ids: Vec<&str> = ctx.covariate_results().iter().map(|r| r.definition_id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_unconvertible_constraint_value_aborts() {
        let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
        treatment.covariates.push(adult_birthdate());
        treatment.covariates.push(PatientCovariate::new(
            "bodyweight",
            "70",
            DataType::Double,
            "l",
            ExampleDataGenerator::date_time(2022, 6, 1, 8),
        ));
        let mut model = ExampleDataGenerator::imatinib_model();
        model.constraints.push(DomainConstraint {
            id: "weight_positive".to_string(),
            kind: ConstraintKind::Hard,
            rule: ConstraintRule::Range { covariate: "bodyweight".to_string(), min: Some(0.0), max: None },
        });

        let mut ctx = context(Some(treatment));
        selector(vec![model]).perform(&mut ctx);
        assert!(ctx.error().starts_with("Covariate extraction failed for drug model"));
    }
}
