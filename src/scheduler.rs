use crate::adjustment::{
    AdjustmentTrait, BestCandidatesOption, ComputingOption, LoadingPolicy, PredictionParameterType, RestPeriodPolicy,
    SteadyStateTargetOption,
};
use crate::config::XpertConfig;
use crate::context::RequestContext;
use crate::drug_model::{DrugModel, FullFormulationAndRoute};
use crate::errors::XpertError;
use crate::intakes::{IntakeEvent, IntakeExtractor};
use crate::models::{
    DateTime, DosageHistory, FormulationAndRouteSelectionOption, LoadingOption, RestPeriodOption, TargetExtractionOption, Treatment,
    XpertRequest,
};
use crate::pipeline::FlowStep;
use crate::{units, Result};
use chrono::{Duration, NaiveDateTime};

/// Derives when the adjustment takes effect, the prediction window and the
/// computing options handed to the engine.
pub struct AdjustmentScheduler {
    config: XpertConfig,
}

impl AdjustmentScheduler {
    pub fn new(config: XpertConfig) -> Self {
        Self { config }
    }

    fn schedule(&self, ctx: &RequestContext) -> Result<(AdjustmentTrait, Option<IntakeEvent>)> {
        let treatment = ctx.treatment().ok_or(XpertError::MissingTreatment)?;
        let model = ctx.drug_model().ok_or(XpertError::MissingDrugModel)?;
        let request = ctx.request();
        let t0 = ctx.computation_time();
        let history = &treatment.dosage_history;

        let entry = if history.is_empty() {
            model.default_formulation_and_route()
        } else {
            history
                .last_formulation_and_route()
                .and_then(|used| model.formulation_and_route(used))
        }
        .ok_or_else(|| {
            XpertError::InvalidDosage("No corresponding full formulation and route found for a dosage.".to_string())
        })?;

        let intakes = match history.latest_start_before(t0) {
            Some(from) => IntakeExtractor::extract(history, from, self.extraction_end(history, t0))?,
            None => Vec::new(),
        };
        let last_intake = intakes.iter().filter(|intake| intake.time < t0).last().cloned();

        let adjustment_time = match request.adjustment_time {
            Some(time) => time,
            None => self.adjustment_time(model, &intakes, t0)?,
        };

        let (start, end) = match &entry.standard_treatment {
            Some(standard) => {
                let start = history.oldest_start().unwrap_or(adjustment_time);
                let end = start + units::to_duration(standard.duration, &standard.unit)?;
                if end < adjustment_time {
                    return Err(XpertError::TreatmentAlreadyOver(model.id.clone()));
                }
                (start, end)
            }
            None => (
                adjustment_time,
                adjustment_time + Duration::days(self.config.adjustment_window_days),
            ),
        };

        let adjustment = AdjustmentTrait {
            start,
            end,
            adjustment_time,
            points_per_hour: self.config.points_per_hour,
            computing_option: ComputingOption::full(
                self.parameter_type(treatment),
                &self.config.concentration_unit,
            ),
            best_candidates: BestCandidatesOption::BestDosagePerInterval,
            loading: Self::loading(request, entry),
            rest_period: Self::rest_period(request, entry),
            steady_state_target: if entry.standard_treatment.is_some() {
                SteadyStateTargetOption::WithinTreatmentTimeRange
            } else {
                SteadyStateTargetOption::AtSteadyState
            },
            target_extraction: request
                .target_extraction_option
                .unwrap_or(TargetExtractionOption::DefinitionIfNoIndividualTarget),
            formulation_and_route_selection: request
                .formulation_and_route_selection_option
                .unwrap_or(FormulationAndRouteSelectionOption::AllFormulationAndRoutes),
        };

        Ok((adjustment, last_intake))
    }

    /// End of intake extraction. Reaches far enough past `t0` for the next
    /// intake of a regimen whose interval exceeds the configured horizon.
    fn extraction_end(&self, history: &DosageHistory, t0: DateTime) -> DateTime {
        let horizon = Duration::days(self.config.intake_horizon_days);
        let reach = history
            .longest_cycle()
            .checked_mul(2)
            .map_or(horizon, |cycles| cycles.max(horizon));
        t0.checked_add_signed(reach).unwrap_or(NaiveDateTime::MAX)
    }

    /// The next intake after `t0` when a regimen is ongoing; otherwise the
    /// last intake moved forward by whole half-life steps until it reaches
    /// `t0`; otherwise shortly after `t0`.
    fn adjustment_time(&self, model: &DrugModel, intakes: &[IntakeEvent], t0: DateTime) -> Result<DateTime> {
        if let Some(next) = intakes.iter().find(|intake| intake.time > t0) {
            return Ok(next.time);
        }

        let fallback = t0 + Duration::hours(self.config.fallback_adjustment_offset_hours);
        let latest = match intakes.last() {
            Some(intake) => intake.time,
            None => return Ok(fallback),
        };

        let half_life = &model.half_life;
        let step = units::to_duration(
            self.config.half_life_extrapolation_factor * half_life.value,
            &half_life.unit,
        )?;
        if step <= Duration::zero() {
            log::warn!("Half-life of {} gives no usable step, using fallback adjustment time", model.id);
            return Ok(fallback);
        }

        let behind = (t0 - latest).num_seconds();
        let step_seconds = step.num_seconds();
        let steps = (behind + step_seconds - 1).div_euclid(step_seconds).max(0);
        Ok(step_seconds
            .checked_mul(steps)
            .and_then(Duration::try_seconds)
            .and_then(|delta| latest.checked_add_signed(delta))
            .unwrap_or(fallback))
    }

    fn parameter_type(&self, treatment: &Treatment) -> PredictionParameterType {
        let has_doses = !treatment.dosage_history.is_empty();
        let has_samples = !treatment.samples.is_empty();

        if has_doses && has_samples {
            PredictionParameterType::Aposteriori
        } else if !has_samples && treatment.covariates.is_empty() && self.config.population_when_no_patient_data {
            PredictionParameterType::Population
        } else {
            PredictionParameterType::Apriori
        }
    }

    fn loading(request: &XpertRequest, entry: &FullFormulationAndRoute) -> LoadingPolicy {
        match request.loading_option {
            LoadingOption::NoLoadingDose => LoadingPolicy::NoLoadingDose,
            LoadingOption::LoadingDoseAllowed => LoadingPolicy::LoadingDoseAllowed,
            LoadingOption::Unspecified => match entry.loading_dose_recommended {
                Some(false) => LoadingPolicy::NoLoadingDose,
                _ => LoadingPolicy::LoadingDoseAllowed,
            },
        }
    }

    fn rest_period(request: &XpertRequest, entry: &FullFormulationAndRoute) -> RestPeriodPolicy {
        match request.rest_period_option {
            RestPeriodOption::NoRestPeriod => RestPeriodPolicy::NoRestPeriod,
            RestPeriodOption::RestPeriodAllowed => RestPeriodPolicy::RestPeriodAllowed,
            RestPeriodOption::Unspecified => match entry.rest_period_recommended {
                Some(false) => RestPeriodPolicy::NoRestPeriod,
                _ => RestPeriodPolicy::RestPeriodAllowed,
            },
        }
    }
}

impl FlowStep for AdjustmentScheduler {
    fn name(&self) -> &'static str {
        "adjustment scheduling"
    }

    fn perform(&self, ctx: &mut RequestContext) {
        match self.schedule(ctx) {
            Ok((adjustment, last_intake)) => {
                log::info!(
                    "Adjustment at {} within [{}, {}]",
                    adjustment.adjustment_time,
                    adjustment.start,
                    adjustment.end
                );
                ctx.set_last_intake(last_intake);
                ctx.set_adjustment_trait(adjustment);
            }
            Err(e) => ctx.set_error(e.to_string()),
        }
    }
}
