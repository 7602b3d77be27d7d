use crate::adjustment::{AdjustmentTrait, PercentilesTrait, PredictionParameterType};
use crate::drug_model::*;
use crate::models::*;
use crate::services::{
    AdjustmentCandidate, AdjustmentData, ComputingFailure, ComputingService, CycleData, CycleStatistic,
    ParameterValue, PercentilesData,
};
use crate::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub struct ExampleDataGenerator;

impl ExampleDataGenerator {
    pub const IMATINIB_MODEL_ID: &'static str = "ch.tucuxi.imatinib.gotta2012";
    pub const BUSULFAN_MODEL_ID: &'static str = "ch.tucuxi.busulfan.paci2012";

    pub fn date_time(year: i32, month: u32, day: u32, hour: u32) -> DateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .unwrap_or(NaiveDateTime::MIN)
    }

    /// Reference "now" of the examples.
    pub fn computation_time() -> DateTime {
        Self::date_time(2022, 6, 20, 10)
    }

    fn oral() -> FormulationAndRoute {
        let mut formulation_and_route = FormulationAndRoute::new(
            Formulation::ParenteralSolution,
            AdministrationRoute::Oral,
            AbsorptionModel::Extravascular,
        );
        formulation_and_route.administration_name = "foo bar".to_string();
        formulation_and_route
    }

    fn intravenous_drip() -> FormulationAndRoute {
        FormulationAndRoute::new(
            Formulation::ParenteralSolution,
            AdministrationRoute::IntravenousDrip,
            AbsorptionModel::Infusion,
        )
    }

    pub fn imatinib_model() -> DrugModel {
        DrugModel {
            id: Self::IMATINIB_MODEL_ID.to_string(),
            drug_id: "imatinib".to_string(),
            covariates: vec![
                CovariateDefinition::new("bodyweight", 70.0, "kg", DataType::Double)
                    .with_validation(ValidationRule::Range { min: Some(44.0), max: Some(110.0) }),
                CovariateDefinition::new("gist", 0.0, "", DataType::Bool),
                CovariateDefinition::new("sex", 0.5, "", DataType::Double)
                    .with_validation(ValidationRule::Range { min: Some(0.0), max: Some(1.0) }),
                CovariateDefinition::new("age", 50.0, "y", DataType::Double)
                    .with_validation(ValidationRule::Range { min: Some(20.0), max: Some(88.0) }),
            ],
            constraints: vec![
                DomainConstraint {
                    id: "age_adult".to_string(),
                    kind: ConstraintKind::Hard,
                    rule: ConstraintRule::Range { covariate: "age".to_string(), min: Some(18.0), max: None },
                },
                DomainConstraint {
                    id: "bodyweight_range".to_string(),
                    kind: ConstraintKind::Soft,
                    rule: ConstraintRule::Range {
                        covariate: "bodyweight".to_string(),
                        min: Some(44.0),
                        max: Some(110.0),
                    },
                },
            ],
            formulation_and_routes: vec![FullFormulationAndRoute {
                formulation_and_route: Self::oral(),
                valid_doses: ValidDoses { from: 100.0, to: 400.0, unit: "mg".to_string() },
                is_default: true,
                standard_treatment: None,
                loading_dose_recommended: Some(false),
                rest_period_recommended: None,
            }],
            active_moieties: vec![ActiveMoiety {
                id: "imatinib".to_string(),
                analyte_ids: vec!["imatinib".to_string()],
                targets: vec![TargetDefinition {
                    target_type: TargetType::Residual,
                    min: 750.0,
                    best: 1000.0,
                    max: 1500.0,
                    unit: "ug/l".to_string(),
                }],
            }],
            half_life: HalfLife { value: 12.0, unit: "h".to_string(), multiplier: 20.0 },
        }
    }

    pub fn busulfan_model() -> DrugModel {
        DrugModel {
            id: Self::BUSULFAN_MODEL_ID.to_string(),
            drug_id: "busulfan".to_string(),
            covariates: vec![CovariateDefinition::new("bodyweight", 70.0, "kg", DataType::Double)
                .with_validation(ValidationRule::Range { min: Some(3.0), max: Some(120.0) })],
            constraints: vec![],
            formulation_and_routes: vec![FullFormulationAndRoute {
                formulation_and_route: Self::intravenous_drip(),
                valid_doses: ValidDoses { from: 10.0, to: 300.0, unit: "mg".to_string() },
                is_default: true,
                standard_treatment: Some(StandardTreatment { duration: 4.0, unit: "d".to_string() }),
                loading_dose_recommended: None,
                rest_period_recommended: Some(false),
            }],
            active_moieties: vec![ActiveMoiety {
                id: "busulfan".to_string(),
                analyte_ids: vec!["busulfan".to_string()],
                targets: vec![TargetDefinition {
                    target_type: TargetType::CumulativeAuc,
                    min: 59.0,
                    best: 75.0,
                    max: 98.0,
                    unit: "mg*h/l".to_string(),
                }],
            }],
            half_life: HalfLife { value: 2.5, unit: "h".to_string(), multiplier: 10.0 },
        }
    }

    pub fn dose(mg: f64, formulation_and_route: FormulationAndRoute, interval_hours: i64) -> Dosage {
        Dosage::Single(SingleDose {
            id: DoseId::default(),
            dose: mg,
            unit: "mg".to_string(),
            formulation_and_route,
            infusion_time: Duration::zero(),
            timing: DoseTiming::Lasting { interval: Duration::hours(interval_hours) },
        })
    }

    fn looped(start: DateTime, end: Option<DateTime>, dose: Dosage) -> DosageHistory {
        DosageHistory {
            time_ranges: vec![DosageTimeRange { start, end, dosage: Dosage::Loop(Box::new(dose)) }],
        }
    }

    /// 400 mg every 12h since 2022-06-19T08:00, still running.
    pub fn ongoing_imatinib_treatment() -> Treatment {
        let history = Self::looped(
            Self::date_time(2022, 6, 19, 8),
            None,
            Self::dose(400.0, Self::oral(), 12),
        );
        Treatment::new(history, vec![], vec![], vec![])
    }

    /// 400 mg every 12h over two days in July 2018.
    pub fn past_imatinib_treatment() -> Treatment {
        let history = Self::looped(
            Self::date_time(2018, 7, 6, 9),
            Some(Self::date_time(2018, 7, 8, 9)),
            Self::dose(400.0, Self::oral(), 12),
        );
        Treatment::new(history, vec![], vec![], vec![])
    }

    /// Two daily loading doses followed by a split regimen.
    pub fn sequence_imatinib_treatment() -> Treatment {
        let dosage = Dosage::Sequence(vec![
            Dosage::Repeat { dosage: Box::new(Self::dose(400.0, Self::oral(), 24)), times: 2 },
            Dosage::Loop(Box::new(Dosage::ParallelSequence(vec![
                ParallelBranch { offset: Duration::zero(), dosage: Self::dose(200.0, Self::oral(), 24) },
                ParallelBranch { offset: Duration::hours(12), dosage: Self::dose(200.0, Self::oral(), 12) },
            ]))),
        ]);
        let history = DosageHistory {
            time_ranges: vec![DosageTimeRange { start: Self::date_time(2022, 6, 15, 8), end: None, dosage }],
        };
        Treatment::new(history, vec![], vec![], vec![])
    }

    /// 60 mg infused every 6h for four days from `start`.
    pub fn busulfan_treatment(start: DateTime) -> Treatment {
        let mut dose = Self::dose(60.0, Self::intravenous_drip(), 6);
        if let Dosage::Single(single) = &mut dose {
            single.infusion_time = Duration::hours(2);
        }
        let history = Self::looped(start, Some(start + Duration::days(4)), dose);
        Treatment::new(history, vec![], vec![], vec![])
    }

    /// Write `drug_models.json` and a batch of `n_requests` random requests
    /// (`requests.json`) into `output_dir`.
    pub fn generate_example<P: AsRef<Path>>(output_dir: P, n_requests: usize) -> Result<(PathBuf, PathBuf)> {
        let mut rng = StdRng::seed_from_u64(42); // Reproducible results
        let output_dir = output_dir.as_ref();
        std::fs::create_dir_all(output_dir)?;

        let models_path = output_dir.join("drug_models.json");
        let models = vec![Self::imatinib_model(), Self::busulfan_model()];
        serde_json::to_writer_pretty(BufWriter::new(File::create(&models_path)?), &models)?;

        let requests: Vec<RequestInput> = (0..n_requests).map(|_| Self::random_request(&mut rng)).collect();
        let requests_path = output_dir.join("requests.json");
        serde_json::to_writer_pretty(BufWriter::new(File::create(&requests_path)?), &requests)?;

        log::info!("Generated example batch with {} requests", n_requests);
        Ok((models_path, requests_path))
    }

    fn random_request(rng: &mut StdRng) -> RequestInput {
        let t0 = Self::computation_time();
        let busulfan = rng.gen_bool(0.25);

        // Some regimens are over, some still running, a few not started.
        let start = t0 - Duration::hours(rng.gen_range(-24..24 * 10));
        let (drug_id, history) = if busulfan {
            let dose = Self::dose(rng.gen_range(20.0..350.0_f64).round(), Self::intravenous_drip(), 6);
            ("busulfan", Self::looped(start, Some(start + Duration::days(4)), dose))
        } else {
            let dose = Self::dose(rng.gen_range(1..=8) as f64 * 100.0, Self::oral(), 12);
            let end = if rng.gen_bool(0.3) { Some(start + Duration::days(rng.gen_range(1..5))) } else { None };
            ("imatinib", Self::looped(start, end, dose))
        };

        let measured = t0 - Duration::days(rng.gen_range(1..30));
        let mut covariates = vec![PatientCovariate::new(
            "bodyweight",
            &format!("{:.1}", rng.gen_range(40.0..120.0)),
            DataType::Double,
            "kg",
            measured,
        )];
        if rng.gen_bool(0.8) {
            let birth = Self::date_time(rng.gen_range(1940..2012), rng.gen_range(1..=12), rng.gen_range(1..=28), 0);
            covariates.push(PatientCovariate::new(
                "birthdate",
                &birth.format("%Y-%m-%dT%H:%M:%S").to_string(),
                DataType::Date,
                "",
                measured,
            ));
        }

        let targets = if !busulfan && rng.gen_bool(0.2) {
            vec![Target {
                active_moiety_id: "imatinib".to_string(),
                target_type: TargetType::Residual,
                min: 750.0,
                best: 1000.0,
                max: 1500.0,
                unit: "ug/l".to_string(),
                mic: None,
            }]
        } else {
            vec![]
        };

        let mut request = XpertRequest::new(drug_id);
        if rng.gen_bool(0.5) {
            request.output_lang = OutputLang::French;
        }

        RequestInput {
            request,
            treatment: Some(Treatment::new(history, vec![], targets, covariates)),
        }
    }
}

/// Deterministic stand-in for the computing engine: 12h cycles with flat
/// percentiles of `10 * rank` ug/l.
#[derive(Debug, Clone, Default)]
pub struct LinearComputingService {
    pub fail: bool,
    pub empty: bool,
}

impl LinearComputingService {
    const CYCLE_HOURS: i64 = 12;

    fn clearance(parameter_type: PredictionParameterType) -> f64 {
        match parameter_type {
            PredictionParameterType::Population => 15.0,
            PredictionParameterType::Apriori => 14.0,
            PredictionParameterType::Aposteriori => 13.0,
        }
    }
}

impl ComputingService for LinearComputingService {
    fn compute_adjustment(
        &self,
        adjustment: &AdjustmentTrait,
        _treatment: &Treatment,
        model: &DrugModel,
    ) -> std::result::Result<AdjustmentData, ComputingFailure> {
        if self.fail {
            return Err(ComputingFailure("engine unavailable".to_string()));
        }
        if self.empty {
            return Ok(AdjustmentData::default());
        }

        let clearance = Self::clearance(adjustment.computing_option.parameter_type);
        let dose = model
            .default_formulation_and_route()
            .map_or(100.0, |entry| entry.valid_doses.to);
        let cycle = Duration::hours(Self::CYCLE_HOURS);

        let mut cycle_data = Vec::new();
        let mut cursor = adjustment.start;
        while cursor + cycle <= adjustment.end {
            let peak = dose / clearance * 50.0;
            let trough = peak / 2.0;
            cycle_data.push(CycleData {
                start: cursor,
                end: cursor + cycle,
                unit: adjustment.computing_option.forced_concentration_unit.clone(),
                times: vec![0.0, Self::CYCLE_HOURS as f64],
                concentrations: vec![peak, trough],
                parameters: vec![
                    ParameterValue { id: "CL".to_string(), value: clearance },
                    ParameterValue { id: "V".to_string(), value: 347.0 },
                ],
                statistics: vec![
                    CycleStatistic { name: "cycle".to_string(), value: cycle_data.len() as f64 },
                    CycleStatistic { name: "mean".to_string(), value: (peak + trough) / 2.0 },
                ],
            });
            cursor += cycle;
        }

        Ok(AdjustmentData {
            adjustments: vec![AdjustmentCandidate { score: 1.0, cycle_data }],
        })
    }

    fn compute_percentiles(
        &self,
        percentiles: &PercentilesTrait,
        _treatment: &Treatment,
        _model: &DrugModel,
    ) -> std::result::Result<PercentilesData, ComputingFailure> {
        if self.fail {
            return Err(ComputingFailure("engine unavailable".to_string()));
        }

        let hours = (percentiles.end - percentiles.start).num_seconds() as f64 / 3600.0;
        let curves = percentiles
            .ranks
            .iter()
            .map(|rank| {
                let level = 10.0 * *rank as f64;
                vec![CycleData {
                    start: percentiles.start,
                    end: percentiles.end,
                    unit: "ug/l".to_string(),
                    times: vec![0.0, hours],
                    concentrations: vec![level, level],
                    parameters: vec![],
                    statistics: vec![],
                }]
            })
            .collect();

        Ok(PercentilesData { ranks: percentiles.ranks.clone(), percentiles: curves })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generated_batch_is_readable() {
        let dir = TempDir::new().unwrap();
        let (models_path, requests_path) = ExampleDataGenerator::generate_example(dir.path(), 12).unwrap();

        let models: Vec<DrugModel> = serde_json::from_reader(File::open(models_path).unwrap()).unwrap();
        assert_eq!(models.len(), 2);

        let requests: Vec<RequestInput> = serde_json::from_reader(File::open(requests_path).unwrap()).unwrap();
        assert_eq!(requests.len(), 12);
        assert!(requests.iter().all(|r| r.treatment.is_some()));
    }

    #[test]
    fn test_example_ids_assigned() {
        let treatment = ExampleDataGenerator::sequence_imatinib_treatment();
        let ids: Vec<DoseId> = treatment.dosage_history.single_doses().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![DoseId(0), DoseId(1), DoseId(2)]);
    }
}
