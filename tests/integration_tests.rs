use std::sync::Arc;
use tempfile::TempDir;
use xpert_flow::{
    adjustment::{PredictionParameterType, SteadyStateTargetOption},
    config::XpertConfig,
    context::{CovariateSource, RequestContext},
    example_data::{ExampleDataGenerator, LinearComputingService},
    output::OutputManager,
    services::{DictionaryTranslations, DrugModelRepository, InMemoryDrugModelRepository},
    warnings::Warning,
    *,
};

fn repository() -> Arc<dyn DrugModelRepository> {
    Arc::new(InMemoryDrugModelRepository::from_models(vec![
        ExampleDataGenerator::imatinib_model(),
        ExampleDataGenerator::busulfan_model(),
    ]))
}

fn general_pipeline() -> Pipeline {
    Pipeline::general(
        repository(),
        Arc::new(LinearComputingService::default()),
        XpertConfig::default(),
    )
}

fn context(drug_id: &str, treatment: Option<Treatment>) -> RequestContext {
    RequestContext::new(XpertRequest::new(drug_id), treatment, ExampleDataGenerator::computation_time())
}

fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime {
    ExampleDataGenerator::date_time(year, month, day, hour)
}

#[test]
fn test_complete_request_flow() {
    let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
    treatment.covariates.push(PatientCovariate::new(
        "bodyweight",
        "70",
        DataType::Double,
        "kg",
        at(2022, 6, 1, 8),
    ));
    treatment.samples.push(Sample {
        id: SampleId::default(),
        date: at(2022, 6, 20, 8),
        analyte_id: "imatinib".to_string(),
        value: 455.0,
        unit: "ug/l".to_string(),
    });
    treatment.assign_identities();

    let mut ctx = context("imatinib", Some(treatment));
    assert!(general_pipeline().run(&mut ctx), "{}", ctx.error());

    assert_eq!(ctx.drug_model().unwrap().id, ExampleDataGenerator::IMATINIB_MODEL_ID);
    assert_eq!(ctx.dose_results().len(), 1);
    assert_eq!(ctx.sample_results()[&SampleId(0)].group_over_99_percentile, 46);

    let adjustment = ctx.adjustment_trait().unwrap();
    assert_eq!(adjustment.adjustment_time, at(2022, 6, 20, 20));
    assert_eq!(adjustment.computing_option.parameter_type, PredictionParameterType::Aposteriori);
    assert!(adjustment.start <= adjustment.end);

    assert!(ctx.adjustment_data().is_some());
    assert_eq!(ctx.parameters().len(), 3);
    assert!(!ctx.steady_state_statistics().is_empty());
}

#[test]
fn test_missing_treatment_fails_every_stage() {
    let pipeline = general_pipeline();
    let mut ctx = context("imatinib", None);
    assert!(!pipeline.run(&mut ctx));
    assert_eq!(ctx.error(), "No treatment set.");
    assert!(ctx.drug_model().is_none());
    assert!(ctx.dose_results().is_empty());
    assert!(ctx.adjustment_trait().is_none());
    assert!(ctx.adjustment_data().is_none());
}

#[test]
fn test_past_treatment_adjustment_time() {
    let mut ctx = context("imatinib", Some(ExampleDataGenerator::past_imatinib_treatment()));
    assert!(general_pipeline().run(&mut ctx), "{}", ctx.error());
    assert_eq!(ctx.adjustment_trait().unwrap().adjustment_time, at(2022, 6, 20, 21));
}

#[test]
fn test_busulfan_standard_treatment() {
    let mut ctx = context("busulfan", Some(ExampleDataGenerator::busulfan_treatment(at(2022, 6, 19, 8))));
    assert!(general_pipeline().run(&mut ctx), "{}", ctx.error());

    let adjustment = ctx.adjustment_trait().unwrap();
    assert_eq!(adjustment.start, at(2022, 6, 19, 8));
    assert_eq!(adjustment.end, at(2022, 6, 23, 8));
    assert_eq!(adjustment.steady_state_target, SteadyStateTargetOption::WithinTreatmentTimeRange);

    let mut over = context("busulfan", Some(ExampleDataGenerator::busulfan_treatment(at(2018, 7, 6, 8))));
    assert!(!general_pipeline().run(&mut over));
    assert!(over.error().contains("the treatment is already over at the time of the adjustment"));
    assert!(over.error().contains(ExampleDataGenerator::BUSULFAN_MODEL_ID));
    assert!(over.adjustment_data().is_none());
}

#[test]
fn test_dose_warnings_survive_the_flow() {
    let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
    if let Dosage::Loop(inner) = &mut treatment.dosage_history.time_ranges[0].dosage {
        if let Dosage::Single(dose) = inner.as_mut() {
            dose.dose = 800.0;
        }
    }
    let mut ctx = context("imatinib", Some(treatment));
    assert!(general_pipeline().run(&mut ctx), "{}", ctx.error());

    let warning = ctx.dose_results()[&DoseId(0)].warning.clone().unwrap();
    assert_eq!(warning, Warning::DoseAboveMaximum { bound: 400.0, unit: "mg".to_string() });
}

#[test]
fn test_duplicate_targets_stop_before_scheduling() {
    let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
    let target = Target {
        active_moiety_id: "imatinib".to_string(),
        target_type: TargetType::Residual,
        min: 750.0,
        best: 1000.0,
        max: 1500.0,
        unit: "ug/l".to_string(),
        mic: None,
    };
    treatment.targets = vec![target.clone(), target];

    let mut ctx = context("imatinib", Some(treatment));
    assert!(!general_pipeline().run(&mut ctx));
    assert_eq!(
        ctx.error(),
        "Two patient's targets with the same active moiety and the same target type detected."
    );
    assert!(ctx.drug_model().is_some());
    assert!(ctx.adjustment_trait().is_none());
}

#[test]
fn test_covariate_sources() {
    let mut treatment = ExampleDataGenerator::ongoing_imatinib_treatment();
    treatment.covariates.push(PatientCovariate::new(
        "bodyweight",
        "70",
        DataType::Double,
        "kg",
        at(2022, 6, 1, 8),
    ));
    let mut ctx = context("imatinib", Some(treatment));
    assert!(general_pipeline().run(&mut ctx), "{}", ctx.error());

    let model = ctx.drug_model().unwrap().clone();
    for result in ctx.covariate_results() {
        if result.definition_id == "bodyweight" {
            assert_eq!(result.get_type(), CovariateSource::Patient);
        } else {
            let definition = model.covariates.iter().find(|d| d.id == result.definition_id).unwrap();
            assert_eq!(result.get_type(), CovariateSource::Model);
            assert_eq!(result.value, definition.default_value.to_string());
        }
    }
}

#[test]
fn test_generated_batch_end_to_end() {
    let dir = TempDir::new().unwrap();
    let (models_path, requests_path) = ExampleDataGenerator::generate_example(dir.path(), 15).unwrap();

    let repository = InMemoryDrugModelRepository::load_file(&models_path).unwrap();
    assert_eq!(repository.len(), 2);

    let inputs: Vec<RequestInput> =
        serde_json::from_reader(std::fs::File::open(&requests_path).unwrap()).unwrap();
    let mut contexts: Vec<RequestContext> = inputs
        .into_iter()
        .map(|input| {
            RequestContext::new(input.request, input.treatment, ExampleDataGenerator::computation_time())
        })
        .collect();

    let pipeline = Pipeline::preparation(Arc::new(repository), XpertConfig::default());
    pipeline.run_batch(&mut contexts);

    for ctx in &contexts {
        if ctx.should_continue_processing() {
            let adjustment = ctx.adjustment_trait().unwrap();
            assert!(adjustment.start <= adjustment.end);
            assert!(ctx.drug_model().is_some());
        } else {
            assert!(!ctx.error().is_empty());
        }
    }

    let output = dir.path().join("results");
    OutputManager::save_results(&contexts, &DictionaryTranslations::with_defaults(), &output).unwrap();
    assert!(output.join("request_results.json").exists());
    assert!(output.join("summary.csv").exists());
    assert!(output.join("warnings.csv").exists());
}
