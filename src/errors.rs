use thiserror::Error;

#[derive(Error, Debug)]
pub enum XpertError {
    #[error("No treatment set.")]
    MissingTreatment,

    #[error("No drug model set.")]
    MissingDrugModel,

    #[error("No adjustment trait set.")]
    MissingAdjustmentTrait,

    #[error("No drug model for id {0} in the repository.")]
    NoModelForDrug(String),

    #[error("All formulations and routes must be equal: formulation and routes differ within treatment.")]
    FormulationsAndRoutesDiffer,

    #[error("Covariate extraction failed for drug model: {model}, details: {details}")]
    CovariateExtraction { model: String, details: String },

    #[error("Patient covariate error found when handling model {model}, covariate {covariate}, details: {details}")]
    AmbiguousCovariate {
        model: String,
        covariate: String,
        details: String,
    },

    #[error("No compatible drug model found.")]
    NoCompatibleModel,

    #[error("Patient dosage error found, details: {0}")]
    InvalidDosage(String),

    #[error("Two patient's targets with the same active moiety and the same target type detected.")]
    DuplicateTarget,

    #[error("A target is related to an active moiety that does not belong to the drug model: {0}")]
    ForeignTarget(String),

    #[error("Based on the standard treatment in the model {0}, considering that the oldest dosage is the treatment start, the treatment is already over at the time of the adjustment.")]
    TreatmentAlreadyOver(String),

    #[error("Samples found but dosage history is empty.")]
    SamplesWithoutDosage,

    #[error("Percentiles computation failed.")]
    PercentilesFailed,

    #[error("Error handling sample of {date}, details: {details}")]
    InvalidSample { date: String, details: String },

    #[error("Adjustment request execution failed.")]
    AdjustmentExecutionFailed,

    #[error("No adjustment found.")]
    NoAdjustmentFound,

    #[error("Failed to extract statistics at steady state.")]
    SteadyStateStatisticsFailed,

    #[error("Failed to extract apriori parameters.")]
    AprioriParametersFailed,

    #[error("Failed to extract population parameters.")]
    PopulationParametersFailed,

    #[error("Unit conversion error: {0}")]
    UnitConversion(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
