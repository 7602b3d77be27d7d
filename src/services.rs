//! Collaborators the pipeline talks to: the drug model repository, the
//! computing engine and the translation dictionary.

use crate::adjustment::{AdjustmentTrait, PercentilesTrait, PredictionParameterType};
use crate::drug_model::DrugModel;
use crate::models::{DateTime, OutputLang, Treatment};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub trait DrugModelRepository: Send + Sync {
    fn models_for_drug(&self, drug_id: &str) -> Vec<Arc<DrugModel>>;
}

/// Repository filled once at start-up and shared read-only afterwards.
#[derive(Debug, Default)]
pub struct InMemoryDrugModelRepository {
    models: Vec<Arc<DrugModel>>,
}

impl InMemoryDrugModelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_models(models: Vec<DrugModel>) -> Self {
        Self {
            models: models.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn add_model(&mut self, model: DrugModel) {
        self.models.push(Arc::new(model));
    }

    /// Load a JSON array of drug models.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let models: Vec<DrugModel> = serde_json::from_reader(reader)?;
        log::info!("Loaded {} drug models", models.len());
        Ok(Self::from_models(models))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl DrugModelRepository for InMemoryDrugModelRepository {
    fn models_for_drug(&self, drug_id: &str) -> Vec<Arc<DrugModel>> {
        self.models
            .iter()
            .filter(|model| model.drug_id == drug_id)
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Computing engine boundary
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Computation failed: {0}")]
pub struct ComputingFailure(pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub id: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleStatistic {
    pub name: String,
    pub value: f64,
}

/// Predicted concentrations over one dosing cycle. `times` are hour offsets
/// from `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleData {
    pub start: DateTime,
    pub end: DateTime,
    pub unit: String,
    pub times: Vec<f64>,
    pub concentrations: Vec<f64>,
    #[serde(default)]
    pub parameters: Vec<ParameterValue>,
    #[serde(default)]
    pub statistics: Vec<CycleStatistic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentCandidate {
    pub score: f64,
    pub cycle_data: Vec<CycleData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentData {
    pub adjustments: Vec<AdjustmentCandidate>,
}

/// One entry per requested rank, in rank order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentilesData {
    pub ranks: Vec<u32>,
    pub percentiles: Vec<Vec<CycleData>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub parameter_type: PredictionParameterType,
    pub values: Vec<ParameterValue>,
}

pub trait ComputingService: Send + Sync {
    fn compute_adjustment(
        &self,
        adjustment: &AdjustmentTrait,
        treatment: &Treatment,
        model: &DrugModel,
    ) -> std::result::Result<AdjustmentData, ComputingFailure>;

    fn compute_percentiles(
        &self,
        percentiles: &PercentilesTrait,
        treatment: &Treatment,
        model: &DrugModel,
    ) -> std::result::Result<PercentilesData, ComputingFailure>;
}

// ---------------------------------------------------------------------------
// Translations
// ---------------------------------------------------------------------------

pub trait TranslationService: Send + Sync {
    fn translate(&self, key: &str, lang: OutputLang) -> Option<String>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DictionaryTranslations {
    entries: HashMap<OutputLang, HashMap<String, String>>,
}

impl DictionaryTranslations {
    pub fn new() -> Self {
        Self::default()
    }

    /// English and French texts of the warning keys.
    pub fn with_defaults() -> Self {
        let mut translations = Self::new();
        for (lang, key, text) in [
            (OutputLang::English, "minimum_dosage_warning", "Minimum recommended dosage reached"),
            (OutputLang::English, "maximum_dosage_warning", "Maximum recommended dosage reached"),
            (OutputLang::English, "covariate_validation_warning", "Covariate value outside of the model validation range"),
            (OutputLang::French, "minimum_dosage_warning", "Dosage minimum recommandé atteint"),
            (OutputLang::French, "maximum_dosage_warning", "Dosage maximum recommandé atteint"),
            (OutputLang::French, "covariate_validation_warning", "Valeur de covariable hors du domaine de validation du modèle"),
        ] {
            translations.insert(lang, key, text);
        }
        translations
    }

    pub fn insert(&mut self, lang: OutputLang, key: &str, text: &str) {
        self.entries
            .entry(lang)
            .or_default()
            .insert(key.to_string(), text.to_string());
    }
}

impl TranslationService for DictionaryTranslations {
    fn translate(&self, key: &str, lang: OutputLang) -> Option<String> {
        self.entries.get(&lang)?.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example_data::ExampleDataGenerator;

    #[test]
    fn test_repository_filters_by_drug() {
        let repository = InMemoryDrugModelRepository::from_models(vec![
            ExampleDataGenerator::imatinib_model(),
            ExampleDataGenerator::busulfan_model(),
        ]);
        assert_eq!(repository.len(), 2);
        assert_eq!(repository.models_for_drug("imatinib").len(), 1);
        assert!(repository.models_for_drug("rifampicin").is_empty());
    }

    #[test]
    fn test_dictionary_lookup() {
        let mut translations = DictionaryTranslations::new();
        translations.insert(OutputLang::French, "minimum_dosage_warning", "Dosage minimum atteint");
        assert_eq!(
            translations.translate("minimum_dosage_warning", OutputLang::French).as_deref(),
            Some("Dosage minimum atteint")
        );
        assert!(translations.translate("minimum_dosage_warning", OutputLang::English).is_none());

        let defaults = DictionaryTranslations::with_defaults();
        assert_eq!(
            defaults.translate("maximum_dosage_warning", OutputLang::French).as_deref(),
            Some("Dosage maximum recommandé atteint")
        );
    }
}
