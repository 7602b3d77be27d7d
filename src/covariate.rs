use crate::context::{CovariateResult, CovariateSource};
use crate::drug_model::{CovariateDefinition, DrugModel};
use crate::models::{DataType, DateTime, PatientCovariate};
use crate::warnings::Warning;
use crate::{errors::XpertError, units};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::collections::{BTreeMap, HashMap};

pub const AGE: &str = "age";
pub const BIRTHDATE: &str = "birthdate";

/// Resolves patient covariates against the covariate definitions of a model.
pub struct CovariateResolver;

impl CovariateResolver {
    /// Patient covariates usable by `model`, grouped by id and sorted by date.
    /// A birth date feeds the `age` definition.
    pub fn group_for_model<'a>(
        model: &DrugModel,
        covariates: &'a [PatientCovariate],
    ) -> BTreeMap<&'a str, Vec<&'a PatientCovariate>> {
        let wants_age = model.covariates.iter().any(|d| d.id == AGE && !d.computed);
        let mut grouped: BTreeMap<&str, Vec<&PatientCovariate>> = BTreeMap::new();

        for covariate in covariates {
            let defined = model
                .covariates
                .iter()
                .any(|d| d.id == covariate.id && !d.computed);
            if defined || (covariate.id == BIRTHDATE && wants_age) {
                grouped.entry(covariate.id.as_str()).or_default().push(covariate);
            }
        }
        for values in grouped.values_mut() {
            values.sort_by_key(|c| c.date);
        }
        grouped
    }

    /// Number of non-computed definitions without a patient value, and the
    /// covariate results of the model. Ambiguous or malformed patient values
    /// abort with an error naming the covariate and the model.
    pub fn score(
        model: &DrugModel,
        covariates: &[PatientCovariate],
        computation_time: DateTime,
    ) -> Result<(usize, Vec<CovariateResult>), XpertError> {
        let grouped = Self::group_for_model(model, covariates);
        let mut score = 0;
        let mut results = Vec::new();

        for definition in model.covariates.iter().filter(|d| !d.computed) {
            let ambiguous = |details: String| XpertError::AmbiguousCovariate {
                model: model.id.clone(),
                covariate: definition.id.clone(),
                details,
            };

            if definition.id == AGE {
                let birthdates = match grouped.get(BIRTHDATE) {
                    Some(values) => values,
                    None => {
                        score += 1;
                        results.push(Self::model_result(definition));
                        continue;
                    }
                };
                if birthdates.len() > 1 {
                    return Err(ambiguous("Multiple birthdate not allowed.".to_string()));
                }
                let birthdate = birthdates[0];
                let birth = Self::birth_date(birthdate).map_err(ambiguous)?;
                let age = Self::age_in(&definition.unit, birth, computation_time);
                results.push(Self::patient_result(definition, birthdate, age));
                continue;
            }

            match grouped.get(definition.id.as_str()) {
                None => {
                    score += 1;
                    results.push(Self::model_result(definition));
                }
                Some(values) => {
                    for covariate in values {
                        let value = Self::numeric_value(covariate, definition).map_err(ambiguous)?;
                        results.push(Self::patient_result(definition, covariate, value));
                    }
                }
            }
        }

        results.sort_by(|a, b| a.definition_id.cmp(&b.definition_id).then(a.date.cmp(&b.date)));
        Ok((score, results))
    }

    /// Rejects patient data `model` cannot use unambiguously: several birth
    /// dates when it needs an age, a birth date that is not a date, or a
    /// value whose data type contradicts its definition.
    pub fn check_patient_data(model: &DrugModel, covariates: &[PatientCovariate]) -> Result<(), XpertError> {
        let grouped = Self::group_for_model(model, covariates);

        for definition in model.covariates.iter().filter(|d| !d.computed) {
            let ambiguous = |details: String| XpertError::AmbiguousCovariate {
                model: model.id.clone(),
                covariate: definition.id.clone(),
                details,
            };

            if definition.id == AGE {
                if let Some(birthdates) = grouped.get(BIRTHDATE) {
                    if birthdates.len() > 1 {
                        return Err(ambiguous("Multiple birthdate not allowed.".to_string()));
                    }
                    Self::birth_date(birthdates[0]).map_err(ambiguous)?;
                }
            } else if let Some(values) = grouped.get(definition.id.as_str()) {
                for covariate in values {
                    Self::check_data_type(covariate, definition).map_err(ambiguous)?;
                }
            }
        }

        Ok(())
    }

    /// Values of the `wanted` covariates at `at`, in definition units. The
    /// patient value in effect is the latest one measured at or before `at`,
    /// else the earliest one; the model default otherwise. Errors carry the
    /// offending covariate id.
    pub fn values_at(
        model: &DrugModel,
        covariates: &[PatientCovariate],
        wanted: &[&str],
        at: DateTime,
    ) -> Result<HashMap<String, f64>, (String, String)> {
        let grouped = Self::group_for_model(model, covariates);
        let mut values = HashMap::new();

        for id in wanted {
            let definition = match model.covariates.iter().find(|d| d.id == *id) {
                Some(definition) => definition,
                None => continue,
            };
            let source = if definition.id == AGE { BIRTHDATE } else { definition.id.as_str() };

            let value = match grouped.get(source).and_then(|list| Self::in_effect(list, at)) {
                None => definition.default_value,
                Some(covariate) if definition.id == AGE => {
                    let birth = Self::birth_date(covariate).map_err(|e| (definition.id.clone(), e))?;
                    Self::age_in(&definition.unit, birth, at)
                }
                Some(covariate) => {
                    Self::numeric_value(covariate, definition).map_err(|e| (definition.id.clone(), e))?
                }
            };
            values.insert(definition.id.clone(), value);
        }

        Ok(values)
    }

    fn in_effect<'a>(sorted: &[&'a PatientCovariate], at: DateTime) -> Option<&'a PatientCovariate> {
        sorted
            .iter()
            .rev()
            .find(|c| c.date <= at)
            .or_else(|| sorted.first())
            .copied()
    }

    /// Value of a patient covariate converted to the unit of its definition.
    pub fn numeric_value(covariate: &PatientCovariate, definition: &CovariateDefinition) -> Result<f64, String> {
        Self::check_data_type(covariate, definition)?;

        let raw = match covariate.data_type {
            DataType::Int | DataType::Double => covariate
                .value
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid numeric value '{}'", covariate.value))?,
            DataType::Bool => match covariate.value.trim().to_lowercase().as_str() {
                "1" | "true" => 1.0,
                "0" | "false" => 0.0,
                _ => return Err(format!("invalid boolean value '{}'", covariate.value)),
            },
            DataType::Date => {
                return Err("date covariates have no numeric value".to_string());
            }
        };

        if covariate.unit.trim().is_empty() || definition.unit.trim().is_empty() {
            return Ok(raw);
        }
        units::convert(raw, &covariate.unit, &definition.unit).map_err(|e| e.to_string())
    }

    fn check_data_type(covariate: &PatientCovariate, definition: &CovariateDefinition) -> Result<(), String> {
        let involves_date = definition.data_type == DataType::Date || covariate.data_type == DataType::Date;
        if involves_date && definition.data_type != covariate.data_type {
            return Err(format!(
                "data type {:?} does not match the definition data type {:?}",
                covariate.data_type, definition.data_type
            ));
        }
        Ok(())
    }

    fn birth_date(covariate: &PatientCovariate) -> Result<NaiveDateTime, String> {
        if covariate.data_type != DataType::Date {
            return Err("Invalid data type for birthdate.".to_string());
        }
        Self::parse_date(&covariate.value)
            .ok_or_else(|| format!("invalid birthdate '{}'", covariate.value))
    }

    pub fn parse_date(value: &str) -> Option<NaiveDateTime> {
        let value = value.trim();
        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }

    /// Age in full years (`y`), months (`m` or `month`), weeks (`w`) or days (`d`).
    pub fn age_in(unit: &str, birth: NaiveDateTime, at: NaiveDateTime) -> f64 {
        if at <= birth {
            return 0.0;
        }
        let days = (at - birth).num_days();
        let before_anniversary_day = (at.day(), at.num_seconds_from_midnight())
            < (birth.day(), birth.num_seconds_from_midnight());

        match unit.trim() {
            "d" => days as f64,
            "w" => (days / 7) as f64,
            "m" | "month" => {
                let mut months = (at.year() - birth.year()) * 12 + at.month() as i32 - birth.month() as i32;
                if before_anniversary_day {
                    months -= 1;
                }
                months.max(0) as f64
            }
            _ => {
                let mut years = at.year() - birth.year();
                if (at.month(), at.day(), at.num_seconds_from_midnight())
                    < (birth.month(), birth.day(), birth.num_seconds_from_midnight())
                {
                    years -= 1;
                }
                years.max(0) as f64
            }
        }
    }

    fn model_result(definition: &CovariateDefinition) -> CovariateResult {
        CovariateResult {
            definition_id: definition.id.clone(),
            source: CovariateSource::Model,
            value: definition.default_value.to_string(),
            unit: definition.unit.clone(),
            data_type: definition.data_type,
            date: None,
            warning: None,
        }
    }

    fn patient_result(definition: &CovariateDefinition, covariate: &PatientCovariate, value: f64) -> CovariateResult {
        let warning = match &definition.validation {
            Some(rule) if !rule.accepts(value) => Some(Warning::CovariateOutOfRange {
                covariate_id: definition.id.clone(),
                value,
                unit: definition.unit.clone(),
            }),
            _ => None,
        };

        CovariateResult {
            definition_id: definition.id.clone(),
            source: CovariateSource::Patient,
            value: covariate.value.clone(),
            unit: covariate.unit.clone(),
            data_type: covariate.data_type,
            date: Some(covariate.date),
            warning,
        }
    }
}
