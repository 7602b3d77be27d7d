use crate::context::{DoseResult, RequestContext};
use crate::drug_model::DrugModel;
use crate::errors::XpertError;
use crate::models::{Dosage, DoseId, SingleDose};
use crate::pipeline::FlowStep;
use crate::warnings::Warning;
use crate::{units, Result};
use std::collections::BTreeMap;

/// Checks every administered dose against the recommended range of the
/// selected model.
pub struct DoseValidator;

impl DoseValidator {
    fn validate(ctx: &RequestContext) -> Result<BTreeMap<DoseId, DoseResult>> {
        let treatment = ctx.treatment().ok_or(XpertError::MissingTreatment)?;
        let model = ctx.drug_model().ok_or(XpertError::MissingDrugModel)?;

        let mut results = BTreeMap::new();
        for range in &treatment.dosage_history.time_ranges {
            Self::check_dosage(&range.dosage, model, &mut results)?;
        }
        Ok(results)
    }

    fn check_dosage(dosage: &Dosage, model: &DrugModel, results: &mut BTreeMap<DoseId, DoseResult>) -> Result<()> {
        match dosage {
            Dosage::Single(dose) => {
                let result = Self::check_dose(dose, model)?;
                results.insert(dose.id, result);
            }
            Dosage::Loop(inner) => Self::check_dosage(inner, model, results)?,
            Dosage::Repeat { dosage, .. } => Self::check_dosage(dosage, model, results)?,
            Dosage::Sequence(list) => {
                for item in list {
                    Self::check_dosage(item, model, results)?;
                }
            }
            Dosage::ParallelSequence(branches) => {
                for branch in branches {
                    Self::check_dosage(&branch.dosage, model, results)?;
                }
            }
        }
        Ok(())
    }

    pub fn check_dose(dose: &SingleDose, model: &DrugModel) -> Result<DoseResult> {
        let entry = model.formulation_and_route(&dose.formulation_and_route).ok_or_else(|| {
            XpertError::InvalidDosage("No corresponding full formulation and route found for a dosage.".to_string())
        })?;
        let valid = &entry.valid_doses;

        let value = units::convert(dose.dose, &dose.unit, &valid.unit)
            .map_err(|e| XpertError::InvalidDosage(e.to_string()))?;

        let warning = if value < valid.from {
            Some(Warning::DoseBelowMinimum { bound: valid.from, unit: valid.unit.clone() })
        } else if value > valid.to {
            Some(Warning::DoseAboveMaximum { bound: valid.to, unit: valid.unit.clone() })
        } else {
            None
        };

        Ok(DoseResult { dose_id: dose.id, warning })
    }
}

impl FlowStep for DoseValidator {
    fn name(&self) -> &'static str {
        "dose validation"
    }

    fn perform(&self, ctx: &mut RequestContext) {
        match Self::validate(ctx) {
            Ok(results) => {
                let warnings = results.values().filter(|r| r.warning.is_some()).count();
                if warnings > 0 {
                    log::warn!("{} of {} doses outside the recommended range", warnings, results.len());
                }
                ctx.set_dose_results(results);
            }
            Err(e) => ctx.set_error(e.to_string()),
        }
    }
}
