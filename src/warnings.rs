use serde::{Deserialize, Serialize};
use std::fmt;

/// Non-fatal finding attached to a result. Carries the data needed to build a
/// localized message downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Warning {
    DoseBelowMinimum { bound: f64, unit: String },
    DoseAboveMaximum { bound: f64, unit: String },
    CovariateOutOfRange { covariate_id: String, value: f64, unit: String },
}

impl Warning {
    pub fn translation_key(&self) -> &'static str {
        match self {
            Warning::DoseBelowMinimum { .. } => "minimum_dosage_warning",
            Warning::DoseAboveMaximum { .. } => "maximum_dosage_warning",
            Warning::CovariateOutOfRange { .. } => "covariate_validation_warning",
        }
    }

    /// Parenthesized detail appended after the translated key.
    pub fn detail(&self) -> String {
        match self {
            Warning::DoseBelowMinimum { bound, unit } | Warning::DoseAboveMaximum { bound, unit } => {
                format!("({} {})", bound, unit)
            }
            Warning::CovariateOutOfRange { covariate_id, value, unit } if unit.is_empty() => {
                format!("({}: {})", covariate_id, value)
            }
            Warning::CovariateOutOfRange { covariate_id, value, unit } => {
                format!("({}: {} {})", covariate_id, value, unit)
            }
        }
    }

    pub fn english_text(&self) -> &'static str {
        match self {
            Warning::DoseBelowMinimum { .. } => "Minimum recommended dosage reached",
            Warning::DoseAboveMaximum { .. } => "Maximum recommended dosage reached",
            Warning::CovariateOutOfRange { .. } => "Covariate value outside of the model validation range",
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.english_text(), self.detail())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dose_warning_text() {
        let warning = Warning::DoseBelowMinimum { bound: 100.0, unit: "mg".to_string() };
        assert_eq!(warning.to_string(), "Minimum recommended dosage reached (100 mg)");
        assert_eq!(warning.translation_key(), "minimum_dosage_warning");
    }

    #[test]
    fn test_dimensionless_covariate_detail() {
        let warning = Warning::CovariateOutOfRange {
            covariate_id: "gist".to_string(),
            value: 2.0,
            unit: String::new(),
        };
        assert_eq!(warning.detail(), "(gist: 2)");

        let warning = Warning::CovariateOutOfRange {
            covariate_id: "bodyweight".to_string(),
            value: 150.0,
            unit: "kg".to_string(),
        };
        assert_eq!(warning.detail(), "(bodyweight: 150 kg)");
    }
}
