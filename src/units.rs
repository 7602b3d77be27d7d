use crate::{errors::XpertError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Dimension {
    Mass,
    Volume,
    Concentration,
    Time,
    Dimensionless,
}

/// Scale of a unit relative to the base unit of its dimension
/// (mg, l, mg/l, h respectively).
fn lookup(unit: &str) -> Option<(Dimension, f64)> {
    let normalized = unit.trim().to_lowercase();
    let entry = match normalized.as_str() {
        "kg" => (Dimension::Mass, 1.0e6),
        "g" => (Dimension::Mass, 1.0e3),
        "mg" => (Dimension::Mass, 1.0),
        "ug" | "µg" => (Dimension::Mass, 1.0e-3),
        "ng" => (Dimension::Mass, 1.0e-6),

        "l" => (Dimension::Volume, 1.0),
        "dl" => (Dimension::Volume, 0.1),
        "ml" => (Dimension::Volume, 1.0e-3),
        "ul" | "µl" => (Dimension::Volume, 1.0e-6),

        "g/l" | "mg/ml" => (Dimension::Concentration, 1.0e3),
        "mg/l" | "ug/ml" | "µg/ml" => (Dimension::Concentration, 1.0),
        "ug/l" | "µg/l" | "ng/ml" => (Dimension::Concentration, 1.0e-3),
        "ng/l" => (Dimension::Concentration, 1.0e-6),

        "s" => (Dimension::Time, 1.0 / 3600.0),
        "min" => (Dimension::Time, 1.0 / 60.0),
        "h" => (Dimension::Time, 1.0),
        "d" => (Dimension::Time, 24.0),
        "w" => (Dimension::Time, 168.0),
        "month" => (Dimension::Time, 730.0),
        "y" => (Dimension::Time, 8760.0),

        "" | "-" => (Dimension::Dimensionless, 1.0),
        _ => return None,
    };
    Some(entry)
}

/// Convert a value between two units of the same dimension.
pub fn convert(value: f64, from: &str, to: &str) -> Result<f64> {
    if from.trim().eq_ignore_ascii_case(to.trim()) {
        return Ok(value);
    }

    let (from_dim, from_scale) = lookup(from)
        .ok_or_else(|| XpertError::UnitConversion(format!("unknown unit '{}'", from)))?;
    let (to_dim, to_scale) = lookup(to)
        .ok_or_else(|| XpertError::UnitConversion(format!("unknown unit '{}'", to)))?;

    if from_dim != to_dim {
        return Err(XpertError::UnitConversion(format!(
            "cannot convert '{}' to '{}'",
            from, to
        )));
    }

    Ok(value * from_scale / to_scale)
}

/// Convert a time quantity into a chrono duration (second resolution).
pub fn to_duration(value: f64, unit: &str) -> Result<chrono::Duration> {
    let hours = convert(value, unit, "h")?;
    Ok(chrono::Duration::seconds((hours * 3600.0).round() as i64))
}

pub fn is_concentration(unit: &str) -> bool {
    matches!(lookup(unit), Some((Dimension::Concentration, _)))
}
