use chrono::{Duration, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

pub type DateTime = NaiveDateTime;

/// Durations travel as whole seconds.
pub mod serde_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::seconds(i64::deserialize(deserializer)?))
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Xml,
    Html,
    Pdf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputLang {
    English,
    French,
}

impl OutputLang {
    pub fn code(&self) -> &'static str {
        match self {
            OutputLang::English => "en",
            OutputLang::French => "fr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadingOption {
    NoLoadingDose,
    LoadingDoseAllowed,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestPeriodOption {
    NoRestPeriod,
    RestPeriodAllowed,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetExtractionOption {
    PopulationValues,
    AprioriValues,
    IndividualValues,
    DefinitionIfNoIndividualTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormulationAndRouteSelectionOption {
    LastFormulationAndRoute,
    AllFormulationAndRoutes,
}

/// One dose-adjustment request for a drug of the patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XpertRequest {
    pub drug_id: String,
    pub output_format: OutputFormat,
    pub output_lang: OutputLang,
    #[serde(default)]
    pub adjustment_time: Option<DateTime>,
    pub loading_option: LoadingOption,
    pub rest_period_option: RestPeriodOption,
    #[serde(default)]
    pub target_extraction_option: Option<TargetExtractionOption>,
    #[serde(default)]
    pub formulation_and_route_selection_option: Option<FormulationAndRouteSelectionOption>,
}

impl XpertRequest {
    pub fn new(drug_id: &str) -> Self {
        Self {
            drug_id: drug_id.to_string(),
            output_format: OutputFormat::Xml,
            output_lang: OutputLang::English,
            adjustment_time: None,
            loading_option: LoadingOption::Unspecified,
            rest_period_option: RestPeriodOption::Unspecified,
            target_extraction_option: None,
            formulation_and_route_selection_option: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Formulation and route
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Formulation {
    ParenteralSolution,
    OralSolution,
    Tablet,
    Capsule,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdministrationRoute {
    Oral,
    IntravenousBolus,
    IntravenousDrip,
    Intramuscular,
    Subcutaneous,
    Rectal,
    Nasal,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbsorptionModel {
    Extravascular,
    ExtravascularLag,
    Intravascular,
    Infusion,
    Undefined,
}

/// Two formulations and routes are the same when formulation, route and
/// absorption model agree; the administration name is free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulationAndRoute {
    pub formulation: Formulation,
    #[serde(default)]
    pub administration_name: String,
    pub route: AdministrationRoute,
    pub absorption_model: AbsorptionModel,
}

impl FormulationAndRoute {
    pub fn new(formulation: Formulation, route: AdministrationRoute, absorption_model: AbsorptionModel) -> Self {
        Self {
            formulation,
            administration_name: String::new(),
            route,
            absorption_model,
        }
    }
}

impl PartialEq for FormulationAndRoute {
    fn eq(&self, other: &Self) -> bool {
        self.formulation == other.formulation
            && self.route == other.route
            && self.absorption_model == other.absorption_model
    }
}

impl Eq for FormulationAndRoute {}

impl Hash for FormulationAndRoute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.formulation.hash(state);
        self.route.hash(state);
        self.absorption_model.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Dosage tree
// ---------------------------------------------------------------------------

/// Stable identity of a dose leaf, assigned at import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DoseId(pub u32);

/// Stable identity of a sample, assigned at import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SampleId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DoseTiming {
    /// Repeats every `interval` from the start of its slot.
    Lasting {
        #[serde(with = "serde_seconds")]
        interval: Duration,
    },
    /// Once a day at a fixed time.
    Daily { time: NaiveTime },
    /// Once a week at a fixed day and time.
    Weekly { day: Weekday, time: NaiveTime },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleDose {
    #[serde(default)]
    pub id: DoseId,
    pub dose: f64,
    pub unit: String,
    pub formulation_and_route: FormulationAndRoute,
    #[serde(with = "serde_seconds")]
    pub infusion_time: Duration,
    pub timing: DoseTiming,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelBranch {
    #[serde(with = "serde_seconds")]
    pub offset: Duration,
    pub dosage: Dosage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Dosage {
    Single(SingleDose),
    Loop(Box<Dosage>),
    Repeat { dosage: Box<Dosage>, times: u32 },
    Sequence(Vec<Dosage>),
    ParallelSequence(Vec<ParallelBranch>),
}

impl Dosage {
    /// Leaves in tree order.
    pub fn single_doses(&self) -> Vec<&SingleDose> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a SingleDose>) {
        match self {
            Dosage::Single(dose) => leaves.push(dose),
            Dosage::Loop(inner) => inner.collect_leaves(leaves),
            Dosage::Repeat { dosage, .. } => dosage.collect_leaves(leaves),
            Dosage::Sequence(list) => list.iter().for_each(|d| d.collect_leaves(leaves)),
            Dosage::ParallelSequence(branches) => {
                branches.iter().for_each(|b| b.dosage.collect_leaves(leaves))
            }
        }
    }

    /// Nominal length of one pass through the dosage, ignoring slot alignment
    /// of daily and weekly timings.
    pub fn cycle_length(&self) -> Duration {
        match self {
            Dosage::Single(dose) => match &dose.timing {
                DoseTiming::Lasting { interval } => *interval,
                DoseTiming::Daily { .. } => Duration::days(1),
                DoseTiming::Weekly { .. } => Duration::days(7),
            },
            Dosage::Loop(inner) => inner.cycle_length(),
            Dosage::Repeat { dosage, times } => dosage
                .cycle_length()
                .checked_mul(i32::try_from(*times).unwrap_or(i32::MAX))
                .unwrap_or_else(Duration::max_value),
            Dosage::Sequence(list) => list.iter().fold(Duration::zero(), |total, d| {
                total.checked_add(&d.cycle_length()).unwrap_or_else(Duration::max_value)
            }),
            Dosage::ParallelSequence(branches) => branches
                .iter()
                .map(|b| b.offset.checked_add(&b.dosage.cycle_length()).unwrap_or_else(Duration::max_value))
                .max()
                .unwrap_or_else(Duration::zero),
        }
    }

    fn for_each_leaf_mut(&mut self, f: &mut dyn FnMut(&mut SingleDose)) {
        match self {
            Dosage::Single(dose) => f(dose),
            Dosage::Loop(inner) => inner.for_each_leaf_mut(f),
            Dosage::Repeat { dosage, .. } => dosage.for_each_leaf_mut(f),
            Dosage::Sequence(list) => list.iter_mut().for_each(|d| d.for_each_leaf_mut(f)),
            Dosage::ParallelSequence(branches) => branches
                .iter_mut()
                .for_each(|b| b.dosage.for_each_leaf_mut(f)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosageTimeRange {
    pub start: DateTime,
    /// Open-ended when absent.
    #[serde(default)]
    pub end: Option<DateTime>,
    pub dosage: Dosage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DosageHistory {
    pub time_ranges: Vec<DosageTimeRange>,
}

impl DosageHistory {
    pub fn is_empty(&self) -> bool {
        self.time_ranges.is_empty()
    }

    pub fn single_doses(&self) -> Vec<&SingleDose> {
        self.time_ranges
            .iter()
            .flat_map(|range| range.dosage.single_doses())
            .collect()
    }

    /// Formulation and route of the last leaf of the most recent time range.
    pub fn last_formulation_and_route(&self) -> Option<&FormulationAndRoute> {
        self.time_ranges
            .iter()
            .max_by_key(|range| range.start)
            .and_then(|range| range.dosage.single_doses().last().copied())
            .map(|dose| &dose.formulation_and_route)
    }

    /// Longest single pass among the time ranges.
    pub fn longest_cycle(&self) -> Duration {
        self.time_ranges
            .iter()
            .map(|range| range.dosage.cycle_length())
            .max()
            .unwrap_or_else(Duration::zero)
    }

    pub fn oldest_start(&self) -> Option<DateTime> {
        self.time_ranges.iter().map(|range| range.start).min()
    }

    /// Start of the most recent time range that began at or before `time`.
    pub fn latest_start_before(&self, time: DateTime) -> Option<DateTime> {
        self.time_ranges
            .iter()
            .map(|range| range.start)
            .filter(|start| *start <= time)
            .max()
    }
}

// ---------------------------------------------------------------------------
// Samples, targets, covariates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub id: SampleId,
    pub date: DateTime,
    pub analyte_id: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    Residual,
    Peak,
    Mean,
    Auc,
    Auc24,
    CumulativeAuc,
    AucOverMic,
    Auc24OverMic,
    TimeOverMic,
    PeakDividedByMic,
    ResidualDividedByMic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub active_moiety_id: String,
    pub target_type: TargetType,
    pub min: f64,
    pub best: f64,
    pub max: f64,
    pub unit: String,
    #[serde(default)]
    pub mic: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Double,
    Bool,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientCovariate {
    pub id: String,
    pub value: String,
    pub data_type: DataType,
    #[serde(default)]
    pub unit: String,
    pub date: DateTime,
}

impl PatientCovariate {
    pub fn new(id: &str, value: &str, data_type: DataType, unit: &str, date: DateTime) -> Self {
        Self {
            id: id.to_string(),
            value: value.to_string(),
            data_type,
            unit: unit.to_string(),
            date,
        }
    }
}

// ---------------------------------------------------------------------------
// Treatment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    pub dosage_history: DosageHistory,
    #[serde(default)]
    pub samples: Vec<Sample>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub covariates: Vec<PatientCovariate>,
}

impl Treatment {
    pub fn new(
        dosage_history: DosageHistory,
        samples: Vec<Sample>,
        targets: Vec<Target>,
        covariates: Vec<PatientCovariate>,
    ) -> Self {
        let mut treatment = Self {
            dosage_history,
            samples,
            targets,
            covariates,
        };
        treatment.assign_identities();
        treatment
    }

    /// Number dose leaves and samples in import order.
    pub fn assign_identities(&mut self) {
        let mut next_dose = 0;
        for range in &mut self.dosage_history.time_ranges {
            range.dosage.for_each_leaf_mut(&mut |dose| {
                dose.id = DoseId(next_dose);
                next_dose += 1;
            });
        }
        for (index, sample) in self.samples.iter_mut().enumerate() {
            sample.id = SampleId(index as u32);
        }
    }
}

/// One imported request with the treatment it applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInput {
    pub request: XpertRequest,
    #[serde(default)]
    pub treatment: Option<Treatment>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> DateTime {
        NaiveDate::from_ymd_opt(2022, 6, day).unwrap().and_hms_opt(hour, 0, 0).unwrap()
    }

    fn dose(mg: f64, route: AdministrationRoute) -> Dosage {
        Dosage::Single(SingleDose {
            id: DoseId::default(),
            dose: mg,
            unit: "mg".to_string(),
            formulation_and_route: FormulationAndRoute::new(
                Formulation::ParenteralSolution,
                route,
                AbsorptionModel::Extravascular,
            ),
            infusion_time: Duration::minutes(60),
            timing: DoseTiming::Lasting { interval: Duration::hours(12) },
        })
    }

    #[test]
    fn test_cycle_length() {
        let dosage = Dosage::Sequence(vec![
            dose(400.0, AdministrationRoute::Oral),
            Dosage::Repeat { dosage: Box::new(dose(200.0, AdministrationRoute::Oral)), times: 3 },
        ]);
        assert_eq!(dosage.cycle_length(), Duration::hours(48));

        let history = DosageHistory {
            time_ranges: vec![
                DosageTimeRange { start: at(19, 8), end: None, dosage },
                DosageTimeRange { start: at(10, 8), end: Some(at(11, 8)), dosage: dose(1.0, AdministrationRoute::Oral) },
            ],
        };
        assert_eq!(history.longest_cycle(), Duration::hours(48));
    }

    #[test]
    fn test_identities_follow_tree_order() {
        let history = DosageHistory {
            time_ranges: vec![DosageTimeRange {
                start: at(19, 8),
                end: None,
                dosage: Dosage::Sequence(vec![
                    dose(400.0, AdministrationRoute::Oral),
                    Dosage::Repeat { dosage: Box::new(dose(200.0, AdministrationRoute::Oral)), times: 2 },
                ]),
            }],
        };
        let treatment = Treatment::new(history, vec![], vec![], vec![]);
        let ids: Vec<DoseId> = treatment.dosage_history.single_doses().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![DoseId(0), DoseId(1)]);
    }

    #[test]
    fn test_administration_name_ignored_in_equality() {
        let mut a = FormulationAndRoute::new(
            Formulation::ParenteralSolution,
            AdministrationRoute::Oral,
            AbsorptionModel::Extravascular,
        );
        let b = a.clone();
        a.administration_name = "foo bar".to_string();
        assert_eq!(a, b);
    }

    #[test]
    fn test_last_formulation_and_route_uses_latest_range() {
        let history = DosageHistory {
            time_ranges: vec![
                DosageTimeRange { start: at(20, 8), end: None, dosage: dose(400.0, AdministrationRoute::IntravenousDrip) },
                DosageTimeRange { start: at(19, 8), end: Some(at(20, 8)), dosage: dose(400.0, AdministrationRoute::Oral) },
            ],
        };
        assert_eq!(
            history.last_formulation_and_route().unwrap().route,
            AdministrationRoute::IntravenousDrip
        );
        assert_eq!(history.oldest_start(), Some(at(19, 8)));
        assert_eq!(history.latest_start_before(at(19, 23)), Some(at(19, 8)));
    }
}
