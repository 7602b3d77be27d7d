use crate::models::{
    serde_seconds, DateTime, DosageHistory, Dosage, DoseId, DoseTiming, FormulationAndRoute, SingleDose,
};
use crate::{errors::XpertError, Result};
use chrono::{Datelike, Duration};
use serde::{Deserialize, Serialize};

/// One concrete administration derived from the dosage tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeEvent {
    pub time: DateTime,
    pub dose_id: DoseId,
    pub dose: f64,
    pub unit: String,
    #[serde(with = "serde_seconds")]
    pub interval: Duration,
    #[serde(with = "serde_seconds")]
    pub infusion_time: Duration,
    pub formulation_and_route: FormulationAndRoute,
}

pub struct IntakeExtractor;

impl IntakeExtractor {
    /// Expand the dosage history into intakes within `[from, until)`, sorted by
    /// time. Time range ends are exclusive.
    pub fn extract(history: &DosageHistory, from: DateTime, until: DateTime) -> Result<Vec<IntakeEvent>> {
        let mut intakes = Vec::new();

        for range in &history.time_ranges {
            if range.end.map_or(false, |end| end <= from) || range.start >= until {
                continue;
            }
            let limit = range.end.map_or(until, |end| end.min(until));

            let mut range_intakes = Vec::new();
            Self::expand(&range.dosage, range.start, limit, &mut range_intakes)?;
            intakes.extend(
                range_intakes
                    .into_iter()
                    .filter(|intake| intake.time >= from && intake.time < limit),
            );
        }

        intakes.sort_by_key(|intake| intake.time);
        Ok(intakes)
    }

    /// Appends the intakes of `dosage` starting at `cursor` and returns the
    /// instant its next repetition would start.
    fn expand(dosage: &Dosage, cursor: DateTime, limit: DateTime, out: &mut Vec<IntakeEvent>) -> Result<DateTime> {
        match dosage {
            Dosage::Single(dose) => {
                let (time, next) = Self::slot(dose, cursor);
                if time < limit {
                    out.push(Self::intake(dose, time, next - time));
                }
                Ok(next)
            }
            Dosage::Loop(inner) => {
                let mut current = cursor;
                while current < limit {
                    let next = Self::expand(inner, current, limit, out)?;
                    if next <= current {
                        return Err(XpertError::InvalidDosage(
                            "dosage loop does not advance in time".to_string(),
                        ));
                    }
                    current = next;
                }
                Ok(current)
            }
            Dosage::Repeat { dosage, times } => {
                let mut current = cursor;
                for _ in 0..*times {
                    if current >= limit {
                        break;
                    }
                    current = Self::expand(dosage, current, limit, out)?;
                }
                Ok(current)
            }
            Dosage::Sequence(list) => {
                let mut current = cursor;
                for item in list {
                    if current >= limit {
                        break;
                    }
                    current = Self::expand(item, current, limit, out)?;
                }
                Ok(current)
            }
            Dosage::ParallelSequence(branches) => {
                let mut end = cursor;
                for branch in branches {
                    let branch_end = Self::expand(&branch.dosage, cursor + branch.offset, limit, out)?;
                    end = end.max(branch_end);
                }
                Ok(end)
            }
        }
    }

    /// Intake time of a leaf placed at `cursor`, and the start of its next slot.
    fn slot(dose: &SingleDose, cursor: DateTime) -> (DateTime, DateTime) {
        match &dose.timing {
            DoseTiming::Lasting { interval } => (cursor, cursor + *interval),
            DoseTiming::Daily { time } => {
                let mut intake = cursor.date().and_time(*time);
                if intake < cursor {
                    intake += Duration::days(1);
                }
                (intake, intake + Duration::days(1))
            }
            DoseTiming::Weekly { day, time } => {
                let current = cursor.weekday().num_days_from_monday() as i64;
                let wanted = day.num_days_from_monday() as i64;
                let mut intake = cursor.date().and_time(*time) + Duration::days((wanted - current).rem_euclid(7));
                if intake < cursor {
                    intake += Duration::days(7);
                }
                (intake, intake + Duration::days(7))
            }
        }
    }

    fn intake(dose: &SingleDose, time: DateTime, interval: Duration) -> IntakeEvent {
        IntakeEvent {
            time,
            dose_id: dose.id,
            dose: dose.dose,
            unit: dose.unit.clone(),
            interval,
            infusion_time: dose.infusion_time,
            formulation_and_route: dose.formulation_and_route.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AbsorptionModel, AdministrationRoute, DosageTimeRange, Formulation, ParallelBranch,
    };
    use chrono::{NaiveDate, NaiveTime, Weekday};

    fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime {
        NaiveDate::from_ymd_opt(year, month, day).unwrap().and_hms_opt(hour, 0, 0).unwrap()
    }

    fn leaf(timing: DoseTiming) -> Dosage {
        Dosage::Single(SingleDose {
            id: DoseId(0),
            dose: 400.0,
            unit: "mg".to_string(),
            formulation_and_route: FormulationAndRoute::new(
                Formulation::ParenteralSolution,
                AdministrationRoute::Oral,
                AbsorptionModel::Extravascular,
            ),
            infusion_time: Duration::minutes(60),
            timing,
        })
    }

    fn history(start: DateTime, end: Option<DateTime>, dosage: Dosage) -> DosageHistory {
        DosageHistory { time_ranges: vec![DosageTimeRange { start, end, dosage }] }
    }

    #[test]
    fn test_loop_stops_at_exclusive_range_end() {
        let h = history(
            at(2018, 7, 6, 9),
            Some(at(2018, 7, 8, 9)),
            Dosage::Loop(Box::new(leaf(DoseTiming::Lasting { interval: Duration::hours(12) }))),
        );
        let intakes = IntakeExtractor::extract(&h, at(2018, 7, 6, 9), at(2019, 1, 1, 0)).unwrap();
        assert_eq!(intakes.len(), 4);
        assert_eq!(intakes.last().unwrap().time, at(2018, 7, 7, 21));
    }

    #[test]
    fn test_daily_and_weekly_timing() {
        let daily = history(
            at(2022, 6, 19, 8),
            None,
            Dosage::Loop(Box::new(leaf(DoseTiming::Daily { time: NaiveTime::from_hms_opt(20, 0, 0).unwrap() }))),
        );
        let intakes = IntakeExtractor::extract(&daily, at(2022, 6, 19, 8), at(2022, 6, 21, 8)).unwrap();
        let times: Vec<DateTime> = intakes.iter().map(|i| i.time).collect();
        assert_eq!(times, vec![at(2022, 6, 19, 20), at(2022, 6, 20, 20)]);

        // 2022-06-19 is a Sunday.
        let weekly = history(
            at(2022, 6, 19, 8),
            None,
            Dosage::Loop(Box::new(leaf(DoseTiming::Weekly {
                day: Weekday::Wed,
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            }))),
        );
        let intakes = IntakeExtractor::extract(&weekly, at(2022, 6, 19, 8), at(2022, 7, 1, 0)).unwrap();
        let times: Vec<DateTime> = intakes.iter().map(|i| i.time).collect();
        assert_eq!(times, vec![at(2022, 6, 22, 9), at(2022, 6, 29, 9)]);
    }

    #[test]
    fn test_repeat_and_parallel_sequence() {
        let dosage = Dosage::ParallelSequence(vec![
            ParallelBranch {
                offset: Duration::zero(),
                dosage: Dosage::Repeat {
                    dosage: Box::new(leaf(DoseTiming::Lasting { interval: Duration::hours(24) })),
                    times: 2,
                },
            },
            ParallelBranch {
                offset: Duration::hours(12),
                dosage: leaf(DoseTiming::Lasting { interval: Duration::hours(24) }),
            },
        ]);
        let h = history(at(2022, 6, 19, 8), None, dosage);
        let intakes = IntakeExtractor::extract(&h, at(2022, 6, 19, 0), at(2022, 7, 1, 0)).unwrap();
        let times: Vec<DateTime> = intakes.iter().map(|i| i.time).collect();
        assert_eq!(times, vec![at(2022, 6, 19, 8), at(2022, 6, 19, 20), at(2022, 6, 20, 8)]);
    }

    #[test]
    fn test_stalled_loop_is_an_error() {
        let h = history(
            at(2022, 6, 19, 8),
            None,
            Dosage::Loop(Box::new(leaf(DoseTiming::Lasting { interval: Duration::zero() }))),
        );
        assert!(IntakeExtractor::extract(&h, at(2022, 6, 19, 8), at(2022, 6, 20, 8)).is_err());
    }
}
