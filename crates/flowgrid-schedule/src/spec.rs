//! Schedule descriptor parsing.
//!
//! Parsing never fails: an unparseable descriptor becomes
//! [`ScheduleSpec::Unrecognized`] carrying the raw text, so stored
//! automations keep running on the fallback cadence instead of stalling.
//! Callers that want a hard rejection at save time use [`ScheduleSpec::validate`].

use flowgrid_core::error::{FlowGridError, Result};
use serde::{Deserialize, Serialize};

/// A parsed schedule descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScheduleSpec {
    /// `daily@HH:MM` — every day at the given UTC time.
    Daily { hour: u32, minute: u32 },
    /// `weekly@<0-6>,HH:MM` — weekday 0 = Sunday.
    Weekly { weekday: u32, hour: u32, minute: u32 },
    /// `monthly@<1-31>,HH:MM` — day clamped to the target month's length.
    Monthly { day: u32, hour: u32, minute: u32 },
    /// `every@Nh` — fixed interval in whole hours.
    EveryHours { hours: u32 },
    /// Anything the grammar doesn't cover. Resolves via the fallback policy.
    Unrecognized { raw: String },
}

impl ScheduleSpec {
    /// Parse a descriptor. Never errors — unknown shapes become `Unrecognized`.
    pub fn parse(descriptor: &str) -> Self {
        let unrecognized = || ScheduleSpec::Unrecognized {
            raw: descriptor.to_string(),
        };

        let Some((kind, rest)) = descriptor.split_once('@') else {
            return unrecognized();
        };

        match kind {
            "daily" => match parse_hh_mm(rest) {
                Some((hour, minute)) => ScheduleSpec::Daily { hour, minute },
                None => unrecognized(),
            },
            "weekly" => {
                let Some((day_str, time_str)) = rest.split_once(',') else {
                    return unrecognized();
                };
                let weekday = match day_str.trim().parse::<u32>() {
                    Ok(d) if d <= 6 => d,
                    _ => return unrecognized(),
                };
                match parse_hh_mm(time_str) {
                    Some((hour, minute)) => ScheduleSpec::Weekly { weekday, hour, minute },
                    None => unrecognized(),
                }
            }
            "monthly" => {
                let Some((day_str, time_str)) = rest.split_once(',') else {
                    return unrecognized();
                };
                let day = match day_str.trim().parse::<u32>() {
                    Ok(d) if (1..=31).contains(&d) => d,
                    _ => return unrecognized(),
                };
                match parse_hh_mm(time_str) {
                    Some((hour, minute)) => ScheduleSpec::Monthly { day, hour, minute },
                    None => unrecognized(),
                }
            }
            "every" => {
                let Some(n_str) = rest.strip_suffix('h') else {
                    return unrecognized();
                };
                match n_str.trim().parse::<u32>() {
                    Ok(hours) if hours >= 1 => ScheduleSpec::EveryHours { hours },
                    _ => unrecognized(),
                }
            }
            _ => unrecognized(),
        }
    }

    /// Strict check for automation-save time: rejects descriptors that
    /// would only ever run on the fallback cadence.
    pub fn validate(&self) -> Result<()> {
        match self {
            ScheduleSpec::Unrecognized { raw } => Err(FlowGridError::Validation(format!(
                "unrecognized schedule descriptor: '{raw}'"
            ))),
            _ => Ok(()),
        }
    }

    /// Render back to descriptor form (the storage format).
    pub fn descriptor(&self) -> String {
        match self {
            ScheduleSpec::Daily { hour, minute } => format!("daily@{hour:02}:{minute:02}"),
            ScheduleSpec::Weekly { weekday, hour, minute } => {
                format!("weekly@{weekday},{hour:02}:{minute:02}")
            }
            ScheduleSpec::Monthly { day, hour, minute } => {
                format!("monthly@{day},{hour:02}:{minute:02}")
            }
            ScheduleSpec::EveryHours { hours } => format!("every@{hours}h"),
            ScheduleSpec::Unrecognized { raw } => raw.clone(),
        }
    }
}

/// Parse "HH:MM" with range checks.
fn parse_hh_mm(s: &str) -> Option<(u32, u32)> {
    let (h_str, m_str) = s.trim().split_once(':')?;
    let hour: u32 = h_str.parse().ok()?;
    let minute: u32 = m_str.parse().ok()?;
    if hour <= 23 && minute <= 59 {
        Some((hour, minute))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_daily() {
        assert_eq!(
            ScheduleSpec::parse("daily@09:00"),
            ScheduleSpec::Daily { hour: 9, minute: 0 }
        );
        assert_eq!(
            ScheduleSpec::parse("daily@23:59"),
            ScheduleSpec::Daily { hour: 23, minute: 59 }
        );
    }

    #[test]
    fn test_parse_weekly_and_monthly() {
        assert_eq!(
            ScheduleSpec::parse("weekly@1,08:30"),
            ScheduleSpec::Weekly { weekday: 1, hour: 8, minute: 30 }
        );
        assert_eq!(
            ScheduleSpec::parse("monthly@15,00:00"),
            ScheduleSpec::Monthly { day: 15, hour: 0, minute: 0 }
        );
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(
            ScheduleSpec::parse("every@6h"),
            ScheduleSpec::EveryHours { hours: 6 }
        );
    }

    #[test]
    fn test_out_of_range_is_unrecognized() {
        assert!(matches!(
            ScheduleSpec::parse("daily@24:00"),
            ScheduleSpec::Unrecognized { .. }
        ));
        assert!(matches!(
            ScheduleSpec::parse("weekly@7,09:00"),
            ScheduleSpec::Unrecognized { .. }
        ));
        assert!(matches!(
            ScheduleSpec::parse("monthly@32,09:00"),
            ScheduleSpec::Unrecognized { .. }
        ));
        assert!(matches!(
            ScheduleSpec::parse("every@0h"),
            ScheduleSpec::Unrecognized { .. }
        ));
    }

    #[test]
    fn test_garbage_is_unrecognized_but_validates_closed() {
        let spec = ScheduleSpec::parse("whenever I feel like it");
        assert!(matches!(spec, ScheduleSpec::Unrecognized { .. }));
        assert!(spec.validate().is_err());
        assert!(ScheduleSpec::parse("daily@09:00").validate().is_ok());
    }

    #[test]
    fn test_descriptor_roundtrip() {
        for d in ["daily@09:05", "weekly@0,12:00", "monthly@31,06:45", "every@12h"] {
            assert_eq!(ScheduleSpec::parse(d).descriptor(), d);
        }
    }
}
