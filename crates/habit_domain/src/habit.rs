use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HabitError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct HabitId(pub u64);

impl fmt::Display for HabitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct TodoId(pub u64);

impl fmt::Display for TodoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "todo#{}", self.0)
    }
}

/// How often a habit comes due.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Custom { interval_days: NonZeroU32 },
}

impl Frequency {
    /// Builds a custom N-day frequency, rejecting non-positive intervals.
    pub fn custom(interval_days: i64) -> Result<Self> {
        let days = u32::try_from(interval_days)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| {
                HabitError::InvalidConfiguration(format!(
                    "custom interval must be at least one day, got {interval_days}"
                ))
            })?;
        Ok(Frequency::Custom {
            interval_days: days,
        })
    }

    /// Length of one recurrence period in days.
    pub fn period_days(&self) -> u32 {
        match self {
            Frequency::Daily => 1,
            Frequency::Weekly => 7,
            Frequency::Custom { interval_days } => interval_days.get(),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Custom { interval_days } => write!(f, "every {} days", interval_days),
        }
    }
}

/// Accepts `daily`, `weekly`, or a repeater token such as `3d`, `+3d` or `+2w`.
impl FromStr for Frequency {
    type Err = HabitError;

    fn from_str(token: &str) -> Result<Self> {
        let normalized = token.trim().trim_start_matches('+');
        match normalized.to_ascii_lowercase().as_str() {
            "daily" | "day" => return Ok(Frequency::Daily),
            "weekly" | "week" => return Ok(Frequency::Weekly),
            _ => {}
        }
        let invalid = || HabitError::InvalidConfiguration(format!("unknown frequency `{token}`"));
        let unit = normalized.chars().last().ok_or_else(invalid)?;
        let quantity: i64 = normalized[..normalized.len() - unit.len_utf8()]
            .parse()
            .map_err(|_| invalid())?;
        match unit {
            'd' | 'D' if quantity == 1 => Ok(Frequency::Daily),
            'd' | 'D' => Frequency::custom(quantity),
            'w' | 'W' if quantity == 1 => Ok(Frequency::Weekly),
            'w' | 'W' => Frequency::custom(quantity.saturating_mul(7)),
            _ => Err(invalid()),
        }
    }
}

/// Progress toward a numeric target within the current period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "MeasureRecord", into = "MeasureRecord")]
pub struct Measure {
    target: u32,
    unit: String,
    progress: u32,
}

#[derive(Serialize, Deserialize)]
struct MeasureRecord {
    target: u32,
    unit: String,
    #[serde(default)]
    progress: u32,
}

impl TryFrom<MeasureRecord> for Measure {
    type Error = HabitError;

    fn try_from(record: MeasureRecord) -> Result<Self> {
        Measure::new(record.target, record.unit)?.with_progress(record.progress)
    }
}

impl From<Measure> for MeasureRecord {
    fn from(measure: Measure) -> Self {
        Self {
            target: measure.target,
            unit: measure.unit,
            progress: measure.progress,
        }
    }
}

impl Measure {
    pub fn new(target: u32, unit: impl Into<String>) -> Result<Self> {
        if target == 0 {
            return Err(HabitError::InvalidConfiguration(
                "measurable target must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            target,
            unit: unit.into(),
            progress: 0,
        })
    }

    pub fn with_progress(mut self, progress: u32) -> Result<Self> {
        if progress > self.target {
            return Err(HabitError::InvalidConfiguration(format!(
                "progress {progress} exceeds target {}",
                self.target
            )));
        }
        self.progress = progress;
        Ok(self)
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn progress(&self) -> u32 {
        self.progress
    }

    pub fn is_complete(&self) -> bool {
        self.progress == self.target
    }

    /// `progress + delta` clamped to `[0, target]`.
    pub fn clamped(&self, delta: i64) -> u32 {
        let next = i64::from(self.progress)
            .saturating_add(delta)
            .clamp(0, i64::from(self.target));
        next as u32
    }

    pub(crate) fn set_progress(&mut self, progress: u32) {
        self.progress = progress.min(self.target);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HabitType {
    Binary,
    Measurable(Measure),
}

impl HabitType {
    pub fn measurable(target: u32, unit: impl Into<String>) -> Result<Self> {
        Ok(HabitType::Measurable(Measure::new(target, unit)?))
    }
}

/// Life area a habit belongs to; only used for grouping.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LifeDomain {
    Intellect,
    Vitality,
    Spirit,
    Charisma,
    Flow,
    Order,
    #[default]
    Void,
}

impl FromStr for LifeDomain {
    type Err = HabitError;

    fn from_str(value: &str) -> Result<Self> {
        let domain = match value.trim().to_ascii_lowercase().as_str() {
            "intellect" => LifeDomain::Intellect,
            "vitality" => LifeDomain::Vitality,
            "spirit" => LifeDomain::Spirit,
            "charisma" => LifeDomain::Charisma,
            "flow" => LifeDomain::Flow,
            "order" => LifeDomain::Order,
            "void" => LifeDomain::Void,
            _ => {
                return Err(HabitError::InvalidConfiguration(format!(
                    "unknown domain `{value}`"
                )))
            }
        };
        Ok(domain)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Habit {
    pub id: HabitId,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub frequency: Frequency,
    pub habit_type: HabitType,
    #[serde(default)]
    pub domain: LifeDomain,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub next_due: DateTime<Utc>,
}

impl Habit {
    pub fn measure(&self) -> Option<&Measure> {
        match &self.habit_type {
            HabitType::Measurable(measure) => Some(measure),
            HabitType::Binary => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.habit_type, HabitType::Binary)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.next_due <= now
    }
}

/// Validated input for creating a habit. The store assigns the id and the
/// recurrence policy anchors the first due instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HabitDraft {
    pub name: String,
    pub description: Option<String>,
    pub frequency: Frequency,
    pub habit_type: HabitType,
    pub domain: LifeDomain,
    pub reminder_time: Option<NaiveTime>,
}

impl HabitDraft {
    pub fn new(name: impl Into<String>, frequency: Frequency) -> Self {
        Self {
            name: name.into(),
            description: None,
            frequency,
            habit_type: HabitType::Binary,
            domain: LifeDomain::default(),
            reminder_time: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = (!description.trim().is_empty()).then_some(description);
        self
    }

    pub fn measurable(mut self, target: u32, unit: impl Into<String>) -> Result<Self> {
        self.habit_type = HabitType::measurable(target, unit)?;
        Ok(self)
    }

    pub fn in_domain(mut self, domain: LifeDomain) -> Self {
        self.domain = domain;
        self
    }

    pub fn at_time(mut self, time: NaiveTime) -> Self {
        self.reminder_time = Some(time);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HabitError::InvalidConfiguration(
                "habit name must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_habit(self, id: HabitId, next_due: DateTime<Utc>) -> Habit {
        Habit {
            id,
            name: self.name.trim().to_string(),
            description: self.description,
            active: true,
            frequency: self.frequency,
            habit_type: self.habit_type,
            domain: self.domain,
            next_due,
        }
    }
}

/// One completion event. Append-only and never consulted by recurrence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HabitLog {
    pub habit_id: HabitId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub value: Option<u32>,
}

/// The part of a todo the reminder layer needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoReminder {
    pub id: TodoId,
    pub title: String,
    pub description: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub due: DateTime<Utc>,
}
