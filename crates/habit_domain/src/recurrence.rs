use std::ops::Range;

use chrono::{
    DateTime, Days, Duration, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime,
    NaiveTime, Offset, TimeZone, Utc,
};

use crate::error::{HabitError, Result};
use crate::habit::Frequency;

/// Wall-clock zone used for calendar arithmetic. `Local` resolves the system
/// zone for every instant, so offsets follow daylight-saving changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Local,
    Fixed(FixedOffset),
}

impl TimeZone for Zone {
    type Offset = FixedOffset;

    fn from_offset(offset: &FixedOffset) -> Self {
        Zone::Fixed(*offset)
    }

    fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
        self.offset_from_local_datetime(&local.and_time(NaiveTime::MIN))
    }

    fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
        match self {
            Zone::Local => Local.offset_from_local_datetime(local),
            Zone::Fixed(offset) => LocalResult::Single(*offset),
        }
    }

    fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
        self.offset_from_utc_datetime(&utc.and_time(NaiveTime::MIN))
    }

    fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
        match self {
            Zone::Local => Local.offset_from_utc_datetime(utc),
            Zone::Fixed(offset) => *offset,
        }
    }
}

/// Next-due computation on the user's wall clock. Instants stay immutable
/// `DateTime<Utc>` values; only the local date moves, so the hour and minute
/// of a habit survive every advance, daylight-saving changes included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrencePolicy<Tz = Zone> {
    zone: Tz,
}

impl Default for RecurrencePolicy {
    fn default() -> Self {
        Self::utc()
    }
}

impl RecurrencePolicy {
    pub fn utc() -> Self {
        Self::new(Zone::Fixed(Utc.fix()))
    }

    /// Follows the system time zone.
    pub fn local() -> Self {
        Self::new(Zone::Local)
    }

    pub fn from_offset_minutes(minutes: i32) -> Result<Self> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(|offset| Self::new(Zone::Fixed(offset)))
            .ok_or_else(|| {
                HabitError::InvalidConfiguration(format!("utc offset of {minutes} minutes"))
            })
    }
}

impl<Tz: TimeZone> RecurrencePolicy<Tz> {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> &Tz {
        &self.zone
    }

    /// Next due instant after a completion.
    ///
    /// Moves at least one period past `due_before`, then keeps stepping until
    /// the result is strictly after `now`. A due instant already in the future
    /// therefore moves by exactly one period and is never rewound.
    pub fn advance(
        &self,
        frequency: &Frequency,
        due_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        self.step_past(frequency, due_before, now, 1)
    }

    /// Pulls a due instant that drifted into the past forward to its first
    /// future occurrence. Future instants are returned unchanged, so repeated
    /// calls with the same `now` agree.
    pub fn catch_up_to_future(
        &self,
        frequency: &Frequency,
        due_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        self.step_past(frequency, due_before, now, 0)
    }

    /// First due instant of a new habit: `now`, or the next local occurrence of
    /// `time_of_day` strictly after `now`.
    pub fn anchor(
        &self,
        time_of_day: Option<NaiveTime>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let Some(time) = time_of_day else {
            return Ok(now);
        };
        let local_now = self.wall_clock(now);
        let mut candidate = local_now.date().and_time(time);
        if candidate <= local_now {
            candidate = shift_days(candidate, 1)?;
        }
        self.to_utc(candidate)
    }

    /// Local calendar date of `instant`.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.wall_clock(instant).date()
    }

    /// Half-open window covering the local day that contains `instant`.
    pub fn day_window(&self, instant: DateTime<Utc>) -> Result<Range<DateTime<Utc>>> {
        let start = self.local_date(instant).and_time(NaiveTime::MIN);
        let end = shift_days(start, 1)?;
        Ok(self.to_utc(start)?..self.to_utc(end)?)
    }

    fn step_past(
        &self,
        frequency: &Frequency,
        due_before: DateTime<Utc>,
        now: DateTime<Utc>,
        min_steps: u64,
    ) -> Result<DateTime<Utc>> {
        let step = u64::from(frequency.period_days());
        let now_local = self.wall_clock(now);
        let mut candidate = shift_days(self.wall_clock(due_before), min_steps * step)?;

        if candidate <= now_local {
            // Skip whole periods in one move; the loop below settles the last one.
            let behind = (now_local.date() - candidate.date()).num_days().max(0) as u64;
            let periods = behind / step;
            if periods > 0 {
                candidate = shift_days(candidate, periods * step)?;
            }
        }
        let mut next = self.to_utc(candidate)?;
        while next <= now {
            candidate = shift_days(candidate, step)?;
            next = self.to_utc(candidate)?;
        }

        tracing::trace!(%frequency, %due_before, %now, %next, "advanced due instant");
        Ok(next)
    }

    fn wall_clock(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.zone).naive_local()
    }

    /// Repeated local times resolve to the earlier instant. Times skipped by a
    /// forward transition keep the offset in force before the gap, landing
    /// just after it.
    fn to_utc(&self, local: NaiveDateTime) -> Result<DateTime<Utc>> {
        let out_of_range = || HabitError::OutOfRange(local.to_string());
        if let Some(resolved) = self.zone.from_local_datetime(&local).earliest() {
            return Ok(resolved.with_timezone(&Utc));
        }
        let before_gap = local
            .checked_sub_signed(Duration::days(1))
            .ok_or_else(out_of_range)?;
        let offset = self
            .zone
            .offset_from_utc_datetime(&before_gap)
            .fix()
            .local_minus_utc();
        local
            .checked_sub_signed(Duration::seconds(i64::from(offset)))
            .map(|utc| Utc.from_utc_datetime(&utc))
            .ok_or_else(out_of_range)
    }
}

fn shift_days(value: NaiveDateTime, days: u64) -> Result<NaiveDateTime> {
    value
        .checked_add_days(Days::new(days))
        .ok_or_else(|| HabitError::OutOfRange(value.to_string()))
}
