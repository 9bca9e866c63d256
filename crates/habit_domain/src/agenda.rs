use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::Range;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::habit::{Frequency, Habit, HabitId, HabitLog};
use crate::recurrence::RecurrencePolicy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AgendaGroup {
    /// Daily and custom-interval habits.
    Today,
    /// Weekly habits, listed after the daily ones.
    ThisWeek,
}

impl AgendaGroup {
    fn of(frequency: &Frequency) -> Self {
        match frequency {
            Frequency::Weekly => Self::ThisWeek,
            Frequency::Daily | Frequency::Custom { .. } => Self::Today,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaEntry {
    pub habit: Habit,
    pub group: AgendaGroup,
    pub overdue: bool,
}

impl AgendaEntry {
    fn new(habit: &Habit, now: DateTime<Utc>) -> Self {
        Self {
            group: AgendaGroup::of(&habit.frequency),
            overdue: habit.is_overdue(now),
            habit: habit.clone(),
        }
    }
}

impl PartialEq for AgendaEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AgendaEntry {}

impl PartialOrd for AgendaEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AgendaEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.group
            .cmp(&other.group)
            .then_with(|| self.habit.next_due.cmp(&other.habit.next_due))
            .then_with(|| self.habit.name.cmp(&other.habit.name))
            .then_with(|| self.habit.id.cmp(&other.habit.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedEntry {
    pub habit: Habit,
    pub last_logged: DateTime<Utc>,
    pub times: usize,
}

/// Active habits whose due instant falls within one recurrence period of `now`,
/// overdue ones included.
pub fn due_within_period(habits: &[Habit], now: DateTime<Utc>) -> Vec<AgendaEntry> {
    let mut entries: Vec<_> = habits
        .iter()
        .filter(|habit| habit.active)
        .filter(|habit| {
            let period = Duration::days(i64::from(habit.frequency.period_days()));
            now.checked_add_signed(period)
                .map_or(true, |horizon| habit.next_due <= horizon)
        })
        .map(|habit| AgendaEntry::new(habit, now))
        .collect();
    entries.sort();
    entries
}

/// Active habits due during the local day that contains `now`.
pub fn due_today(
    habits: &[Habit],
    policy: &RecurrencePolicy,
    now: DateTime<Utc>,
) -> Result<Vec<AgendaEntry>> {
    let today = policy.day_window(now)?;
    let mut entries: Vec<_> = habits
        .iter()
        .filter(|habit| habit.active && today.contains(&habit.next_due))
        .map(|habit| AgendaEntry::new(habit, now))
        .collect();
    entries.sort();
    Ok(entries)
}

/// The next `limit` active habits by due instant.
pub fn upcoming(habits: &[Habit], now: DateTime<Utc>, limit: usize) -> Vec<AgendaEntry> {
    let mut active: Vec<_> = habits.iter().filter(|habit| habit.active).collect();
    active.sort_by(|a, b| a.next_due.cmp(&b.next_due).then_with(|| a.id.cmp(&b.id)));
    active
        .into_iter()
        .take(limit)
        .map(|habit| AgendaEntry::new(habit, now))
        .collect()
}

/// Habits with at least one log inside `window`, most recently logged first.
/// Logs of habits missing from `habits` are ignored.
pub fn completed_within(
    habits: &[Habit],
    logs: &[HabitLog],
    window: &Range<DateTime<Utc>>,
) -> Vec<CompletedEntry> {
    let mut seen: HashMap<HabitId, (DateTime<Utc>, usize)> = HashMap::new();
    for log in logs.iter().filter(|log| window.contains(&log.timestamp)) {
        let slot = seen.entry(log.habit_id).or_insert((log.timestamp, 0));
        slot.0 = slot.0.max(log.timestamp);
        slot.1 += 1;
    }

    let mut entries: Vec<_> = habits
        .iter()
        .filter_map(|habit| {
            seen.get(&habit.id).map(|&(last_logged, times)| CompletedEntry {
                habit: habit.clone(),
                last_logged,
                times,
            })
        })
        .collect();
    entries.sort_by(|a, b| {
        b.last_logged
            .cmp(&a.last_logged)
            .then_with(|| a.habit.id.cmp(&b.habit.id))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::HabitDraft;
    use chrono::TimeZone;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, d, h, 0, 0).unwrap()
    }

    fn habit(id: u64, name: &str, frequency: Frequency, due: DateTime<Utc>) -> Habit {
        HabitDraft::new(name, frequency).into_habit(HabitId(id), due)
    }

    fn names(entries: &[AgendaEntry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.habit.name.as_str()).collect()
    }

    #[test]
    fn due_within_period_uses_each_habits_interval() {
        let now = at(10, 12);
        let mut paused = habit(5, "Paused", Frequency::Daily, at(10, 9));
        paused.active = false;
        let habits = vec![
            habit(1, "Tomorrow", Frequency::Daily, at(11, 9)),
            habit(2, "Too far", Frequency::Daily, at(12, 9)),
            habit(3, "Next week", Frequency::Weekly, at(16, 9)),
            habit(4, "Late", Frequency::custom(3).unwrap(), at(8, 9)),
            paused,
        ];

        let entries = due_within_period(&habits, now);

        assert_eq!(names(&entries), vec!["Late", "Tomorrow", "Next week"]);
        assert!(entries[0].overdue);
        assert_eq!(entries[2].group, AgendaGroup::ThisWeek);
    }

    #[test]
    fn due_today_follows_the_local_day() {
        // 22:00 UTC on the 10th is already the 11th at UTC+3.
        let policy = RecurrencePolicy::from_offset_minutes(180).unwrap();
        let habits = vec![
            habit(1, "Late evening", Frequency::Daily, at(10, 22)),
            habit(2, "Morning", Frequency::Daily, at(11, 6)),
            habit(3, "Yesterday", Frequency::Daily, at(10, 20)),
        ];

        let entries = due_today(&habits, &policy, at(11, 5)).unwrap();

        assert_eq!(names(&entries), vec!["Late evening", "Morning"]);
    }

    #[test]
    fn upcoming_is_capped_and_skips_paused_habits() {
        let mut paused = habit(1, "Paused", Frequency::Daily, at(1, 1));
        paused.active = false;
        let habits = vec![
            paused,
            habit(2, "Third", Frequency::Weekly, at(12, 9)),
            habit(3, "First", Frequency::Daily, at(10, 9)),
            habit(4, "Second", Frequency::Daily, at(11, 9)),
        ];

        let entries = upcoming(&habits, at(10, 0), 2);

        assert_eq!(names(&entries), vec!["First", "Second"]);
    }

    #[test]
    fn completed_habits_are_ordered_by_latest_log() {
        let habits = vec![
            habit(1, "Read", Frequency::Daily, at(11, 9)),
            habit(2, "Run", Frequency::Daily, at(11, 9)),
            habit(3, "Idle", Frequency::Daily, at(11, 9)),
        ];
        let log = |id, timestamp| HabitLog {
            habit_id: HabitId(id),
            timestamp,
            value: None,
        };
        let logs = vec![
            log(1, at(10, 8)),
            log(2, at(10, 9)),
            log(1, at(10, 20)),
            log(3, at(9, 23)),
            log(99, at(10, 10)),
        ];

        let entries = completed_within(&habits, &logs, &(at(10, 0)..at(11, 0)));

        let ids: Vec<_> = entries.iter().map(|entry| entry.habit.id).collect();
        assert_eq!(ids, vec![HabitId(1), HabitId(2)]);
        assert_eq!(entries[0].times, 2);
        assert_eq!(entries[0].last_logged, at(10, 20));
    }
}
