use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use habit_domain::clock::ManualClock;
use habit_domain::habit::{Frequency, HabitDraft, HabitType, LifeDomain};
use habit_domain::notifications::{AlarmEvent, RecordingSink, ReminderTarget, ScheduleState};
use habit_domain::recurrence::RecurrencePolicy;
use habit_domain::store::{HabitStore, JsonFileStore};
use habit_domain::{HabitError, HabitService};
use tempfile::tempdir;

fn at(d: u32, h: u32) -> DateTime<Utc> {
    // June 2025; the 2nd is a Monday.
    Utc.with_ymd_and_hms(2025, 6, d, h, 0, 0).unwrap()
}

fn open(path: &std::path::Path, clock: Arc<ManualClock>, sink: Arc<RecordingSink>) -> HabitService {
    let store = JsonFileStore::open(path).expect("open store");
    HabitService::builder()
        .with_store(Arc::new(store))
        .with_alarm_sink(sink)
        .with_clock(clock)
        .with_policy(RecurrencePolicy::utc())
        .build()
        .expect("build service")
}

#[test]
fn habits_survive_restart_and_catch_up() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("habits.json");
    let clock = Arc::new(ManualClock::new(at(2, 7)));
    let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

    let (stretch, water) = {
        let sink = Arc::new(RecordingSink::new());
        let service = open(&path, clock.clone(), sink.clone());
        service.start().unwrap();

        let stretch = service
            .create_habit(
                HabitDraft::new("Stretch", Frequency::Daily)
                    .in_domain(LifeDomain::Vitality)
                    .at_time(nine),
            )
            .unwrap()
            .habit;
        let water = service
            .create_habit(
                HabitDraft::new("Water", "3d".parse().unwrap())
                    .measurable(8, "glasses")
                    .unwrap()
                    .at_time(nine),
            )
            .unwrap()
            .habit;
        assert_eq!(stretch.next_due, at(2, 9));

        clock.set(at(2, 10));
        let done = service.complete_binary(stretch.id).unwrap();
        assert_eq!(done.habit.next_due, at(3, 9));
        service.increment_progress(water.id, 3).unwrap();
        assert_eq!(service.completed_today().unwrap().len(), 1);
        (stretch, water)
    };

    // Five days later the process starts again with no alarms armed.
    clock.set(at(7, 12));
    let sink = Arc::new(RecordingSink::new());
    let service = open(&path, clock.clone(), sink.clone());
    let report = service.start().unwrap().expect("fresh process");

    assert_eq!(report.catch_up.advanced.len(), 2);
    let stretch = service.habit(stretch.id).unwrap();
    let water = service.habit(water.id).unwrap();
    assert_eq!(stretch.next_due, at(8, 9));
    assert_eq!(water.next_due, at(8, 9));
    assert_eq!(stretch.domain, LifeDomain::Vitality);
    match &water.habit_type {
        HabitType::Measurable(measure) => assert_eq!(measure.progress(), 0),
        HabitType::Binary => panic!("water should stay measurable"),
    }
    assert_eq!(sink.armed().len(), 2);
    assert!(matches!(
        service.reminder(stretch.id),
        ScheduleState::Scheduled(_)
    ));
}

#[test]
fn measurable_completion_logs_and_persists() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("habits.json");
    let clock = Arc::new(ManualClock::new(at(3, 8)));
    let sink = Arc::new(RecordingSink::new());
    let service = open(&path, clock.clone(), sink.clone());

    let pages = service
        .create_habit(
            HabitDraft::new("Pages", Frequency::Weekly)
                .measurable(5, "pages")
                .unwrap(),
        )
        .unwrap()
        .habit;
    service.increment_progress(pages.id, 4).unwrap();
    clock.advance(Duration::minutes(30));
    sink.clear_events();

    let outcome = service.increment_progress(pages.id, 1).unwrap();

    assert!(outcome.completed);
    assert_eq!(outcome.habit.next_due, at(10, 8));
    let request_id = ReminderTarget::Habit(pages.id).request_id().unwrap();
    assert_eq!(sink.events()[0], AlarmEvent::Disarmed(request_id));
    assert_eq!(sink.armed_for(request_id).unwrap().fire_at, at(10, 8));

    let completed = service.completed_today().unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].last_logged, at(3, 8) + Duration::minutes(30));

    let snapshot = fs::read_to_string(&path).unwrap();
    assert!(snapshot.contains("\"Pages\""));
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn deleted_habits_are_gone_after_reopen() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("habits.json");
    let clock = Arc::new(ManualClock::new(at(4, 8)));

    let id = {
        let sink = Arc::new(RecordingSink::new());
        let service = open(&path, clock.clone(), sink.clone());
        let habit = service
            .create_habit(HabitDraft::new("Journal", Frequency::Daily))
            .unwrap()
            .habit;
        service.complete_binary(habit.id).unwrap();
        service.delete_habit(habit.id).unwrap();
        assert!(sink.armed().is_empty());
        habit.id
    };

    let service = open(&path, clock, Arc::new(RecordingSink::new()));
    assert!(matches!(service.habit(id), Err(HabitError::NotFound(_))));
    assert!(service.completed_today().unwrap().is_empty());
    let next = service
        .create_habit(HabitDraft::new("Journal again", Frequency::Daily))
        .unwrap()
        .habit;
    assert!(next.id > id);
}
