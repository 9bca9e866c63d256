use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::habit::{Habit, HabitDraft, HabitId, HabitLog};

/// Record store for habits and their completion log. Every call is atomic at
/// record granularity; a failed call leaves the store unchanged.
pub trait HabitStore: Send + Sync {
    fn get(&self, id: HabitId) -> Result<Option<Habit>, StoreError>;
    /// Assigns a fresh id, never reusing one handed out before.
    fn create(&self, draft: HabitDraft, next_due: DateTime<Utc>) -> Result<Habit, StoreError>;
    fn upsert(&self, habit: &Habit) -> Result<HabitId, StoreError>;
    /// Removes the habit and its log entries. Deleting a missing habit is a no-op.
    fn delete(&self, habit: &Habit) -> Result<(), StoreError>;
    fn list(&self) -> Result<Vec<Habit>, StoreError>;
    fn append_log(&self, log: HabitLog) -> Result<(), StoreError>;
    fn logs_between(&self, window: Range<DateTime<Utc>>) -> Result<Vec<HabitLog>, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Snapshot {
    next_id: u64,
    habits: BTreeMap<HabitId, Habit>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            next_id: 1,
            habits: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    fn create(&mut self, draft: HabitDraft, next_due: DateTime<Utc>) -> Habit {
        let id = HabitId(self.next_id);
        self.next_id += 1;
        let habit = draft.into_habit(id, next_due);
        self.habits.insert(id, habit.clone());
        habit
    }

    fn upsert(&mut self, habit: &Habit) -> HabitId {
        self.next_id = self.next_id.max(habit.id.0.saturating_add(1));
        self.habits.insert(habit.id, habit.clone());
        habit.id
    }
}

#[derive(Debug, Default)]
struct StoreState {
    snapshot: Snapshot,
    logs: Vec<HabitLog>,
}

impl StoreState {
    fn list(&self) -> Vec<Habit> {
        self.snapshot.habits.values().cloned().collect()
    }

    fn logs_between(&self, window: &Range<DateTime<Utc>>) -> Vec<HabitLog> {
        self.logs
            .iter()
            .filter(|log| window.contains(&log.timestamp))
            .cloned()
            .collect()
    }
}

/// Volatile store used by tests and as a scratch backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HabitStore for MemoryStore {
    fn get(&self, id: HabitId) -> Result<Option<Habit>, StoreError> {
        Ok(self.state.read().snapshot.habits.get(&id).cloned())
    }

    fn create(&self, draft: HabitDraft, next_due: DateTime<Utc>) -> Result<Habit, StoreError> {
        Ok(self.state.write().snapshot.create(draft, next_due))
    }

    fn upsert(&self, habit: &Habit) -> Result<HabitId, StoreError> {
        Ok(self.state.write().snapshot.upsert(habit))
    }

    fn delete(&self, habit: &Habit) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.snapshot.habits.remove(&habit.id).is_some() {
            state.logs.retain(|log| log.habit_id != habit.id);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<Habit>, StoreError> {
        Ok(self.state.read().list())
    }

    fn append_log(&self, log: HabitLog) -> Result<(), StoreError> {
        self.state.write().logs.push(log);
        Ok(())
    }

    fn logs_between(&self, window: Range<DateTime<Utc>>) -> Result<Vec<HabitLog>, StoreError> {
        Ok(self.state.read().logs_between(&window))
    }
}

/// Habits persisted as a JSON snapshot, completions as an append-only JSON
/// lines file next to it (`habits.json` and `habits.log.jsonl`).
///
/// Snapshot writes go to a sibling temp file that is renamed over the
/// snapshot, and the in-memory copy only changes once the rename succeeded.
/// A completion appends a single line and never rewrites the snapshot.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    log_path: PathBuf,
    state: RwLock<StoreState>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let log_path = path.with_extension("log.jsonl");
        let snapshot = match read_optional(&path)? {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)?,
            _ => Snapshot::default(),
        };
        let store = Self {
            path,
            log_path,
            state: RwLock::new(StoreState {
                snapshot,
                logs: Vec::new(),
            }),
        };
        store.load_log()?;

        {
            let state = store.state.read();
            tracing::debug!(
                path = %store.path.display(),
                habits = state.snapshot.habits.len(),
                logs = state.logs.len(),
                "opened habit store"
            );
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Reads the completion log, keeping entries of known habits. A final line
    /// cut short by a crash is dropped and the file compacted; any other
    /// malformed line fails the open.
    fn load_log(&self) -> Result<(), StoreError> {
        let Some(raw) = read_optional(&self.log_path)? else {
            return Ok(());
        };
        let mut state = self.state.write();
        let lines: Vec<&str> = raw.lines().collect();
        let torn_tail = !raw.ends_with('\n');
        let mut dirty = false;
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HabitLog>(line) {
                Ok(log) if state.snapshot.habits.contains_key(&log.habit_id) => {
                    state.logs.push(log)
                }
                Ok(_) => dirty = true,
                Err(err) if torn_tail && index + 1 == lines.len() => {
                    tracing::warn!(path = %self.log_path.display(), %err, "dropping truncated log entry");
                    dirty = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
        if dirty {
            self.rewrite_log(&state.logs)?;
        }
        Ok(())
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut Snapshot) -> T) -> Result<T, StoreError> {
        let mut guard = self.state.write();
        let mut next = guard.snapshot.clone();
        let value = apply(&mut next);
        self.persist(&next)?;
        guard.snapshot = next;
        Ok(value)
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let payload = serde_json::to_string_pretty(snapshot)?;
        self.replace(&self.path, payload.as_bytes())
    }

    fn rewrite_log(&self, logs: &[HabitLog]) -> Result<(), StoreError> {
        let mut payload = String::new();
        for log in logs {
            payload.push_str(&serde_json::to_string(log)?);
            payload.push('\n');
        }
        self.replace(&self.log_path, payload.as_bytes())
    }

    /// Writes `contents` to a sibling temp file, then renames it over `target`.
    fn replace(&self, target: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let io_error = |source| StoreError::Io {
            path: target.to_path_buf(),
            source,
        };
        ensure_parent(target).map_err(io_error)?;
        let mut staging = target.as_os_str().to_owned();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        fs::write(&staging, contents).map_err(io_error)?;
        fs::rename(&staging, target).map_err(io_error)?;
        Ok(())
    }
}

impl HabitStore for JsonFileStore {
    fn get(&self, id: HabitId) -> Result<Option<Habit>, StoreError> {
        Ok(self.state.read().snapshot.habits.get(&id).cloned())
    }

    fn create(&self, draft: HabitDraft, next_due: DateTime<Utc>) -> Result<Habit, StoreError> {
        self.mutate(|snapshot| snapshot.create(draft, next_due))
    }

    fn upsert(&self, habit: &Habit) -> Result<HabitId, StoreError> {
        self.mutate(|snapshot| snapshot.upsert(habit))
    }

    /// The snapshot is committed first. Should compacting the log fail, the
    /// leftover entries are skipped on the next open since ids are never reused.
    fn delete(&self, habit: &Habit) -> Result<(), StoreError> {
        let removed = self.mutate(|snapshot| snapshot.habits.remove(&habit.id).is_some())?;
        if !removed {
            return Ok(());
        }
        let mut state = self.state.write();
        state.logs.retain(|log| log.habit_id != habit.id);
        if let Err(err) = self.rewrite_log(&state.logs) {
            tracing::warn!(habit = %habit.id, %err, "log entries of deleted habit left on disk");
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<Habit>, StoreError> {
        Ok(self.state.read().list())
    }

    fn append_log(&self, log: HabitLog) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(&log)?;
        line.push('\n');
        let io_error = |source| StoreError::Io {
            path: self.log_path.clone(),
            source,
        };

        let mut state = self.state.write();
        ensure_parent(&self.log_path).map_err(io_error)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(io_error)?;
        file.write_all(line.as_bytes()).map_err(io_error)?;
        state.logs.push(log);
        Ok(())
    }

    fn logs_between(&self, window: Range<DateTime<Utc>>) -> Result<Vec<HabitLog>, StoreError> {
        Ok(self.state.read().logs_between(&window))
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::Frequency;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 3, 9, 0, 0).unwrap()
    }

    #[test]
    fn ids_are_never_reused_after_delete() {
        let store = MemoryStore::new();
        let first = store
            .create(HabitDraft::new("Read", Frequency::Daily), due())
            .unwrap();
        store.delete(&first).unwrap();
        let second = store
            .create(HabitDraft::new("Stretch", Frequency::Daily), due())
            .unwrap();
        assert_ne!(first.id, second.id);
        assert!(store.get(first.id).unwrap().is_none());
    }

    #[test]
    fn upsert_with_explicit_id_advances_the_id_counter() {
        let store = MemoryStore::new();
        let mut habit = HabitDraft::new("Run", Frequency::Weekly).into_habit(HabitId(40), due());
        store.upsert(&habit).unwrap();
        habit.name = "Run 5k".into();
        store.upsert(&habit).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
        let next = store
            .create(HabitDraft::new("Swim", Frequency::Weekly), due())
            .unwrap();
        assert_eq!(next.id, HabitId(41));
    }

    #[test]
    fn delete_cascades_to_logs() {
        let store = MemoryStore::new();
        let habit = store
            .create(HabitDraft::new("Journal", Frequency::Daily), due())
            .unwrap();
        store
            .append_log(HabitLog {
                habit_id: habit.id,
                timestamp: due(),
                value: None,
            })
            .unwrap();
        let window = due() - Duration::hours(1)..due() + Duration::hours(1);
        assert_eq!(store.logs_between(window.clone()).unwrap().len(), 1);
        store.delete(&habit).unwrap();
        assert!(store.logs_between(window).unwrap().is_empty());
    }

    #[test]
    fn json_store_survives_reopen() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("habits.json");

        let created = {
            let store = JsonFileStore::open(&path).expect("open store");
            let habit = store
                .create(
                    HabitDraft::new("Water", Frequency::Daily)
                        .measurable(8, "glasses")
                        .unwrap(),
                    due(),
                )
                .unwrap();
            store
                .append_log(HabitLog {
                    habit_id: habit.id,
                    timestamp: due(),
                    value: Some(8),
                })
                .unwrap();
            habit
        };

        let reopened = JsonFileStore::open(&path).expect("reopen store");
        assert_eq!(reopened.get(created.id).unwrap(), Some(created.clone()));
        let logs = reopened
            .logs_between(due()..due() + Duration::seconds(1))
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].value, Some(8));
        let next = reopened
            .create(HabitDraft::new("Walk", Frequency::Daily), due())
            .unwrap();
        assert!(next.id > created.id);
    }

    #[test]
    fn json_store_rejects_corrupt_snapshot() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("habits.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }

    fn completion(habit_id: HabitId, minutes: i64) -> HabitLog {
        HabitLog {
            habit_id,
            timestamp: due() + Duration::minutes(minutes),
            value: None,
        }
    }

    fn log_lines(store: &JsonFileStore) -> Vec<String> {
        fs::read_to_string(store.log_path())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn completions_append_lines_and_leave_the_snapshot_alone() {
        let temp = tempdir().expect("tempdir");
        let store = JsonFileStore::open(temp.path().join("habits.json")).expect("open store");
        let habit = store
            .create(HabitDraft::new("Read", Frequency::Daily), due())
            .unwrap();
        let snapshot = fs::read(store.path()).unwrap();

        store.append_log(completion(habit.id, 0)).unwrap();
        store.append_log(completion(habit.id, 5)).unwrap();

        assert_eq!(fs::read(store.path()).unwrap(), snapshot);
        assert_eq!(store.log_path(), temp.path().join("habits.log.jsonl"));
        let lines = log_lines(&store);
        assert_eq!(lines.len(), 2);
        let first: HabitLog = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first, completion(habit.id, 0));
    }

    #[test]
    fn deleting_a_habit_drops_its_log_lines() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("habits.json");
        let store = JsonFileStore::open(&path).expect("open store");
        let kept = store
            .create(HabitDraft::new("Kept", Frequency::Daily), due())
            .unwrap();
        let gone = store
            .create(HabitDraft::new("Gone", Frequency::Daily), due())
            .unwrap();
        store.append_log(completion(kept.id, 0)).unwrap();
        store.append_log(completion(gone.id, 1)).unwrap();

        store.delete(&gone).unwrap();

        assert_eq!(log_lines(&store).len(), 1);
        let reopened = JsonFileStore::open(&path).expect("reopen store");
        let logs = reopened
            .logs_between(due()..due() + Duration::hours(1))
            .unwrap();
        assert_eq!(logs, vec![completion(kept.id, 0)]);
    }

    #[test]
    fn truncated_final_log_line_is_dropped_on_open() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("habits.json");
        let habit = {
            let store = JsonFileStore::open(&path).expect("open store");
            let habit = store
                .create(HabitDraft::new("Water", Frequency::Daily), due())
                .unwrap();
            store.append_log(completion(habit.id, 0)).unwrap();
            let mut file = OpenOptions::new()
                .append(true)
                .open(store.log_path())
                .unwrap();
            file.write_all(b"{\"habit_id\":1,\"timest").unwrap();
            habit
        };

        let reopened = JsonFileStore::open(&path).expect("reopen store");
        reopened.append_log(completion(habit.id, 9)).unwrap();

        assert_eq!(log_lines(&reopened).len(), 2);
        let again = JsonFileStore::open(&path).expect("reopen store");
        let logs = again
            .logs_between(due()..due() + Duration::hours(1))
            .unwrap();
        assert_eq!(logs, vec![completion(habit.id, 0), completion(habit.id, 9)]);
    }

    #[test]
    fn malformed_log_line_in_the_middle_fails_open() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("habits.json");
        fs::write(path.with_extension("log.jsonl"), "not json\n").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }
}
