use std::collections::HashSet;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::error::{TaskError, TaskResult, ValidationError};
use crate::storage::{KeyValueStore, load_tasks, save_tasks};
use crate::task::{Task, TaskDraft, TaskId, TaskKind};

/// Whether a reminder may be saved without a start time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReminderPolicy {
    /// Reject reminders that have nothing to fire at.
    #[default]
    RequireStart,
    /// Keep them; the scheduler simply never arms a timer.
    AllowUnscheduled,
}

/// Owns the task collection and writes it back after every mutation.
pub struct TaskStore {
    storage: Box<dyn KeyValueStore>,
    tasks: Vec<Task>,
    policy: ReminderPolicy,
    last_issued: u64,
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("tasks", &self.tasks.len())
            .field("policy", &self.policy)
            .field("last_issued", &self.last_issued)
            .finish_non_exhaustive()
    }
}

impl TaskStore {
    #[tracing::instrument(skip(storage))]
    pub fn open(storage: Box<dyn KeyValueStore>, policy: ReminderPolicy) -> anyhow::Result<Self> {
        let tasks = retain_consistent(load_tasks(storage.as_ref())?);
        let last_issued = tasks.iter().map(|t| t.id.0).max().unwrap_or(0);
        info!(count = tasks.len(), ?policy, "opened task store");
        Ok(Self {
            storage,
            tasks,
            policy,
            last_issued,
        })
    }

    pub fn all(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Ids follow the creation instant in epoch milliseconds, bumped past
    /// anything issued or loaded so they never repeat.
    fn next_id(&self, now: NaiveDateTime) -> TaskResult<TaskId> {
        let stamp = u64::try_from(now.and_utc().timestamp_millis()).unwrap_or(0);
        let floor = self
            .last_issued
            .checked_add(1)
            .ok_or(TaskError::IdsExhausted)?;
        Ok(TaskId(stamp.max(floor)))
    }

    #[tracing::instrument(skip(self, draft, now), fields(kind = %draft.kind))]
    pub fn add(&mut self, draft: TaskDraft, now: NaiveDateTime) -> TaskResult<Task> {
        let draft = validate(draft, self.policy)?;
        let id = self.next_id(now)?;
        let task = Task {
            id,
            text: draft.text,
            kind: draft.kind,
            start_time: draft.start_time,
            end_time: draft.end_time,
            completed: false,
            added_date: now.date(),
        };

        self.tasks.push(task.clone());
        if let Err(err) = self.persist() {
            self.tasks.pop();
            return Err(err);
        }
        self.last_issued = id.0;

        debug!(id = %task.id, count = self.tasks.len(), "task added");
        Ok(task)
    }

    #[tracing::instrument(skip(self, draft), fields(id = %id))]
    pub fn update(&mut self, id: TaskId, draft: TaskDraft) -> TaskResult<Task> {
        let draft = validate(draft, self.policy)?;
        let idx = self.position(id).ok_or(TaskError::NotFound(id))?;

        let previous = self.tasks[idx].clone();
        let task = &mut self.tasks[idx];
        task.text = draft.text;
        task.kind = draft.kind;
        task.start_time = draft.start_time;
        task.end_time = draft.end_time;
        let updated = task.clone();

        if let Err(err) = self.persist() {
            self.tasks[idx] = previous;
            return Err(err);
        }

        debug!("task updated");
        Ok(updated)
    }

    /// Removes a task; an unknown id is a no-op.
    #[tracing::instrument(skip(self), fields(id = %id))]
    pub fn remove(&mut self, id: TaskId) -> TaskResult<Option<Task>> {
        let Some(idx) = self.position(id) else {
            debug!("remove of unknown task ignored");
            return Ok(None);
        };

        let removed = self.tasks.remove(idx);
        if let Err(err) = self.persist() {
            self.tasks.insert(idx, removed);
            return Err(err);
        }

        debug!(count = self.tasks.len(), "task removed");
        Ok(Some(removed))
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    pub fn toggle_completed(&mut self, id: TaskId) -> TaskResult<Task> {
        let idx = self.position(id).ok_or(TaskError::NotFound(id))?;

        self.tasks[idx].completed = !self.tasks[idx].completed;
        if let Err(err) = self.persist() {
            self.tasks[idx].completed = !self.tasks[idx].completed;
            return Err(err);
        }

        let task = self.tasks[idx].clone();
        debug!(completed = task.completed, "task completion toggled");
        Ok(task)
    }

    fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    fn persist(&self) -> TaskResult<()> {
        save_tasks(self.storage.as_ref(), &self.tasks).map_err(|err| {
            warn!(error = %err, "persisting tasks failed; rolling back");
            TaskError::Persist(err)
        })
    }
}

/// Drops loaded records that break the collection invariants: a repeated id
/// (the first occurrence wins) or an end time with no start or before it.
fn retain_consistent(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = HashSet::new();
    tasks
        .into_iter()
        .filter(|task| {
            if !seen.insert(task.id) {
                warn!(id = %task.id, "dropping stored task with a duplicate id");
                return false;
            }
            match (task.start_time, task.end_time) {
                (None, Some(_)) => {
                    warn!(id = %task.id, "dropping stored task with an end but no start");
                    false
                }
                (Some(start), Some(end)) if end < start => {
                    warn!(id = %task.id, "dropping stored task that ends before it starts");
                    false
                }
                _ => true,
            }
        })
        .collect()
}

/// Trims the text and checks the time window and reminder policy.
pub fn validate(mut draft: TaskDraft, policy: ReminderPolicy) -> Result<TaskDraft, ValidationError> {
    let trimmed = draft.text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    draft.text = trimmed.to_string();

    match (draft.start_time, draft.end_time) {
        (None, Some(_)) => return Err(ValidationError::EndWithoutStart),
        (Some(start), Some(end)) if end < start => return Err(ValidationError::EndBeforeStart),
        _ => {}
    }

    if draft.kind == TaskKind::Reminder
        && draft.start_time.is_none()
        && policy == ReminderPolicy::RequireStart
    {
        return Err(ValidationError::ReminderWithoutStart);
    }

    Ok(draft)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;
    use crate::storage::{MemoryStorage, TASKS_KEY};

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .and_then(|day| day.and_hms_opt(h, m, 0))
            .expect("valid timestamp")
    }

    fn open_store(storage: &Rc<MemoryStorage>) -> TaskStore {
        TaskStore::open(Box::new(Rc::clone(storage)), ReminderPolicy::RequireStart)
            .expect("open store")
    }

    #[test]
    fn add_trims_text_and_assigns_defaults() {
        let storage = Rc::new(MemoryStorage::new());
        let mut store = open_store(&storage);

        let task = store
            .add(TaskDraft::new("  Pay rent  ", TaskKind::Task), at(3, 8, 0))
            .expect("add");

        assert_eq!(task.text, "Pay rent");
        assert!(!task.completed);
        assert_eq!(task.added_date, at(3, 8, 0).date());
        assert_eq!(store.len(), 1);
        assert!(storage.raw(TASKS_KEY).is_some());
    }

    #[test]
    fn ids_stay_unique_within_the_same_millisecond_and_after_removal() {
        let storage = Rc::new(MemoryStorage::new());
        let mut store = open_store(&storage);
        let now = at(3, 8, 0);

        let a = store.add(TaskDraft::new("a", TaskKind::Task), now).expect("add a");
        let b = store.add(TaskDraft::new("b", TaskKind::Task), now).expect("add b");
        store.remove(b.id).expect("remove b");
        let c = store.add(TaskDraft::new("c", TaskKind::Task), now).expect("add c");

        assert!(a.id < b.id);
        assert!(b.id < c.id);
    }

    #[test]
    fn rejects_invalid_windows_without_touching_the_collection() {
        let storage = Rc::new(MemoryStorage::new());
        let mut store = open_store(&storage);

        let backwards = TaskDraft::new("Meeting", TaskKind::Task)
            .starting(at(5, 10, 0))
            .ending(at(5, 9, 0));
        let err = store.add(backwards, at(3, 8, 0)).expect_err("end before start");
        assert!(matches!(err, TaskError::Validation(ValidationError::EndBeforeStart)));

        let dangling = TaskDraft::new("Meeting", TaskKind::Task).ending(at(5, 9, 0));
        let err = store.add(dangling, at(3, 8, 0)).expect_err("end without start");
        assert!(matches!(err, TaskError::Validation(ValidationError::EndWithoutStart)));

        let blank = TaskDraft::new("   ", TaskKind::Task);
        let err = store.add(blank, at(3, 8, 0)).expect_err("blank text");
        assert!(matches!(err, TaskError::Validation(ValidationError::EmptyText)));

        assert!(store.is_empty());
        assert!(storage.raw(TASKS_KEY).is_none());
    }

    #[test]
    fn update_rejects_invalid_drafts_without_touching_the_collection() {
        let storage = Rc::new(MemoryStorage::new());
        let mut store = open_store(&storage);
        let task = store
            .add(
                TaskDraft::new("Meeting", TaskKind::Reminder).starting(at(5, 9, 0)),
                at(3, 8, 0),
            )
            .expect("add");
        let blob = storage.raw(TASKS_KEY);

        let cases = [
            (
                TaskDraft::new("Meeting", TaskKind::Task)
                    .starting(at(5, 10, 0))
                    .ending(at(5, 9, 0)),
                ValidationError::EndBeforeStart,
            ),
            (
                TaskDraft::new("Meeting", TaskKind::Task).ending(at(5, 9, 0)),
                ValidationError::EndWithoutStart,
            ),
            (
                TaskDraft::new("Meeting", TaskKind::Reminder),
                ValidationError::ReminderWithoutStart,
            ),
        ];
        for (draft, expected) in cases {
            let err = store.update(task.id, draft).expect_err("invalid update");
            assert!(matches!(err, TaskError::Validation(found) if found == expected));
            assert_eq!(store.all(), std::slice::from_ref(&task));
            assert_eq!(storage.raw(TASKS_KEY), blob);
        }
    }

    #[test]
    fn loaded_records_with_broken_invariants_are_dropped() {
        let raw = r#"[
            {"id":1,"text":"first","type":"task","completed":false,"addedDate":"2024-01-02"},
            {"id":1,"text":"copy","type":"task","completed":false,"addedDate":"2024-01-02"},
            {"id":2,"text":"dangling","type":"task","endTime":"2024-01-05T09:00","completed":false,"addedDate":"2024-01-02"},
            {"id":3,"text":"backwards","type":"task","startTime":"2024-01-05T10:00","endTime":"2024-01-05T09:00","completed":false,"addedDate":"2024-01-02"},
            {"id":4,"text":"fine","type":"task","startTime":"2024-01-05T09:00","endTime":"2024-01-05T09:30","completed":false,"addedDate":"2024-01-02"}
        ]"#;
        let storage = Rc::new(MemoryStorage::with_entry(TASKS_KEY, raw));
        let store = open_store(&storage);

        let kept: Vec<(u64, &str)> = store.all().iter().map(|t| (t.id.0, t.text.as_str())).collect();
        assert_eq!(kept, vec![(1, "first"), (4, "fine")]);
    }

    #[test]
    fn exhausted_id_space_is_an_error() {
        let raw = format!(
            r#"[{{"id":{},"text":"last","type":"task","completed":false,"addedDate":"2024-01-02"}}]"#,
            u64::MAX
        );
        let storage = Rc::new(MemoryStorage::with_entry(TASKS_KEY, &raw));
        let mut store = open_store(&storage);

        let err = store
            .add(TaskDraft::new("one more", TaskKind::Task), at(3, 8, 0))
            .expect_err("no ids left");
        assert!(matches!(err, TaskError::IdsExhausted));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn equal_start_and_end_is_allowed() {
        let storage = Rc::new(MemoryStorage::new());
        let mut store = open_store(&storage);
        let draft = TaskDraft::new("Instant", TaskKind::Task)
            .starting(at(5, 9, 0))
            .ending(at(5, 9, 0));
        assert!(store.add(draft, at(3, 8, 0)).is_ok());
    }

    #[test]
    fn reminder_policy_is_configurable() {
        let draft = TaskDraft::new("Stretch", TaskKind::Reminder);
        assert_eq!(
            validate(draft.clone(), ReminderPolicy::RequireStart),
            Err(ValidationError::ReminderWithoutStart)
        );
        assert!(validate(draft, ReminderPolicy::AllowUnscheduled).is_ok());
    }

    #[test]
    fn update_preserves_completion_and_added_date() {
        let storage = Rc::new(MemoryStorage::new());
        let mut store = open_store(&storage);
        let task = store
            .add(TaskDraft::new("Draft report", TaskKind::Task), at(2, 8, 0))
            .expect("add");
        store.toggle_completed(task.id).expect("toggle");

        let edited = store
            .update(
                task.id,
                TaskDraft::new("Final report", TaskKind::Reminder).starting(at(9, 14, 0)),
            )
            .expect("update");

        assert!(edited.completed);
        assert_eq!(edited.added_date, task.added_date);
        assert_eq!(edited.kind, TaskKind::Reminder);
        assert_eq!(edited.start_time, Some(at(9, 14, 0)));
    }

    #[test]
    fn update_and_toggle_report_unknown_ids() {
        let storage = Rc::new(MemoryStorage::new());
        let mut store = open_store(&storage);
        let missing = TaskId(42);

        assert!(matches!(
            store.update(missing, TaskDraft::new("x", TaskKind::Task)),
            Err(TaskError::NotFound(id)) if id == missing
        ));
        assert!(matches!(store.toggle_completed(missing), Err(TaskError::NotFound(_))));
        assert!(store.remove(missing).expect("remove is a no-op").is_none());
    }

    #[test]
    fn failed_write_rolls_back_the_mutation() {
        let storage = Rc::new(MemoryStorage::new());
        let mut store = open_store(&storage);
        let task = store
            .add(TaskDraft::new("Keep me", TaskKind::Task), at(2, 8, 0))
            .expect("add");

        storage.set_fail_writes(true);
        assert!(matches!(
            store.add(TaskDraft::new("Lost", TaskKind::Task), at(2, 9, 0)),
            Err(TaskError::Persist(_))
        ));
        assert!(store.toggle_completed(task.id).is_err());
        assert!(store.remove(task.id).is_err());
        assert!(matches!(
            store.update(task.id, TaskDraft::new("Renamed", TaskKind::Task).starting(at(4, 9, 0))),
            Err(TaskError::Persist(_))
        ));

        assert_eq!(store.all(), std::slice::from_ref(&task));
    }
}
