use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::TaskResult;
use crate::notify::Notifier;
use crate::projection::{
    self, DEFAULT_BADGE_LIMIT, DEFAULT_TIMELINE_FLOOR_MINUTES, FilterKind, MonthCursor, MonthGrid,
    Progress, TimelineSegment,
};
use crate::scheduler::{NotificationScheduler, ScheduleOutcome};
use crate::storage::KeyValueStore;
use crate::store::{ReminderPolicy, TaskStore};
use crate::task::{Task, TaskDraft, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub reminder_policy: ReminderPolicy,
    pub timeline_floor_minutes: u32,
    pub badge_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reminder_policy: ReminderPolicy::default(),
            timeline_floor_minutes: DEFAULT_TIMELINE_FLOOR_MINUTES,
            badge_limit: DEFAULT_BADGE_LIMIT,
        }
    }
}

/// One session over the task collection.
///
/// Every mutation goes store, then storage, then scheduler, in that order.
/// Dropping the planner flushes nothing because each mutation has already
/// been written.
pub struct Planner {
    store: TaskStore,
    scheduler: NotificationScheduler,
    clock: Rc<dyn Clock>,
    settings: Settings,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("store", &self.store)
            .field("scheduler", &self.scheduler)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Planner {
    /// Loads the collection, asks for notification permission once, and arms
    /// timers for every loaded task that starts in the future.
    #[tracing::instrument(skip_all)]
    pub fn open(
        storage: Box<dyn KeyValueStore>,
        clock: Rc<dyn Clock>,
        notifier: Rc<dyn Notifier>,
        settings: Settings,
    ) -> anyhow::Result<Self> {
        let store = TaskStore::open(storage, settings.reminder_policy)?;
        let scheduler = NotificationScheduler::new(Rc::clone(&clock), notifier);
        scheduler.request_authorization();

        let planner = Self {
            store,
            scheduler,
            clock,
            settings,
        };

        let armed = planner
            .store
            .all()
            .iter()
            .map(|task| planner.scheduler.schedule(task))
            .filter(|outcome| matches!(outcome, ScheduleOutcome::Armed { .. }))
            .count();
        info!(tasks = planner.store.len(), armed, "planner ready");

        Ok(planner)
    }

    pub fn add(&mut self, draft: TaskDraft) -> TaskResult<Task> {
        let task = self.store.add(draft, self.clock.now())?;
        self.scheduler.schedule(&task);
        Ok(task)
    }

    pub fn update(&mut self, id: TaskId, draft: TaskDraft) -> TaskResult<Task> {
        let task = self.store.update(id, draft)?;
        self.scheduler.cancel(id);
        let outcome = self.scheduler.schedule(&task);
        debug!(id = %id, ?outcome, "rescheduled after edit");
        Ok(task)
    }

    pub fn remove(&mut self, id: TaskId) -> TaskResult<Option<Task>> {
        let removed = self.store.remove(id)?;
        self.scheduler.cancel(id);
        Ok(removed)
    }

    pub fn toggle_completed(&mut self, id: TaskId) -> TaskResult<Task> {
        self.store.toggle_completed(id)
    }

    pub fn tasks(&self) -> &[Task] {
        self.store.all()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.store.get(id)
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    pub fn filtered(&self, kind: FilterKind) -> Vec<&Task> {
        projection::filter(self.store.all(), kind, self.today())
    }

    pub fn calendar(&self, cursor: MonthCursor) -> MonthGrid {
        projection::month_grid(cursor, self.store.all(), self.today(), self.settings.badge_limit)
    }

    pub fn timeline(&self, day: NaiveDate) -> Vec<TimelineSegment> {
        projection::daily_timeline(self.store.all(), day, self.settings.timeline_floor_minutes)
    }

    pub fn progress(&self) -> Progress {
        projection::progress_for_today(self.store.all(), self.today())
    }
}
