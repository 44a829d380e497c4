//! Reset scheduling for completed tasks.
//!
//! Timers are never persisted. On start-up [`ResetScheduler::rearm_all`]
//! re-derives them from each task's `completedAt` and policy; interval resets
//! that fell due while nothing was running are applied on the spot.
//!
//! A timer carries the `completedAt` it was armed for. When it fires, the task
//! is re-read and the reset only happens if the task is still completed with
//! that same timestamp; otherwise the timer is stale and does nothing. This is
//! the only form of cancellation.

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use log::{debug, info, warn};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use crate::database::KeyValueStore;
use crate::models::{ResetPolicy, Task};
use crate::store::{StateStore, StoreError};

/// What should happen to a task right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPlan {
    /// Nothing to schedule: pending task, or a one-time interval task.
    Idle,
    /// Reset was due at or before `now`; apply immediately.
    Overdue,
    /// Reset falls due at `due`.
    Arm { due: DateTime<Utc> },
}

/// Result of a fired (or caught-up) timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    Reset { category_id: String, task_id: String },
    Removed { category_id: String, task_id: String },
    Stale { category_id: String, task_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingReset {
    due: DateTime<Utc>,
    seq: u64,
    category_id: String,
    task_id: String,
    armed_for: DateTime<Utc>,
}

impl Ord for PendingReset {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for PendingReset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type TimerKey = (String, String, DateTime<Utc>);

pub struct ResetScheduler<Tz: TimeZone = Local> {
    tz: Tz,
    timers: BinaryHeap<Reverse<PendingReset>>,
    armed: HashSet<TimerKey>,
    seq: u64,
}

impl ResetScheduler<Local> {
    /// Scheduler evaluating time-of-day policies in the system's local zone.
    pub fn new() -> Self {
        Self::with_timezone(Local)
    }
}

impl Default for ResetScheduler<Local> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tz: TimeZone> ResetScheduler<Tz> {
    pub fn with_timezone(tz: Tz) -> Self {
        Self {
            tz,
            timers: BinaryHeap::new(),
            armed: HashSet::new(),
            seq: 0,
        }
    }

    pub fn compute_next_reset(&self, task: &Task, now: DateTime<Utc>) -> ResetPlan {
        compute_next_reset(task, now, &self.tz)
    }

    /// Evaluate one task: catch up an overdue reset or arm a timer for it.
    pub fn schedule<S: KeyValueStore>(
        &mut self,
        store: &mut StateStore<S>,
        category_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ResetPlan, StoreError> {
        self.evaluate(store, category_id, task_id, now)
            .map(|(plan, _)| plan)
    }

    /// Schedule every completed task, returning the catch-up resets applied.
    /// Calling it again neither duplicates timers nor re-applies a reset.
    pub fn rearm_all<S: KeyValueStore>(
        &mut self,
        store: &mut StateStore<S>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResetOutcome>, StoreError> {
        let mut caught_up = Vec::new();
        for (category_id, task_id) in store.completed_tasks() {
            if let (_, Some(outcome)) = self.evaluate(store, &category_id, &task_id, now)? {
                caught_up.push(outcome);
            }
        }
        Ok(caught_up)
    }

    /// Fire every timer due at or before `now`, earliest first.
    pub fn fire_due<S: KeyValueStore>(
        &mut self,
        store: &mut StateStore<S>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResetOutcome>, StoreError> {
        let mut outcomes = Vec::new();
        while self.timers.peek().is_some_and(|Reverse(next)| next.due <= now) {
            let Some(Reverse(timer)) = self.timers.pop() else {
                break;
            };
            self.armed.remove(&(
                timer.category_id.clone(),
                timer.task_id.clone(),
                timer.armed_for,
            ));
            outcomes.push(self.apply(
                store,
                &timer.category_id,
                &timer.task_id,
                timer.armed_for,
                now,
            )?);
        }
        Ok(outcomes)
    }

    /// One pass of the watch loop: pick up external edits, fire, re-arm.
    pub fn tick<S: KeyValueStore>(
        &mut self,
        store: &mut StateStore<S>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResetOutcome>, StoreError> {
        store.reload()?;
        let mut outcomes = self.fire_due(store, now)?;
        outcomes.extend(self.rearm_all(store, now)?);
        Ok(outcomes)
    }

    /// Block, ticking until `on_tick` returns `false`.
    ///
    /// Sleeps until the next armed timer or for `tick`, whichever is sooner.
    /// A failed write is logged and retried on the next tick; other errors end the loop.
    pub fn run<S, F>(
        &mut self,
        store: &mut StateStore<S>,
        tick: std::time::Duration,
        mut on_tick: F,
    ) -> Result<(), StoreError>
    where
        S: KeyValueStore,
        F: FnMut(&[ResetOutcome]) -> bool,
    {
        loop {
            let outcomes = match self.tick(store, Utc::now()) {
                Ok(outcomes) => outcomes,
                Err(StoreError::Persistence(e)) => {
                    warn!("event=tick_failed module=scheduler error={}", e);
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
            if !on_tick(&outcomes) {
                return Ok(());
            }
            let sleep = self
                .time_until_next(Utc::now())
                .map_or(tick, |until| until.min(tick));
            std::thread::sleep(sleep);
        }
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.timers.peek().map(|Reverse(timer)| timer.due)
    }

    pub fn time_until_next(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.next_due()
            .map(|due| (due - now).to_std().unwrap_or(std::time::Duration::ZERO))
    }

    /// Number of armed timers, stale ones included.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    fn evaluate<S: KeyValueStore>(
        &mut self,
        store: &mut StateStore<S>,
        category_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(ResetPlan, Option<ResetOutcome>), StoreError> {
        let Some(task) = store.task(category_id, task_id) else {
            return Ok((ResetPlan::Idle, None));
        };
        let plan = self.compute_next_reset(task, now);
        let Some(armed_for) = task.completed_at else {
            return Ok((ResetPlan::Idle, None));
        };

        match plan {
            ResetPlan::Idle => Ok((plan, None)),
            ResetPlan::Overdue => {
                info!(
                    "event=reset_overdue module=scheduler category_id={} task_id={}",
                    category_id, task_id
                );
                let outcome = self.apply(store, category_id, task_id, armed_for, now)?;
                Ok((plan, Some(outcome)))
            }
            ResetPlan::Arm { due } => {
                self.arm(category_id, task_id, armed_for, due);
                Ok((plan, None))
            }
        }
    }

    fn arm(&mut self, category_id: &str, task_id: &str, armed_for: DateTime<Utc>, due: DateTime<Utc>) {
        let key = (category_id.to_string(), task_id.to_string(), armed_for);
        if !self.armed.insert(key) {
            return;
        }
        self.seq += 1;
        self.timers.push(Reverse(PendingReset {
            due,
            seq: self.seq,
            category_id: category_id.to_string(),
            task_id: task_id.to_string(),
            armed_for,
        }));
        info!(
            "event=reset_armed module=scheduler category_id={} task_id={} due={}",
            category_id,
            task_id,
            due.to_rfc3339()
        );
    }

    /// Reset or remove the task, unless it changed since the timer was armed.
    fn apply<S: KeyValueStore>(
        &mut self,
        store: &mut StateStore<S>,
        category_id: &str,
        task_id: &str,
        armed_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ResetOutcome, StoreError> {
        let removes = match store.task(category_id, task_id) {
            Some(task) if task.completed && task.completed_at == Some(armed_for) => {
                task.is_removed_on_reset()
            }
            _ => {
                debug!(
                    "event=reset_stale module=scheduler category_id={} task_id={}",
                    category_id, task_id
                );
                return Ok(ResetOutcome::Stale {
                    category_id: category_id.to_string(),
                    task_id: task_id.to_string(),
                });
            }
        };

        if removes {
            store.delete_task(category_id, task_id)?;
            info!(
                "event=task_removed module=scheduler category_id={} task_id={}",
                category_id, task_id
            );
            Ok(ResetOutcome::Removed {
                category_id: category_id.to_string(),
                task_id: task_id.to_string(),
            })
        } else {
            store.set_completed(category_id, task_id, false, now)?;
            info!(
                "event=reset_applied module=scheduler category_id={} task_id={}",
                category_id, task_id
            );
            Ok(ResetOutcome::Reset {
                category_id: category_id.to_string(),
                task_id: task_id.to_string(),
            })
        }
    }
}

/// Decide what to do with `task` at `now`, evaluating time-of-day policies in `tz`.
pub fn compute_next_reset<Tz: TimeZone>(task: &Task, now: DateTime<Utc>, tz: &Tz) -> ResetPlan {
    let Some(completed_at) = task.completed_at.filter(|_| task.completed) else {
        return ResetPlan::Idle;
    };

    match task.reset_policy {
        ResetPolicy::Interval { .. } if task.one_time => ResetPlan::Idle,
        ResetPolicy::Interval { duration_ms } => {
            let due = i64::try_from(duration_ms)
                .ok()
                .and_then(Duration::try_milliseconds)
                .and_then(|d| completed_at.checked_add_signed(d));
            match due {
                Some(due) if due <= now => ResetPlan::Overdue,
                Some(due) => ResetPlan::Arm { due },
                None => {
                    warn!(
                        "event=reset_unrepresentable module=scheduler task_id={} duration_ms={}",
                        task.id, duration_ms
                    );
                    ResetPlan::Idle
                }
            }
        }
        ResetPolicy::TimeOfDay { hour, minute } => {
            match next_time_of_day(tz, hour, minute, completed_at, now) {
                Some(due) => ResetPlan::Arm { due },
                None => {
                    warn!(
                        "event=reset_unrepresentable module=scheduler task_id={} hour={} minute={}",
                        task.id, hour, minute
                    );
                    ResetPlan::Idle
                }
            }
        }
    }
}

/// First `hour:minute` wall-clock instant in `tz` that is strictly after both
/// `completed_at` and `now`.
pub fn next_time_of_day<Tz: TimeZone>(
    tz: &Tz,
    hour: u32,
    minute: u32,
    completed_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let mut day = completed_at.with_timezone(tz).date_naive();
    let mut next = resolve_local(tz, day.and_time(time))?;
    while next <= completed_at {
        day = day.succ_opt()?;
        next = resolve_local(tz, day.and_time(time))?;
    }

    if next <= now {
        // skip whole days of downtime in one step
        day = day.max(now.with_timezone(tz).date_naive());
        next = resolve_local(tz, day.and_time(time))?;
        while next <= now {
            day = day.succ_opt()?;
            next = resolve_local(tz, day.and_time(time))?;
        }
    }
    Some(next)
}

/// Map a local wall-clock time to an instant. Ambiguous times take the earlier
/// instant; times inside a DST gap move to the first minute after the gap.
fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    let mut candidate = local;
    for _ in 0..=24 * 60 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest.with_timezone(&Utc)),
            LocalResult::None => candidate = candidate.checked_add_signed(Duration::minutes(1))?,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate};

    /// Central European rules for 2025: UTC+1, UTC+2 from 30 March 01:00 UTC
    /// until 26 October 01:00 UTC.
    #[derive(Debug, Clone, Copy)]
    struct CentralEurope;

    fn summer_start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 30).unwrap().and_hms_opt(1, 0, 0).unwrap()
    }

    fn summer_end() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 26).unwrap().and_hms_opt(1, 0, 0).unwrap()
    }

    fn hours_east(h: i32) -> FixedOffset {
        FixedOffset::east_opt(h * 3600).unwrap()
    }

    impl TimeZone for CentralEurope {
        type Offset = FixedOffset;

        fn from_offset(_: &FixedOffset) -> Self {
            CentralEurope
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
            self.offset_from_local_datetime(&local.and_time(NaiveTime::MIN))
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            // summer offset first so an ambiguous time lists the earlier instant first
            let valid: Vec<FixedOffset> = [hours_east(2), hours_east(1)]
                .into_iter()
                .filter(|offset| {
                    let utc = *local - Duration::seconds(i64::from(offset.local_minus_utc()));
                    self.offset_from_utc_datetime(&utc) == *offset
                })
                .collect();
            match valid.as_slice() {
                [] => LocalResult::None,
                [only] => LocalResult::Single(*only),
                [earliest, latest, ..] => LocalResult::Ambiguous(*earliest, *latest),
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            self.offset_from_utc_datetime(&utc.and_time(NaiveTime::MIN))
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            if *utc >= summer_start() && *utc < summer_end() {
                hours_east(2)
            } else {
                hours_east(1)
            }
        }
    }

    fn utc(month: u32, day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, h, m, 0).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, h, m, 0).unwrap()
    }

    fn completed(policy: ResetPolicy, one_time: bool, at: DateTime<Utc>) -> Task {
        let mut task = Task::new("task-1".into(), "t".into(), policy, one_time);
        task.completed = true;
        task.completed_at = Some(at);
        task
    }

    #[test]
    fn pending_task_is_idle() {
        let task = Task::new("task-1".into(), "t".into(), ResetPolicy::interval_ms(1000), false);
        assert_eq!(compute_next_reset(&task, at(9, 0), &Utc), ResetPlan::Idle);
    }

    #[test]
    fn one_time_interval_is_idle() {
        let task = completed(ResetPolicy::interval_ms(1000), true, at(9, 0));
        assert_eq!(compute_next_reset(&task, at(23, 0), &Utc), ResetPlan::Idle);
    }

    #[test]
    fn interval_arms_then_becomes_overdue() {
        let task = completed(ResetPolicy::interval_ms(60_000), false, at(9, 0));
        assert_eq!(
            compute_next_reset(&task, at(9, 0), &Utc),
            ResetPlan::Arm { due: at(9, 1) }
        );
        assert_eq!(compute_next_reset(&task, at(9, 1), &Utc), ResetPlan::Overdue);
    }

    #[test]
    fn time_of_day_after_passing_rolls_to_tomorrow() {
        let task = completed(ResetPolicy::time_of_day(9, 0), false, at(9, 5));
        let tomorrow = Utc.with_ymd_and_hms(2025, 1, 16, 9, 0, 0).unwrap();
        assert_eq!(
            compute_next_reset(&task, at(9, 5), &Utc),
            ResetPlan::Arm { due: tomorrow }
        );
    }

    #[test]
    fn time_of_day_later_today() {
        let task = completed(ResetPolicy::time_of_day(18, 30), false, at(9, 5));
        assert_eq!(
            compute_next_reset(&task, at(9, 5), &Utc),
            ResetPlan::Arm { due: at(18, 30) }
        );
    }

    #[test]
    fn time_of_day_is_never_overdue() {
        let task = completed(ResetPolicy::time_of_day(9, 0), false, at(9, 5));
        let much_later = Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        assert_eq!(
            compute_next_reset(&task, much_later, &Utc),
            ResetPlan::Arm { due: expected }
        );
    }

    #[test]
    fn time_of_day_uses_local_wall_clock() {
        // 09:00 at UTC+02:00 is 07:00 UTC
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let due = next_time_of_day(&tz, 9, 0, at(5, 0), at(5, 0)).unwrap();
        assert_eq!(due, at(7, 0));
    }

    #[test]
    fn timer_queue_orders_by_due() {
        let mut scheduler = ResetScheduler::with_timezone(Utc);
        scheduler.arm("cat-1", "task-2", at(8, 0), at(10, 0));
        scheduler.arm("cat-1", "task-1", at(8, 0), at(9, 0));
        scheduler.arm("cat-1", "task-1", at(8, 0), at(9, 0));
        assert_eq!(scheduler.pending(), 2);
        assert_eq!(scheduler.next_due(), Some(at(9, 0)));
        assert_eq!(
            scheduler.time_until_next(at(8, 59)),
            Some(std::time::Duration::from_secs(60))
        );
        assert_eq!(
            scheduler.time_until_next(at(9, 30)),
            Some(std::time::Duration::ZERO)
        );
    }

    #[test]
    fn time_in_spring_gap_moves_to_first_valid_minute() {
        // 02:30 does not exist on 30 March; clocks jump from 02:00 to 03:00 local
        let completed_at = utc(3, 29, 12, 0);
        let due = next_time_of_day(&CentralEurope, 2, 30, completed_at, completed_at).unwrap();
        assert_eq!(due, utc(3, 30, 1, 0));
        assert_eq!(due.with_timezone(&CentralEurope).format("%H:%M").to_string(), "03:00");
    }

    #[test]
    fn ambiguous_autumn_time_takes_earlier_instant() {
        // 02:30 happens twice on 26 October: at UTC+2 and again at UTC+1
        let completed_at = utc(10, 25, 12, 0);
        let due = next_time_of_day(&CentralEurope, 2, 30, completed_at, completed_at).unwrap();
        assert_eq!(due, utc(10, 26, 0, 30));
    }

    #[test]
    fn ordinary_days_keep_their_wall_clock_across_the_change() {
        let completed_at = utc(3, 29, 12, 0);
        let before = next_time_of_day(&CentralEurope, 9, 0, completed_at, completed_at).unwrap();
        assert_eq!(before, utc(3, 30, 7, 0));
        let winter = next_time_of_day(&CentralEurope, 9, 0, utc(3, 28, 12, 0), utc(3, 28, 12, 0)).unwrap();
        assert_eq!(winter, utc(3, 29, 8, 0));
    }
}
