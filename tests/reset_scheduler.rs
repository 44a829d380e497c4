use checkloop::{
    MemoryStore, ResetOutcome, ResetPlan, ResetPolicy, ResetScheduler, StateStore,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, h, m, 0).unwrap()
}

struct Fixture {
    store: StateStore<MemoryStore>,
    scheduler: ResetScheduler<Utc>,
    category_id: String,
    task_id: String,
}

fn fixture(text: &str, policy: ResetPolicy, one_time: bool) -> Fixture {
    let mut store = StateStore::load(MemoryStore::new()).unwrap();
    let category = store.create_category("Health").unwrap();
    let task = store.add_task(&category.id, text, policy, one_time).unwrap();
    Fixture {
        store,
        scheduler: ResetScheduler::with_timezone(Utc),
        category_id: category.id,
        task_id: task.id,
    }
}

impl Fixture {
    fn complete(&mut self, now: DateTime<Utc>) -> ResetPlan {
        self.store
            .set_completed(&self.category_id, &self.task_id, true, now)
            .unwrap();
        self.scheduler
            .schedule(&mut self.store, &self.category_id, &self.task_id, now)
            .unwrap()
    }

    fn completed(&self) -> Option<bool> {
        self.store
            .task(&self.category_id, &self.task_id)
            .map(|t| t.completed)
    }

    fn reset(&self) -> ResetOutcome {
        ResetOutcome::Reset {
            category_id: self.category_id.clone(),
            task_id: self.task_id.clone(),
        }
    }

    fn stale(&self) -> ResetOutcome {
        ResetOutcome::Stale {
            category_id: self.category_id.clone(),
            task_id: self.task_id.clone(),
        }
    }

    /// Simulate a process restart over the same storage.
    fn restart(self) -> Self {
        let store = StateStore::load(self.store.into_inner()).unwrap();
        Fixture {
            store,
            scheduler: ResetScheduler::with_timezone(Utc),
            ..self
        }
    }
}

#[test]
fn interval_task_resets_after_its_duration() {
    let mut fx = fixture("Drink water", ResetPolicy::interval_ms(60_000), false);
    let t0 = at(1, 12, 0);

    assert_eq!(fx.complete(t0), ResetPlan::Arm { due: t0 + Duration::seconds(60) });
    assert!(fx.scheduler.fire_due(&mut fx.store, t0 + Duration::seconds(59)).unwrap().is_empty());
    assert_eq!(fx.completed(), Some(true));

    let outcomes = fx
        .scheduler
        .fire_due(&mut fx.store, t0 + Duration::seconds(61))
        .unwrap();
    assert_eq!(outcomes, vec![fx.reset()]);
    assert_eq!(fx.completed(), Some(false));
    assert_eq!(fx.store.task(&fx.category_id, &fx.task_id).unwrap().completed_at, None);
    assert_eq!(fx.store.history().unwrap().len(), 1);
    assert_eq!(fx.scheduler.pending(), 0);
}

#[test]
fn overdue_interval_is_caught_up_once_on_restart() {
    let mut fx = fixture("Drink water", ResetPolicy::interval_ms(60_000), false);
    let t0 = at(1, 12, 0);
    fx.complete(t0);

    let mut fx = fx.restart();
    let later = t0 + Duration::minutes(30);
    let caught_up = fx.scheduler.rearm_all(&mut fx.store, later).unwrap();
    assert_eq!(caught_up, vec![fx.reset()]);
    assert_eq!(fx.completed(), Some(false));
    assert_eq!(fx.scheduler.pending(), 0);

    // a second pass finds nothing left to do
    assert!(fx.scheduler.rearm_all(&mut fx.store, later).unwrap().is_empty());
    assert_eq!(fx.completed(), Some(false));
    assert_eq!(fx.store.history().unwrap().len(), 1);
}

#[test]
fn pending_interval_is_rearmed_on_restart() {
    let mut fx = fixture("Stand up", ResetPolicy::interval_ms(3_600_000), false);
    let t0 = at(1, 12, 0);
    fx.complete(t0);

    let mut fx = fx.restart();
    fx.scheduler
        .rearm_all(&mut fx.store, t0 + Duration::minutes(10))
        .unwrap();
    assert_eq!(fx.scheduler.next_due(), Some(t0 + Duration::hours(1)));
    assert_eq!(
        fx.scheduler.time_until_next(t0 + Duration::minutes(10)),
        Some(std::time::Duration::from_secs(50 * 60))
    );
}

#[test]
fn one_time_interval_task_never_resets() {
    let mut fx = fixture("Renew passport", ResetPolicy::interval_ms(1_000), true);
    let t0 = at(1, 12, 0);
    assert_eq!(fx.complete(t0), ResetPlan::Idle);

    let mut fx = fx.restart();
    fx.scheduler
        .rearm_all(&mut fx.store, t0 + Duration::days(30))
        .unwrap();
    assert_eq!(fx.scheduler.pending(), 0);
    assert_eq!(fx.completed(), Some(true));
}

#[test]
fn one_time_time_of_day_task_is_removed_when_due() {
    let mut fx = fixture("Call the bank", ResetPolicy::time_of_day(9, 0), true);
    assert_eq!(fx.complete(at(1, 8, 0)), ResetPlan::Arm { due: at(1, 9, 0) });

    let outcomes = fx.scheduler.fire_due(&mut fx.store, at(1, 9, 0)).unwrap();
    assert_eq!(
        outcomes,
        vec![ResetOutcome::Removed {
            category_id: fx.category_id.clone(),
            task_id: fx.task_id.clone(),
        }]
    );
    assert_eq!(fx.completed(), None);
    assert!(fx.scheduler.fire_due(&mut fx.store, at(2, 9, 0)).unwrap().is_empty());
    // the completion stays in history
    assert_eq!(fx.store.history().unwrap().len(), 1);
}

#[test]
fn time_of_day_completed_after_the_hour_resets_next_day() {
    let mut fx = fixture("Pay rent", ResetPolicy::time_of_day(9, 0), false);
    assert_eq!(fx.complete(at(1, 9, 5)), ResetPlan::Arm { due: at(2, 9, 0) });

    assert!(fx.scheduler.fire_due(&mut fx.store, at(1, 23, 59)).unwrap().is_empty());
    assert_eq!(fx.scheduler.fire_due(&mut fx.store, at(2, 9, 0)).unwrap(), vec![fx.reset()]);
    assert_eq!(fx.completed(), Some(false));
}

#[test]
fn time_of_day_is_not_caught_up_after_downtime() {
    let mut fx = fixture("Water plants", ResetPolicy::time_of_day(9, 0), false);
    fx.complete(at(1, 8, 0));

    let mut fx = fx.restart();
    fx.scheduler.rearm_all(&mut fx.store, at(3, 10, 0)).unwrap();
    assert_eq!(fx.completed(), Some(true));
    assert_eq!(fx.scheduler.next_due(), Some(at(4, 9, 0)));
}

#[test]
fn unchecking_makes_the_timer_stale() {
    let mut fx = fixture("Drink water", ResetPolicy::interval_ms(60_000), false);
    let t0 = at(1, 12, 0);
    fx.complete(t0);
    fx.store
        .set_completed(&fx.category_id, &fx.task_id, false, t0 + Duration::seconds(10))
        .unwrap();

    let outcomes = fx
        .scheduler
        .fire_due(&mut fx.store, t0 + Duration::minutes(2))
        .unwrap();
    assert_eq!(outcomes, vec![fx.stale()]);
    assert_eq!(fx.completed(), Some(false));
}

#[test]
fn recompleting_only_honours_the_latest_timer() {
    let mut fx = fixture("Drink water", ResetPolicy::interval_ms(60_000), false);
    let t0 = at(1, 12, 0);
    fx.complete(t0);
    fx.store
        .set_completed(&fx.category_id, &fx.task_id, false, t0 + Duration::seconds(10))
        .unwrap();
    let t1 = t0 + Duration::seconds(30);
    fx.complete(t1);
    assert_eq!(fx.scheduler.pending(), 2);

    let first = fx
        .scheduler
        .fire_due(&mut fx.store, t0 + Duration::seconds(60))
        .unwrap();
    assert_eq!(first, vec![fx.stale()]);
    assert_eq!(fx.completed(), Some(true));

    let second = fx
        .scheduler
        .fire_due(&mut fx.store, t1 + Duration::seconds(60))
        .unwrap();
    assert_eq!(second, vec![fx.reset()]);
    assert_eq!(fx.completed(), Some(false));
}

#[test]
fn deleted_task_timer_is_stale() {
    let mut fx = fixture("Drink water", ResetPolicy::interval_ms(60_000), false);
    let t0 = at(1, 12, 0);
    fx.complete(t0);
    fx.store.delete_task(&fx.category_id, &fx.task_id).unwrap();

    let outcomes = fx
        .scheduler
        .fire_due(&mut fx.store, t0 + Duration::minutes(5))
        .unwrap();
    assert_eq!(outcomes, vec![fx.stale()]);
    assert!(fx.store.category(&fx.category_id).unwrap().tasks.is_empty());
}

#[test]
fn deleted_category_timer_is_stale() {
    let mut fx = fixture("Drink water", ResetPolicy::interval_ms(60_000), false);
    let t0 = at(1, 12, 0);
    fx.complete(t0);
    fx.store.delete_category(&fx.category_id).unwrap();

    let outcomes = fx
        .scheduler
        .fire_due(&mut fx.store, t0 + Duration::minutes(5))
        .unwrap();
    assert_eq!(outcomes, vec![fx.stale()]);
    assert!(fx.store.categories().is_empty());
}

#[test]
fn rearming_twice_does_not_duplicate_timers() {
    let mut fx = fixture("Stand up", ResetPolicy::interval_ms(3_600_000), false);
    let t0 = at(1, 12, 0);
    fx.complete(t0);
    fx.scheduler.rearm_all(&mut fx.store, t0).unwrap();
    fx.scheduler.rearm_all(&mut fx.store, t0).unwrap();
    assert_eq!(fx.scheduler.pending(), 1);

    let outcomes = fx
        .scheduler
        .fire_due(&mut fx.store, t0 + Duration::hours(2))
        .unwrap();
    assert_eq!(outcomes, vec![fx.reset()]);
    assert_eq!(fx.store.history().unwrap().len(), 1);
}

#[test]
fn timers_fire_in_due_order() {
    let mut store = StateStore::load(MemoryStore::new()).unwrap();
    let mut scheduler = ResetScheduler::with_timezone(Utc);
    let category = store.create_category("Mixed").unwrap();
    let slow = store
        .add_task(&category.id, "Slow", ResetPolicy::interval_ms(120_000), false)
        .unwrap();
    let fast = store
        .add_task(&category.id, "Fast", ResetPolicy::interval_ms(60_000), false)
        .unwrap();
    let t0 = at(1, 12, 0);
    for task in [&slow, &fast] {
        store.set_completed(&category.id, &task.id, true, t0).unwrap();
    }
    scheduler.rearm_all(&mut store, t0).unwrap();

    let outcomes = scheduler
        .fire_due(&mut store, t0 + Duration::minutes(3))
        .unwrap();
    let order: Vec<&str> = outcomes
        .iter()
        .map(|o| match o {
            ResetOutcome::Reset { task_id, .. } => task_id.as_str(),
            other => panic!("unexpected outcome {:?}", other),
        })
        .collect();
    assert_eq!(order, vec![fast.id.as_str(), slow.id.as_str()]);
}

#[test]
fn tick_picks_up_completions_written_by_another_store() {
    let t0 = at(1, 12, 0);
    let mut fx = fixture("Drink water", ResetPolicy::interval_ms(60_000), false);

    // another process checks the task against the same storage
    let mut other = StateStore::load(fx.store.into_inner()).unwrap();
    other
        .set_completed(&fx.category_id, &fx.task_id, true, t0)
        .unwrap();
    fx.store = StateStore::load(MemoryStore::new()).unwrap();
    let mut watcher = StateStore::load(other.into_inner()).unwrap();

    assert!(fx.scheduler.tick(&mut watcher, t0).unwrap().is_empty());
    assert_eq!(fx.scheduler.pending(), 1);
    let outcomes = fx
        .scheduler
        .tick(&mut watcher, t0 + Duration::seconds(60))
        .unwrap();
    assert_eq!(outcomes, vec![fx.reset()]);
    assert!(!watcher.task(&fx.category_id, &fx.task_id).unwrap().completed);
}

#[test]
fn run_stops_when_the_callback_says_so() {
    let mut fx = fixture("Stand up", ResetPolicy::interval_ms(3_600_000), false);
    fx.complete(Utc::now());

    let mut ticks = 0;
    fx.scheduler
        .run(&mut fx.store, std::time::Duration::from_millis(1), |outcomes| {
            assert!(outcomes.is_empty());
            ticks += 1;
            ticks < 3
        })
        .unwrap();
    assert_eq!(ticks, 3);
    assert_eq!(fx.completed(), Some(true));
}

#[test]
fn longest_accepted_interval_still_arms() {
    let mut fx = fixture(
        "Time capsule",
        ResetPolicy::interval_ms(checkloop::utils::MAX_INTERVAL_MS),
        false,
    );
    let t0 = at(1, 12, 0);
    let expected = t0 + Duration::milliseconds(checkloop::utils::MAX_INTERVAL_MS as i64);
    assert_eq!(fx.complete(t0), ResetPlan::Arm { due: expected });
}
