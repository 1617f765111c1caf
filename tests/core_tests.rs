/*
 * Core scheduling behavior: one-shot and fixed-rate timing in every
 * unit, queue introspection, cancellation, enable/disable, pool growth
 * and exhaustion, and the slot report. All timing runs against the
 * virtual clock fixture, so the windows asserted here are deterministic.
 */

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use common::{new_manager, run_until, tasks_taken};
use taskmux::{
    Executable, MAX_TASK_BLOCKS, Platform, SchedulerNotice, TASK_BLOCK_SIZE, TimeUnit,
    clear_notification_hook, millis_to_micros, set_notification_hook,
};

#[test]
fn scheduling_task_once_in_microseconds() {
    static EXEC_AT: AtomicU64 = AtomicU64::new(0);
    static COUNT: AtomicU32 = AtomicU32::new(0);

    let tasks = new_manager();
    let started = tasks.platform().now_micros();
    tasks
        .schedule_once_exec(
            800,
            TimeUnit::Micros,
            Arc::new(move || {
                EXEC_AT.store(tasks.platform().now_micros(), Ordering::SeqCst);
                COUNT.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    assert!(run_until(tasks, 5_000_000, || COUNT.load(Ordering::SeqCst) > 0));
    let elapsed = EXEC_AT.load(Ordering::SeqCst) - started;
    assert!(elapsed >= 800, "fired early: {elapsed}us");
    assert!(elapsed <= 1_300, "fired late: {elapsed}us");

    // one-shot: the slot is freed and never fires again
    tasks.yield_for_micros(10_000);
    assert_eq!(COUNT.load(Ordering::SeqCst), 1);
    assert_eq!(tasks_taken(tasks), 0);
    assert!(tasks.get_first_task().is_none());
}

#[test]
fn scheduling_task_once_in_milliseconds() {
    static EXEC_AT: AtomicU64 = AtomicU64::new(0);

    let tasks = new_manager();
    let started = tasks.platform().now_micros();
    tasks
        .schedule_once_exec(
            20,
            TimeUnit::Millis,
            Arc::new(move || {
                EXEC_AT.store(tasks.platform().now_micros(), Ordering::SeqCst);
            }),
        )
        .unwrap();

    assert!(run_until(tasks, 5_000_000, || {
        EXEC_AT.load(Ordering::SeqCst) != 0
    }));
    let elapsed = EXEC_AT.load(Ordering::SeqCst) - started;
    assert!((19_500..=21_500).contains(&elapsed), "elapsed {elapsed}us");
    assert_eq!(tasks_taken(tasks), 0);
}

#[test]
fn scheduling_task_once_in_seconds() {
    static EXEC_AT: AtomicU64 = AtomicU64::new(0);

    let tasks = new_manager();
    let started = tasks.platform().now_micros();
    let id = tasks
        .schedule_once_exec(
            2,
            TimeUnit::Seconds,
            Arc::new(move || {
                EXEC_AT.store(tasks.platform().now_micros(), Ordering::SeqCst);
            }),
        )
        .unwrap();

    // SECONDS is normalised to MILLIS at registration time
    let task = tasks.get_task(id).unwrap();
    assert!(task.is_millis_schedule());
    assert!(!task.is_micros_schedule());

    assert!(run_until(tasks, 10_000_000, || {
        EXEC_AT.load(Ordering::SeqCst) != 0
    }));
    let elapsed = EXEC_AT.load(Ordering::SeqCst) - started;
    assert!((1_999_000..=2_100_000).contains(&elapsed), "elapsed {elapsed}us");
    assert_eq!(tasks_taken(tasks), 0);
}

#[test]
fn running_with_an_executable_object() {
    #[derive(Default)]
    struct TestingExec {
        runs: AtomicU32,
    }
    impl Executable for TestingExec {
        fn exec(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    static DONE: AtomicBool = AtomicBool::new(false);

    let tasks = new_manager();
    let exec = Arc::new(TestingExec::default());
    tasks
        .schedule_fixed_rate_exec(10, TimeUnit::Millis, exec.clone())
        .unwrap();
    tasks
        .schedule_once_exec(
            250,
            TimeUnit::Millis,
            Arc::new(|| DONE.store(true, Ordering::SeqCst)),
        )
        .unwrap();

    assert!(run_until(tasks, 5_000_000, || DONE.load(Ordering::SeqCst)));
    assert!(exec.runs.load(Ordering::SeqCst) > 10);
}

#[test]
fn scheduling_many_jobs_at_once() {
    static FIRST_AT: AtomicU64 = AtomicU64::new(0);
    static SECOND_AT: AtomicU64 = AtomicU64::new(0);

    let tasks = new_manager();
    let started = tasks.platform().now_micros();
    tasks.schedule_once(1, TimeUnit::Seconds, || {}).unwrap();
    tasks
        .schedule_once_exec(
            200,
            TimeUnit::Millis,
            Arc::new(move || {
                FIRST_AT.store(tasks.platform().now_micros(), Ordering::SeqCst);
            }),
        )
        .unwrap();
    tasks
        .schedule_once_exec(
            250,
            TimeUnit::Micros,
            Arc::new(move || {
                SECOND_AT.store(tasks.platform().now_micros(), Ordering::SeqCst);
            }),
        )
        .unwrap();

    assert!(run_until(tasks, 5_000_000, || {
        FIRST_AT.load(Ordering::SeqCst) != 0
    }));

    // the short microsecond job must have run long before, right after
    // its 250us were up
    let second_elapsed = SECOND_AT.load(Ordering::SeqCst) - started;
    assert!((250..=1_000).contains(&second_elapsed), "elapsed {second_elapsed}us");

    // only the one-second job is still holding a slot
    assert_eq!(tasks_taken(tasks), 1);
}

#[test]
fn fixed_rate_tasks_are_queued_soonest_first_and_fire_at_rate() {
    static MILLIS_RUNS: AtomicU32 = AtomicU32::new(0);
    static MICROS_RUNS: AtomicU32 = AtomicU32::new(0);

    let tasks = new_manager();
    assert!(tasks.get_first_task().is_none());

    tasks
        .schedule_fixed_rate(10, TimeUnit::Millis, || {
            MILLIS_RUNS.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    tasks
        .schedule_fixed_rate(100, TimeUnit::Micros, || {
            MICROS_RUNS.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    // the 100us task is due sooner, so it heads the queue
    let first = tasks.get_first_task().unwrap();
    assert!(first.is_micros_schedule());
    assert!(!first.is_millis_schedule());

    let second = tasks.get_task(first.next_in_queue().unwrap()).unwrap();
    assert!(second.is_millis_schedule());
    assert!(second.next_in_queue().is_none());

    let before = tasks.platform().now_micros();
    tasks.yield_for_micros(millis_to_micros(22));
    let yielded = tasks.platform().now_micros() - before;
    assert!((22_000..25_000).contains(&yielded), "yielded {yielded}us");

    assert!(MILLIS_RUNS.load(Ordering::SeqCst) > 1);
    assert!(MICROS_RUNS.load(Ordering::SeqCst) > 150);
}

#[test]
fn cancelling_a_job_after_creation() {
    static RUNS: AtomicU32 = AtomicU32::new(0);

    let tasks = new_manager();
    assert!(tasks.get_first_task().is_none());

    let id = tasks
        .schedule_fixed_rate(10, TimeUnit::Millis, || {
            RUNS.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let task = tasks.get_first_task().unwrap();
    assert!(task.is_millis_schedule());
    assert!(task.micros_from_now(tasks.platform()) > 8_000);

    assert!(run_until(tasks, 5_000_000, || RUNS.load(Ordering::SeqCst) > 0));
    assert_eq!(tasks_taken(tasks), 1);

    tasks.cancel_task(id);
    tasks.yield_for_micros(100);
    assert_eq!(tasks_taken(tasks), 0);
    assert!(tasks.get_first_task().is_none());

    // a cancelled repeating task never fires again
    let runs = RUNS.load(Ordering::SeqCst);
    tasks.yield_for_micros(millis_to_micros(30));
    assert_eq!(RUNS.load(Ordering::SeqCst), runs);
}

#[test]
fn enable_and_disable_support() {
    static RUNS: AtomicU32 = AtomicU32::new(0);

    let tasks = new_manager();
    let id = tasks
        .schedule_fixed_rate(1, TimeUnit::Millis, || {
            RUNS.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    tasks.yield_for_micros(20_000);
    assert!(RUNS.load(Ordering::SeqCst) > 0);

    tasks.set_task_enabled(id, false);
    tasks.yield_for_micros(2_000);
    let while_disabled = RUNS.load(Ordering::SeqCst);

    tasks.yield_for_micros(20_000);
    assert_eq!(RUNS.load(Ordering::SeqCst), while_disabled);

    tasks.set_task_enabled(id, true);
    tasks.yield_for_micros(20_000);
    assert!(RUNS.load(Ordering::SeqCst) > while_disabled);
}

#[test]
fn a_disabled_task_at_the_head_does_not_block_the_walk() {
    static BLOCKED_RUNS: AtomicU32 = AtomicU32::new(0);
    static BEHIND_RUNS: AtomicU32 = AtomicU32::new(0);

    let tasks = new_manager();
    let head = tasks
        .schedule_fixed_rate(1, TimeUnit::Millis, || {
            BLOCKED_RUNS.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    tasks
        .schedule_fixed_rate(5, TimeUnit::Millis, || {
            BEHIND_RUNS.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    tasks.set_task_enabled(head, false);
    tasks.yield_for_micros(millis_to_micros(20));

    assert_eq!(BLOCKED_RUNS.load(Ordering::SeqCst), 0);
    assert!(BEHIND_RUNS.load(Ordering::SeqCst) > 0);
}

#[test]
fn the_pool_grows_by_whole_blocks_and_reset_empties_it() {
    let tasks = new_manager();
    let jobs = TASK_BLOCK_SIZE + 2;
    for _ in 0..jobs {
        assert!(tasks.schedule_once(1, TimeUnit::Seconds, || {}).is_some());
    }
    assert_eq!(tasks_taken(tasks), jobs);

    tasks.reset();
    assert_eq!(tasks_taken(tasks), 0);
    assert!(tasks.get_first_task().is_none());
}

#[test]
fn exhausting_the_pool_reports_full() {
    static SAW_FULL: AtomicBool = AtomicBool::new(false);

    fn hook(notice: SchedulerNotice) {
        if notice == SchedulerNotice::PoolFull {
            SAW_FULL.store(true, Ordering::SeqCst);
        }
    }

    let tasks = new_manager();
    set_notification_hook(hook);

    let capacity = TASK_BLOCK_SIZE * MAX_TASK_BLOCKS;
    for _ in 0..capacity {
        assert!(tasks.schedule_fixed_rate(1, TimeUnit::Seconds, || {}).is_some());
    }
    assert!(tasks.schedule_once(1, TimeUnit::Seconds, || {}).is_none());
    assert!(SAW_FULL.load(Ordering::SeqCst));

    clear_notification_hook();
}

#[test]
fn a_cancelled_slot_is_recycled_by_the_next_schedule() {
    let tasks = new_manager();
    let first = tasks.schedule_once(100, TimeUnit::Millis, || {}).unwrap();
    tasks.cancel_task(first);
    let second = tasks.schedule_once(100, TimeUnit::Millis, || {}).unwrap();
    assert_eq!(first, second);
}

#[test]
fn the_slot_report_shows_repeating_in_use_and_free() {
    let tasks = new_manager();
    tasks.schedule_fixed_rate(1, TimeUnit::Seconds, || {}).unwrap();
    tasks.schedule_once(1, TimeUnit::Seconds, || {}).unwrap();

    let mut buffer = [0u8; 64];
    let report = tasks.check_available_slots(&mut buffer);
    assert_eq!(report.len(), TASK_BLOCK_SIZE);
    assert!(report.starts_with("RU"), "report {report}");
    assert!(report[2..].chars().all(|state| state == 'F'));

    // the report truncates to the caller's buffer and NUL-terminates
    let mut small = [0u8; 4];
    assert_eq!(tasks.check_available_slots(&mut small), "RUF");
    assert_eq!(small[3], 0);
}

#[test]
fn the_report_lowercases_the_running_task() {
    static HEAD_STATE: AtomicU32 = AtomicU32::new(0);

    let tasks = new_manager();
    tasks
        .schedule_fixed_rate_exec(
            1,
            TimeUnit::Millis,
            Arc::new(move || {
                let summary = tasks.slot_summary::<32>();
                let state = summary.chars().next().unwrap_or(' ');
                HEAD_STATE.store(state as u32, Ordering::SeqCst);
            }),
        )
        .unwrap();

    tasks.yield_for_micros(5_000);
    assert_eq!(HEAD_STATE.load(Ordering::SeqCst), u32::from('r'));
}

#[test]
fn execute_runs_on_the_next_loop() {
    static RUNS: AtomicU32 = AtomicU32::new(0);

    let tasks = new_manager();
    tasks
        .execute(|| {
            RUNS.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    tasks.run_loop();
    assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    assert_eq!(tasks_taken(tasks), 0);
}

#[test]
fn yielding_for_zero_micros_still_pumps_once() {
    static RUNS: AtomicU32 = AtomicU32::new(0);

    let tasks = new_manager();
    tasks
        .execute(|| {
            RUNS.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    tasks.yield_for_micros(0);
    assert_eq!(RUNS.load(Ordering::SeqCst), 1);
}
