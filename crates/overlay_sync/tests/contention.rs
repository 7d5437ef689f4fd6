//! # Contention Scenarios
//!
//! Real threads racing on one coordinator:
//!
//! 1. Render lock held elsewhere -> `try_begin_render` is busy after the timeout
//! 2. Uncontended render -> flag set during the pass, cleared after
//! 3. Short render pass -> async remote op waits it out, one poll behind the release
//! 4. Long render pass -> async remote op times out and returns the permit
//! 5. Sync remote op during a render pass -> busy, permit returned
//! 6. Many threads on the remote gate -> never more than one holder
//!
//! Run with: cargo test --test contention -- --nocapture

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use overlay_sync::{Busy, SyncConfig, SyncCoordinator, TimeoutError, RENDER_POLL_INTERVAL};

/// Generous slack for loaded CI machines.
const SLACK: Duration = Duration::from_millis(400);

/// Starts a render pass on another thread and keeps it alive until the
/// returned sender fires (or is dropped) or `hold` elapses.
fn spawn_render_pass(
    coordinator: &Arc<SyncCoordinator>,
    hold: Duration,
) -> (mpsc::Sender<()>, thread::JoinHandle<()>) {
    let (started_tx, started_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let coordinator = Arc::clone(coordinator);
    let handle = thread::spawn(move || {
        let _pass = coordinator.try_begin_render().expect("render lock should be free");
        started_tx.send(()).expect("test is waiting");
        let _ = stop_rx.recv_timeout(hold);
    });
    started_rx.recv().expect("render thread started");
    (stop_tx, handle)
}

/// Tracks how many holders are live at once and the worst case seen.
#[derive(Default)]
struct Occupancy {
    live: AtomicU32,
    peak: AtomicU32,
}

impl Occupancy {
    fn enter(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SCENARIO 1: busy render lock
// ============================================================================

#[test]
fn render_busy_after_timeout_while_another_pass_runs() {
    let coordinator = SyncCoordinator::shared(SyncConfig::with_timeout_ms(50));
    let (stop, holder) = spawn_render_pass(&coordinator, Duration::from_secs(10));

    let start = Instant::now();
    let result = coordinator.try_begin_render();
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(Busy::RenderLock { .. })));
    drop(result);
    assert!(elapsed >= Duration::from_millis(50), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(50) + SLACK, "waited too long: {elapsed:?}");

    // Holder unaffected
    assert!(coordinator.is_rendering());
    let _ = stop.send(());
    holder.join().unwrap();
    assert!(!coordinator.is_rendering());
}

// ============================================================================
// SCENARIO 2: uncontended render
// ============================================================================

#[test]
fn uncontended_render_sets_and_clears_flag() {
    let coordinator = SyncCoordinator::new(SyncConfig::default());

    let start = Instant::now();
    let pass = coordinator.try_begin_render().unwrap();
    assert!(start.elapsed() < Duration::from_millis(50));
    assert!(coordinator.is_rendering());

    drop(pass);
    assert!(!coordinator.is_rendering());
}

// ============================================================================
// SCENARIO 3: async remote op outlasts a short render pass
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_remote_waits_for_short_render_pass() {
    let coordinator = SyncCoordinator::shared(SyncConfig::with_timeout_ms(200));
    let (_stop, holder) = spawn_render_pass(&coordinator, Duration::from_millis(20));

    let start = Instant::now();
    let op = coordinator.begin_remote_operation_async().await;
    let elapsed = start.elapsed();

    assert!(op.is_ok(), "expected success, got {op:?}");
    assert!(!coordinator.is_rendering());
    assert!(elapsed >= Duration::from_millis(10), "did not wait: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(60), "noticed the release late: {elapsed:?}");
    drop(op);

    holder.join().unwrap();
    assert_eq!(coordinator.stats().remote_render_waits, 1);
    assert_eq!(coordinator.remote_permits_available(), 1);
}

/// Lag allowed on top of one poll interval for scheduler wakeup.
const WAKEUP_SLACK: Duration = Duration::from_millis(10);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_remote_acquires_within_one_poll_of_release() {
    let coordinator = SyncCoordinator::shared(SyncConfig::with_timeout_ms(500));
    let mut worst = Duration::ZERO;

    for _ in 0..5 {
        let (started_tx, started_rx) = mpsc::channel();
        let (released_tx, released_rx) = mpsc::channel();
        let holder = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                let pass = coordinator.try_begin_render().unwrap();
                started_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(20));
                drop(pass);
                released_tx.send(Instant::now()).unwrap();
            })
        };
        started_rx.recv().unwrap();

        let op = coordinator.begin_remote_operation_async().await;
        let acquired = Instant::now();
        assert!(op.is_ok(), "expected success, got {op:?}");
        drop(op);

        holder.join().unwrap();
        let released = released_rx.recv().unwrap();
        worst = worst.max(acquired.saturating_duration_since(released));
    }

    assert!(
        worst <= RENDER_POLL_INTERVAL + WAKEUP_SLACK,
        "acquired {worst:?} after the render pass ended"
    );
    assert_eq!(coordinator.stats().remote_render_waits, 5);
    assert_eq!(coordinator.remote_permits_available(), 1);
}

// ============================================================================
// SCENARIO 4: async remote op gives up on a long render pass
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_remote_times_out_on_long_render_pass() {
    let coordinator = SyncCoordinator::shared(SyncConfig::with_timeout_ms(50));
    let (stop, holder) = spawn_render_pass(&coordinator, Duration::from_secs(1));

    let start = Instant::now();
    let result = coordinator.begin_remote_operation_async().await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(TimeoutError::RenderInProgress { .. })));
    assert!(elapsed >= Duration::from_millis(50), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(100) + SLACK, "waited too long: {elapsed:?}");

    // Permit is back immediately
    assert_eq!(coordinator.remote_permits_available(), 1);

    let _ = stop.send(());
    holder.join().unwrap();
    assert!(coordinator.try_begin_remote_operation().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_remote_worst_case_is_two_budgets() {
    let coordinator = SyncCoordinator::shared(SyncConfig::with_timeout_ms(60));

    // Occupy the remote permit for ~40ms before any render pass starts.
    let (held_tx, held_rx) = mpsc::channel();
    let permit_holder = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || {
            let _op = coordinator.try_begin_remote_operation().unwrap();
            held_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(40));
        })
    };
    held_rx.recv().unwrap();
    let (stop, holder) = spawn_render_pass(&coordinator, Duration::from_secs(2));

    // Permit phase (~40ms) plus a full render-clear budget (60ms).
    let start = Instant::now();
    let result = coordinator.begin_remote_operation_async().await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(TimeoutError::RenderInProgress { .. })));
    assert!(elapsed >= Duration::from_millis(80), "budgets were not summed: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(120) + SLACK, "waited too long: {elapsed:?}");

    permit_holder.join().unwrap();
    let _ = stop.send(());
    holder.join().unwrap();
    assert_eq!(coordinator.remote_permits_available(), 1);
}

// ============================================================================
// SCENARIO 5: sync remote op during a render pass
// ============================================================================

#[test]
fn sync_remote_refused_during_render_without_polling() {
    let coordinator = SyncCoordinator::shared(SyncConfig::with_timeout_ms(200));
    let (stop, holder) = spawn_render_pass(&coordinator, Duration::from_secs(10));

    let start = Instant::now();
    let result = coordinator.try_begin_remote_operation();
    let elapsed = start.elapsed();

    assert_eq!(result.unwrap_err(), Busy::Rendering);
    assert!(elapsed < Duration::from_millis(200), "should not wait on rendering: {elapsed:?}");
    assert_eq!(coordinator.remote_permits_available(), 1);

    let _ = stop.send(());
    holder.join().unwrap();
}

// ============================================================================
// SCENARIO 6: many threads on the remote gate
// ============================================================================

#[test]
fn ten_threads_never_share_the_remote_gate() {
    let coordinator = SyncCoordinator::shared(SyncConfig::with_timeout_ms(50));
    let occupancy = Arc::new(Occupancy::default());
    let barrier = Arc::new(std::sync::Barrier::new(10));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let occupancy = Arc::clone(&occupancy);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                match coordinator.try_begin_remote_operation() {
                    Ok(op) => {
                        occupancy.enter();
                        assert_eq!(coordinator.remote_permits_available(), 0);
                        thread::sleep(Duration::from_millis(2));
                        occupancy.exit();
                        drop(op);
                        true
                    }
                    Err(Busy::RemotePermit { .. }) => false,
                    Err(other) => panic!("unexpected outcome: {other}"),
                }
            })
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert!(successes >= 1);
    assert_eq!(occupancy.peak(), 1);
    assert_eq!(coordinator.remote_permits_available(), 1);

    let stats = coordinator.stats();
    assert_eq!(stats.remote_begun + stats.remote_busy, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_tasks_never_share_the_async_remote_gate() {
    let coordinator = SyncCoordinator::shared(SyncConfig::with_timeout_ms(500));
    let occupancy = Arc::new(Occupancy::default());

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let occupancy = Arc::clone(&occupancy);
            tokio::spawn(async move {
                let op = coordinator.begin_remote_operation_async().await?;
                occupancy.enter();
                tokio::time::sleep(Duration::from_millis(2)).await;
                occupancy.exit();
                drop(op);
                Ok::<(), TimeoutError>(())
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(occupancy.peak(), 1);
    assert_eq!(coordinator.remote_permits_available(), 1);
    assert_eq!(coordinator.stats().remote_begun, 10);
}

// ============================================================================
// Cross-cutting properties
// ============================================================================

#[test]
fn render_passes_never_overlap() {
    let coordinator = SyncCoordinator::shared(SyncConfig::with_timeout_ms(20));
    let occupancy = Arc::new(Occupancy::default());

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let occupancy = Arc::clone(&occupancy);
            thread::spawn(move || {
                for _ in 0..40 {
                    if let Ok(pass) = coordinator.try_begin_render() {
                        occupancy.enter();
                        assert!(coordinator.is_rendering());
                        thread::sleep(Duration::from_micros(200));
                        occupancy.exit();
                        drop(pass);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(occupancy.peak(), 1);
    assert!(!coordinator.is_rendering());
    assert!(coordinator.stats().renders_begun > 0);
}

#[test]
fn sync_remote_bounded_against_held_permit() {
    let coordinator = SyncCoordinator::shared(SyncConfig::with_timeout_ms(40));
    let (held_tx, held_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let holder = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || {
            let _op = coordinator.try_begin_remote_operation().unwrap();
            held_tx.send(()).unwrap();
            let _ = stop_rx.recv();
        })
    };
    held_rx.recv().unwrap();

    let start = Instant::now();
    let result = coordinator.try_begin_remote_operation();
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(Busy::RemotePermit { .. })));
    assert!(elapsed >= Duration::from_millis(40));
    assert!(elapsed < Duration::from_millis(40) + SLACK);
    assert_eq!(coordinator.remote_permits_available(), 0);

    stop_tx.send(()).unwrap();
    holder.join().unwrap();
    assert_eq!(coordinator.remote_permits_available(), 1);
}

#[test]
fn timeout_change_applies_to_next_attempt() {
    let coordinator = SyncCoordinator::shared(SyncConfig::with_timeout_ms(500));
    let (stop, holder) = spawn_render_pass(&coordinator, Duration::from_secs(10));

    coordinator.set_timeout(Duration::from_millis(10));
    let start = Instant::now();
    assert!(coordinator.try_begin_render().is_err());
    assert!(start.elapsed() < Duration::from_millis(500));

    let _ = stop.send(());
    holder.join().unwrap();
}
