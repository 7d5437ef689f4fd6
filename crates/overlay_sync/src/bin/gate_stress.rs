//! # Gate Stress Run
//!
//! Drives one coordinator the way an injected overlay does:
//! - one render thread drawing frames at a fixed rate
//! - several remote-call threads hammering the remote gate, half through the
//!   sync fast path, half through the async path
//!
//! Render/render and remote/remote overlap are checked live and fail the run.
//! Render/remote overlap on the sync path is only counted (best effort by
//! contract).
//!
//! Usage: `gate_stress [config.toml] [seconds]`
//! Build with: `cargo run --release --features stress --bin gate_stress`
//! Log level via `RUST_LOG` (default `info`).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use overlay_sync::{Busy, SyncConfig, SyncCoordinator, SyncResult, TimeoutError};
use tracing_subscriber::EnvFilter;

/// Stress run parameters.
struct StressConfig {
    /// Test duration in seconds.
    duration_secs: u64,
    /// Render frame rate (Hz).
    fps: u32,
    /// Simulated draw time per frame.
    draw_time: Duration,
    /// Number of remote-call threads.
    remote_threads: usize,
    /// Simulated host access time per remote operation.
    remote_work: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            duration_secs: 5,
            fps: 60,
            draw_time: Duration::from_millis(4),
            remote_threads: 8,
            remote_work: Duration::from_micros(300),
        }
    }
}

/// Live holder count with high-water mark.
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

    fn is_occupied(&self) -> bool {
        self.live.load(Ordering::SeqCst) > 0
    }

    fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Shared state of one run.
#[derive(Default)]
struct Shared {
    running: AtomicBool,
    render: Occupancy,
    remote: Occupancy,
    frames_drawn: AtomicU64,
    frames_skipped: AtomicU64,
    remote_ok: AtomicU64,
    remote_busy: AtomicU64,
    remote_timeout: AtomicU64,
    cross_overlaps: AtomicU64,
}

fn render_thread(coordinator: &SyncCoordinator, shared: &Shared, config: &StressConfig) {
    let frame_budget = Duration::from_micros(1_000_000 / u64::from(config.fps.max(1)));

    while shared.running.load(Ordering::Relaxed) {
        let frame_start = Instant::now();

        match coordinator.try_begin_render() {
            Ok(pass) => {
                shared.render.enter();
                if shared.remote.is_occupied() {
                    shared.cross_overlaps.fetch_add(1, Ordering::Relaxed);
                }
                thread::sleep(config.draw_time);
                shared.render.exit();
                drop(pass);
                shared.frames_drawn.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                shared.frames_skipped.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(rest) = frame_budget.checked_sub(frame_start.elapsed()) {
            thread::sleep(rest);
        }
    }
}

fn sync_remote_thread(coordinator: &SyncCoordinator, shared: &Shared, config: &StressConfig) {
    while shared.running.load(Ordering::Relaxed) {
        match coordinator.try_begin_remote_operation() {
            Ok(op) => {
                shared.remote.enter();
                thread::sleep(config.remote_work);
                shared.remote.exit();
                drop(op);
                shared.remote_ok.fetch_add(1, Ordering::Relaxed);
            }
            Err(Busy::Rendering) => {
                shared.remote_busy.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(1));
            }
            Err(_) => {
                shared.remote_busy.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn async_remote_thread(coordinator: &SyncCoordinator, shared: &Shared, config: &StressConfig) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to build async runtime: {}", e);
            return;
        }
    };

    runtime.block_on(async {
        while shared.running.load(Ordering::Relaxed) {
            match coordinator.begin_remote_operation_async().await {
                Ok(op) => {
                    shared.remote.enter();
                    if coordinator.is_rendering() {
                        shared.cross_overlaps.fetch_add(1, Ordering::Relaxed);
                    }
                    tokio::time::sleep(config.remote_work).await;
                    shared.remote.exit();
                    drop(op);
                    shared.remote_ok.fetch_add(1, Ordering::Relaxed);
                }
                Err(TimeoutError::RenderInProgress { .. }) => {
                    shared.remote_timeout.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Err(_) => {
                    shared.remote_timeout.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });
}

fn main() -> SyncResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let sync_config = match args.next() {
        Some(path) => SyncConfig::load(&path)?,
        None => SyncConfig::default(),
    };
    let mut config = StressConfig::default();
    if let Some(secs) = args.next().and_then(|s| s.parse().ok()) {
        config.duration_secs = secs;
    }

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║           OVERLAY SYNC - GATE STRESS RUN                         ║");
    println!("╠══════════════════════════════════════════════════════════════════╣");
    println!(
        "║  Timeout:        {:>6} ms                                       ║",
        sync_config.timeout_ms
    );
    println!(
        "║  Render:         {:>6} fps, {:>4} ms draw                        ║",
        config.fps,
        config.draw_time.as_millis()
    );
    println!(
        "║  Remote threads: {:>6}                                          ║",
        config.remote_threads
    );
    println!(
        "║  Duration:       {:>6} s                                        ║",
        config.duration_secs
    );
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let coordinator = SyncCoordinator::shared(sync_config);
    let shared = Arc::new(Shared::default());
    let config = Arc::new(config);
    shared.running.store(true, Ordering::SeqCst);

    let mut handles = Vec::with_capacity(config.remote_threads + 1);
    {
        let (coordinator, shared, config) =
            (Arc::clone(&coordinator), Arc::clone(&shared), Arc::clone(&config));
        handles.push(thread::spawn(move || render_thread(&coordinator, &shared, &config)));
    }
    for i in 0..config.remote_threads {
        let (coordinator, shared, config) =
            (Arc::clone(&coordinator), Arc::clone(&shared), Arc::clone(&config));
        handles.push(thread::spawn(move || {
            if i % 2 == 0 {
                sync_remote_thread(&coordinator, &shared, &config);
            } else {
                async_remote_thread(&coordinator, &shared, &config);
            }
        }));
    }

    thread::sleep(Duration::from_secs(config.duration_secs));
    shared.running.store(false, Ordering::SeqCst);
    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("Worker thread panicked");
        }
    }

    let stats = coordinator.stats();
    println!("Frames drawn:          {}", shared.frames_drawn.load(Ordering::Relaxed));
    println!("Frames skipped:        {}", shared.frames_skipped.load(Ordering::Relaxed));
    println!("Remote ops completed:  {}", shared.remote_ok.load(Ordering::Relaxed));
    println!("Remote ops busy:       {}", shared.remote_busy.load(Ordering::Relaxed));
    println!("Remote ops timed out:  {}", shared.remote_timeout.load(Ordering::Relaxed));
    println!("Render/remote overlap: {}", shared.cross_overlaps.load(Ordering::Relaxed));
    println!();
    println!("Coordinator: {stats:?}");
    println!();

    let render_peak = shared.render.peak();
    let remote_peak = shared.remote.peak();
    let permits = coordinator.remote_permits_available();
    if render_peak > 1 || remote_peak > 1 || permits != 1 || coordinator.is_rendering() {
        println!(
            "❌ FAILED: render peak {render_peak}, remote peak {remote_peak}, permits {permits}"
        );
        std::process::exit(1);
    }

    println!("✅ PASSED: exclusion held, no leaked lock or permit");
    Ok(())
}
