//! Integration tests for the conversion facade, driven by `FakeRuntime`.
//!
//! These exercise the pool, the bridge call and shutdown together without a
//! Python installation. Live tests against CPython are in `python_e2e.rs`.

use markitdown_bridge::{
    BridgeStep, ConversionProgressCallback, ConvertError, Converter, ConverterConfig, FakeRuntime,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn fixture() -> FakeRuntime {
    FakeRuntime::new()
        .with_document("doc.txt", "# Hello")
        .with_titled_document("deck.pptx", "# Q3\n\n- revenue up", "Q3 Review")
        .with_failure(
            "bad.bin",
            "UnsupportedFormatException: Could not convert 'bad.bin' to Markdown",
        )
}

/// Route library logs through the test harness; `RUST_LOG=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

fn converter_with(
    rt: FakeRuntime,
    config: ConverterConfig,
) -> (Arc<FakeRuntime>, Converter<FakeRuntime>) {
    init_tracing();
    let rt = Arc::new(rt);
    let converter = Converter::new(Arc::clone(&rt), config).expect("converter");
    (rt, converter)
}

fn converter() -> (Arc<FakeRuntime>, Converter<FakeRuntime>) {
    converter_with(fixture(), ConverterConfig::default())
}

/// Spin until `cond` holds or two seconds pass.
fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

// ── Single conversions ──────────────────────────────────────────────────────

#[test]
fn converts_a_document() {
    let (rt, c) = converter();
    let out = c.convert_sync("doc.txt").unwrap();

    assert_eq!(out.markdown, "# Hello");
    assert_eq!(out.source, "doc.txt");
    assert_eq!(out.title, None);
    assert_eq!(c.pool().idle_count(), 1);
    assert_eq!(c.pool().checked_out_count(), 0);
    assert_eq!(rt.live_objects(), 2, "module and entry point only");
}

#[test]
fn carries_the_title_through() {
    let (_rt, c) = converter();
    let out = c.convert_sync("deck.pptx").unwrap();
    assert_eq!(out.title.as_deref(), Some("Q3 Review"));
    assert!(out.markdown.starts_with("# Q3"));
}

#[test]
fn empty_path_is_invalid_argument() {
    let (rt, c) = converter();
    let err = c.convert_sync("").unwrap_err();
    assert!(matches!(err, ConvertError::InvalidArgument { .. }));
    assert!(err.to_string().contains("file path cannot be empty"));
    assert_eq!(c.pool().created_count(), 0);
    assert_eq!(rt.invocations(), 0);
}

#[test]
fn whitespace_path_reaches_the_converter() {
    let (rt, c) = converter();
    let err = c.convert_sync("   ").unwrap_err();
    assert_eq!(err.kind(), "InvocationFailed");
    assert!(err.to_string().contains("FileNotFoundError"));
    assert_eq!(rt.invocations(), 1);
}

#[test]
fn library_exception_is_invocation_failure() {
    let (_rt, c) = converter();
    let err = c.convert_sync("bad.bin").unwrap_err();

    assert_eq!(err.kind(), "InvocationFailed");
    assert_eq!(err.bridge_step(), Some(BridgeStep::Invocation));
    assert!(err.to_string().contains("UnsupportedFormatException"));
    assert_eq!(c.pool().checked_out_count(), 0);
}

#[test]
fn missing_file_is_reported_not_panicked() {
    let (_rt, c) = converter();
    let err = c.convert_sync("nowhere.docx").unwrap_err();
    assert_eq!(err.kind(), "InvocationFailed");
    assert!(err.to_string().contains("FileNotFoundError"));
}

#[test]
fn failure_at_any_step_returns_the_handle() {
    let (rt, c) = converter();
    c.convert_sync("doc.txt").unwrap();
    let idle = c.pool().idle_count();
    let live = rt.live_objects();

    for step in BridgeStep::ALL {
        rt.fail_at(Some(step));
        let err = c.convert_sync("doc.txt").unwrap_err();
        assert_eq!(err.bridge_step(), Some(step));
        assert_eq!(c.pool().idle_count(), idle, "handle lost after {step:?}");
        assert_eq!(rt.live_objects(), live, "references leaked after {step:?}");
    }

    rt.fail_at(None);
    assert_eq!(c.convert_sync("doc.txt").unwrap().markdown, "# Hello");
    assert_eq!(c.pool().created_count(), 1, "failed calls never spawn handles");
}

#[test]
fn exhausted_pool_reports_the_limit() {
    let config = ConverterConfig::builder()
        .max_handles(1)
        .acquire_timeout_secs(0)
        .build()
        .unwrap();
    let (_rt, c) = converter_with(fixture(), config);

    let held = c.pool().acquire().unwrap();
    let err = c.convert_sync("doc.txt").unwrap_err();
    assert!(matches!(err, ConvertError::PoolExhausted { max_handles: 1, .. }));

    held.release();
    assert!(c.convert_sync("doc.txt").is_ok());
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[test]
fn concurrent_callers_share_a_bounded_pool() {
    let config = ConverterConfig::builder().max_handles(3).build().unwrap();
    let (rt, c) = converter_with(fixture(), config);
    rt.set_invocation_delay(Duration::from_millis(10));

    std::thread::scope(|s| {
        for _ in 0..12 {
            let c = c.clone();
            s.spawn(move || {
                for _ in 0..5 {
                    assert_eq!(c.convert_sync("doc.txt").unwrap().markdown, "# Hello");
                }
            });
        }
    });

    assert!(c.pool().created_count() <= 3);
    assert_eq!(c.pool().checked_out_count(), 0);
    assert_eq!(c.pool().idle_count(), c.pool().created_count());
    assert_eq!(rt.invocations(), 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn async_convert_runs_off_the_executor() {
    let (_rt, c) = converter();
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let c = c.clone();
            tokio::spawn(async move { c.convert("doc.txt").await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().markdown, "# Hello");
    }
}

// ── Batches ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    completed: AtomicUsize,
    errors: Mutex<Vec<String>>,
    batch: Mutex<Option<(usize, usize)>>,
}

impl ConversionProgressCallback for Recorder {
    fn on_file_start(&self, _source: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_file_complete(&self, _source: &str, _markdown_len: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_file_error(&self, source: &str, _error: &str) {
        self.errors.lock().unwrap().push(source.to_string());
    }

    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        *self.batch.lock().unwrap() = Some((total_files, success_count));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_keeps_input_order_and_isolates_failures() {
    let recorder = Arc::new(Recorder::default());
    let config = ConverterConfig::builder()
        .max_handles(2)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let (_rt, c) = converter_with(fixture(), config);

    let inputs = ["deck.pptx", "bad.bin", "doc.txt", ""];
    let (results, stats) = c.convert_many(&inputs).await;

    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap().source, "deck.pptx");
    assert_eq!(results[1].as_ref().unwrap_err().kind(), "InvocationFailed");
    assert_eq!(results[2].as_ref().unwrap().markdown, "# Hello");
    assert_eq!(results[3].as_ref().unwrap_err().kind(), "InvalidArgument");

    assert_eq!(stats.total_files, 4);
    assert_eq!(stats.converted, 2);
    assert_eq!(stats.failed, 2);

    assert_eq!(recorder.started.load(Ordering::SeqCst), 4);
    assert_eq!(recorder.completed.load(Ordering::SeqCst), 2);
    let mut errors = recorder.errors.lock().unwrap().clone();
    errors.sort();
    assert_eq!(errors, vec!["".to_string(), "bad.bin".to_string()]);
    assert_eq!(*recorder.batch.lock().unwrap(), Some((4, 2)));
}

// ── Files and bytes ──────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn convert_to_file_writes_atomically() {
    let (_rt, c) = converter();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested/out.md");

    let out = c.convert_to_file("doc.txt", &target).await.unwrap();

    assert_eq!(std::fs::read_to_string(&target).unwrap(), "# Hello");
    assert_eq!(out.markdown, "# Hello");
    let entries = std::fs::read_dir(target.parent().unwrap()).unwrap().count();
    assert_eq!(entries, 1, "temp file left behind");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_to_same_stem_do_not_collide() {
    let (_rt, c) = converter();
    let dir = tempfile::tempdir().unwrap();
    let md = dir.path().join("report.md");
    let txt = dir.path().join("report.txt");

    let writes: Vec<_> = (0..20)
        .map(|i| {
            let c = c.clone();
            let (input, target) = if i % 2 == 0 {
                ("doc.txt", md.clone())
            } else {
                ("deck.pptx", txt.clone())
            };
            tokio::spawn(async move { c.convert_to_file(input, &target).await })
        })
        .collect();
    for w in writes {
        w.await.unwrap().unwrap();
    }

    assert_eq!(std::fs::read_to_string(&md).unwrap(), "# Hello");
    assert!(std::fs::read_to_string(&txt).unwrap().starts_with("# Q3"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn convert_to_file_leaves_nothing_on_failure() {
    let (_rt, c) = converter();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.md");

    let err = c.convert_to_file("bad.bin", &target).await.unwrap_err();
    assert_eq!(err.kind(), "InvocationFailed");
    assert!(!target.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn convert_from_bytes_goes_through_a_temp_file() {
    let (_rt, c) = converter_with(FakeRuntime::new().reading_from_disk(), ConverterConfig::default());

    let out = c
        .convert_from_bytes(b"plain text body", Some("txt"))
        .await
        .unwrap();

    assert_eq!(out.markdown, "plain text body");
    assert_eq!(out.source, "<memory.txt>");
}

// ── Shutdown ─────────────────────────────────────────────────────────────────

#[test]
fn shutdown_lets_in_flight_calls_finish_then_refuses_new_ones() {
    let config = ConverterConfig::builder()
        .prewarm_handles(1)
        .shutdown_grace_secs(5)
        .build()
        .unwrap();
    let (rt, c) = converter_with(fixture(), config);
    rt.set_invocation_delay(Duration::from_millis(200));

    std::thread::scope(|s| {
        let worker = {
            let c = c.clone();
            s.spawn(move || c.convert_sync("doc.txt"))
        };
        wait_until(|| c.pool().checked_out_count() == 1);

        let report = c.shutdown();
        assert!(report.first_drain);

        let in_flight = worker.join().unwrap();
        assert_eq!(in_flight.unwrap().markdown, "# Hello");
    });

    let err = c.convert_sync("doc.txt").unwrap_err();
    assert!(matches!(err, ConvertError::ShuttingDown));
    assert_eq!(c.pool().created_count(), 0);
    assert_eq!(rt.live_objects(), 0);
    assert_eq!(rt.teardowns(), 1);
}

#[test]
fn shutdown_twice_tears_down_once() {
    let (rt, c) = converter();
    c.convert_sync("doc.txt").unwrap();

    let first = c.shutdown();
    let second = c.shutdown();

    assert!(first.first_drain);
    assert_eq!(first.cleaned, 1);
    assert!(!second.first_drain);
    assert_eq!(rt.teardowns(), 1);
    assert_eq!(rt.live_objects(), 0);
}

#[tokio::test]
async fn coordinator_drains_on_trigger() {
    let (rt, c) = converter();
    c.convert_sync("doc.txt").unwrap();

    let report = c
        .shutdown_coordinator()
        .grace_period(Duration::from_millis(100))
        .run_until(async {})
        .await;

    assert_eq!(report.cleaned, 1);
    assert!(c.pool().is_closed());
    assert!(rt.is_torn_down());
}
