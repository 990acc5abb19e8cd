//! Concurrent access tests for atomic writes and lock files

use registry_fs::{Error, LockFile, LockPolicy, io};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

#[test]
fn concurrent_atomic_writes_never_interleave() {
    let dir = tempdir().unwrap();
    let path = Arc::new(dir.path().join("record.yaml"));

    let num_threads = 8;
    let writes_per_thread = 25;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let path = Arc::clone(&path);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..writes_per_thread {
                    let content = format!("thread{thread_id}:write{i}\n");
                    io::write_text(&path, &content).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread should not panic");
    }

    let content = std::fs::read_to_string(path.as_ref()).unwrap();
    assert_eq!(content.matches("thread").count(), 1, "got: {content}");
    assert!(content.ends_with('\n'));

    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            let name = e.as_ref().unwrap().file_name();
            io::is_temp_file(&name.to_string_lossy())
        })
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn lock_serializes_critical_sections() {
    let dir = tempdir().unwrap();
    let lock_path = Arc::new(dir.path().join("registry.lock"));
    let inside = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let policy = LockPolicy {
        initial_interval_ms: 1,
        max_interval_ms: 5,
        max_elapsed_ms: 10_000,
    };

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lock_path = Arc::clone(&lock_path);
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            thread::spawn(move || {
                for _ in 0..10 {
                    let _guard = LockFile::acquire(&lock_path, &policy).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(std::time::Duration::from_millis(1));
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[test]
fn contended_lock_reports_busy_with_path() {
    let dir = tempdir().unwrap();
    let lock_path = dir.path().join("registry.lock");

    let _held = LockFile::acquire(&lock_path, &LockPolicy::default()).unwrap();
    match LockFile::acquire(&lock_path, &LockPolicy::no_retry()) {
        Err(Error::LockBusy { path }) => assert_eq!(path, lock_path),
        other => panic!("expected LockBusy, got {other:?}"),
    }
}
