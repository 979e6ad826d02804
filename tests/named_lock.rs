use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::thread as scoped;
use shelf::lock::{FairLock, FileLock, LocalLock, LockKind, LockState, NamedLock};
use shelf::ShelfError;
use tempfile::TempDir;

const POLL: Duration = Duration::from_millis(5);

fn file_lock(dir: &TempDir) -> FileLock {
    FileLock::create(dir.path().join("resource.lock")).expect("lock file should be created")
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting until {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn create_leaves_existing_lock_file_alone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resource.lock");
    std::fs::write(&path, b"keep me").unwrap();

    let lock = FileLock::create(&path).unwrap();

    assert_eq!(lock.path(), path.as_path());
    assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
}

#[test]
fn shared_flocks_are_held_together() {
    let dir = TempDir::new().unwrap();
    let lock = file_lock(&dir);

    let first = lock.acquire_shared().unwrap();
    let second = lock.acquire_shared().unwrap();
    assert_eq!(first.kind(), LockKind::Shared);
    assert!(!lock.is_unlocked().unwrap());

    lock.release(first).unwrap();
    assert!(!lock.is_unlocked().unwrap());
    lock.release(second).unwrap();
    assert!(lock.is_unlocked().unwrap());
}

#[test]
fn exclusive_flock_keeps_readers_out_until_released() {
    let dir = TempDir::new().unwrap();
    let lock = file_lock(&dir);
    let granted = AtomicBool::new(false);

    let writer = lock.acquire_exclusive().unwrap();
    scoped::scope(|s| {
        s.spawn(|_| {
            let token = lock.acquire_shared().unwrap();
            granted.store(true, Ordering::SeqCst);
            lock.release(token).unwrap();
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!granted.load(Ordering::SeqCst), "reader got in during the exclusive hold");
        lock.release(writer).unwrap();
    })
    .unwrap();

    assert!(granted.load(Ordering::SeqCst));
    assert!(lock.is_unlocked().unwrap());
}

#[test]
fn separate_file_locks_on_one_path_exclude_each_other() {
    let dir = TempDir::new().unwrap();
    // two handles on the same path behave like two processes
    let here = file_lock(&dir);
    let elsewhere = FileLock::new(here.path().to_path_buf());

    let held = here.acquire_exclusive().unwrap();
    let (tx, rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        let token = elsewhere.acquire_exclusive().unwrap();
        tx.send(()).unwrap();
        elsewhere.release(token).unwrap();
    });

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    here.release(held).unwrap();
    rx.recv_timeout(Duration::from_secs(5))
        .expect("second lock should be granted after release");
    waiter.join().unwrap();
}

#[test]
fn missing_lock_file_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let lock = FileLock::new(dir.path().join("nope.lock"));

    match lock.acquire_shared() {
        Err(ShelfError::ResourceUnavailable { path, .. }) => {
            assert_eq!(path, dir.path().join("nope.lock"))
        }
        other => panic!("expected ResourceUnavailable, got {:?}", other),
    }
    assert!(matches!(
        lock.acquire_exclusive(),
        Err(ShelfError::ResourceUnavailable { .. })
    ));
}

#[test]
fn local_lock_tracks_its_state() {
    let lock = LocalLock::new("test");
    assert_eq!(lock.state(), LockState::Unlocked);

    let first = lock.acquire_shared().unwrap();
    let second = lock.acquire_shared().unwrap();
    assert_eq!(lock.state(), LockState::Shared(2));

    lock.release(first).unwrap();
    assert_eq!(lock.state(), LockState::Shared(1));
    lock.release(second).unwrap();
    assert_eq!(lock.state(), LockState::Unlocked);

    let writer = lock.acquire_exclusive().unwrap();
    assert_eq!(writer.kind(), LockKind::Exclusive);
    assert_eq!(lock.state(), LockState::Exclusive);
    lock.release(writer).unwrap();
    assert_eq!(lock.state(), LockState::Unlocked);
}

#[test]
fn local_lock_writer_waits_for_readers() {
    let lock = LocalLock::new("test");
    let reader = lock.acquire_shared().unwrap();

    let (tx, rx) = mpsc::channel();
    let other = lock.clone();
    let writer = thread::spawn(move || {
        let token = other.acquire_exclusive().unwrap();
        tx.send(other.state()).unwrap();
        other.release(token).unwrap();
    });

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    lock.release(reader).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), LockState::Exclusive);
    writer.join().unwrap();
    assert_eq!(lock.state(), LockState::Unlocked);
}

#[test]
fn dropped_local_token_releases_the_lock() {
    let lock = LocalLock::new("test");
    {
        let _token = lock.acquire_exclusive().unwrap();
        assert_eq!(lock.state(), LockState::Exclusive);
    }
    assert_eq!(lock.state(), LockState::Unlocked);
}

#[test]
fn local_token_must_be_released_on_its_own_lock() {
    let lock = LocalLock::new("one");
    let other = LocalLock::new("two");
    let token = lock.acquire_shared().unwrap();

    assert!(matches!(other.release(token), Err(ShelfError::LockRelease(_))));
    assert_eq!(other.state(), LockState::Unlocked);
    assert_eq!(lock.state(), LockState::Unlocked);
}

#[test]
fn writer_flag_is_lowered_once_the_write_lock_is_granted() {
    let lock = FairLock::with_poll_interval(LocalLock::new("test"), POLL);
    assert!(!lock.writer_waiting());

    let token = lock.acquire_write().unwrap();
    assert!(!lock.writer_waiting());
    assert_eq!(lock.inner().state(), LockState::Exclusive);
    lock.release_write(token).unwrap();
    assert_eq!(lock.inner().state(), LockState::Unlocked);
}

#[test]
fn writer_flag_is_lowered_when_acquisition_fails() {
    let dir = TempDir::new().unwrap();
    let lock = FairLock::with_poll_interval(FileLock::new(dir.path().join("gone.lock")), POLL);

    assert!(lock.acquire_write().is_err());
    assert!(!lock.writer_waiting());
}

#[test]
fn releasing_with_the_wrong_kind_still_releases() {
    let lock = FairLock::with_poll_interval(LocalLock::new("test"), POLL);

    let token = lock.acquire_write().unwrap();
    assert!(matches!(lock.release_read(token), Err(ShelfError::LockRelease(_))));
    assert_eq!(lock.inner().state(), LockState::Unlocked);

    let token = lock.acquire_read().unwrap();
    assert!(matches!(lock.release_write(token), Err(ShelfError::LockRelease(_))));
    assert_eq!(lock.inner().state(), LockState::Unlocked);
}

#[test]
fn waiting_writer_holds_back_new_readers() {
    const READERS: usize = 4;
    let dir = TempDir::new().unwrap();
    let lock = Arc::new(FairLock::with_poll_interval(file_lock(&dir), POLL));
    let events = Arc::new(Mutex::new(Vec::new()));

    // an early reader keeps the writer queued
    let early = lock.acquire_read().unwrap();

    let writer = {
        let lock = Arc::clone(&lock);
        let events = Arc::clone(&events);
        thread::spawn(move || {
            let token = lock.acquire_write().unwrap();
            events.lock().unwrap().push("writer acquired");
            thread::sleep(Duration::from_millis(50));
            events.lock().unwrap().push("writer releasing");
            lock.release_write(token).unwrap();
        })
    };
    wait_until("the writer is waiting", || lock.writer_waiting());

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let events = Arc::clone(&events);
            thread::spawn(move || {
                let token = lock.acquire_read().unwrap();
                events.lock().unwrap().push("reader acquired");
                lock.release_read(token).unwrap();
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(100));
    assert!(
        events.lock().unwrap().is_empty(),
        "a new reader got in while the writer was waiting"
    );
    assert!(lock.writer_waiting());

    lock.release_read(early).unwrap();
    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let events = events.lock().unwrap();
    assert_eq!(events.len(), READERS + 2);
    assert_eq!(events[0], "writer acquired");
    assert_eq!(events[1], "writer releasing");
    assert!(events[2..].iter().all(|e| *e == "reader acquired"));
    assert!(!lock.writer_waiting());
}

#[test]
fn reentrant_read_ignores_the_waiting_writer() {
    let dir = TempDir::new().unwrap();
    let lock = Arc::new(FairLock::with_poll_interval(file_lock(&dir), POLL));
    let first = lock.acquire_read().unwrap();

    let writer = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            let token = lock.acquire_write().unwrap();
            lock.release_write(token).unwrap();
        })
    };
    wait_until("the writer is waiting", || lock.writer_waiting());

    let second = lock.acquire_read_reentrant().unwrap();
    assert_eq!(second.kind(), LockKind::Shared);
    lock.release_read(second).unwrap();
    lock.release_read(first).unwrap();
    writer.join().unwrap();
    assert!(lock.inner().is_unlocked().unwrap());
}

#[cfg(unix)]
#[test]
fn unreadable_lock_file_is_permission_denied() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locked.lock");
    std::fs::write(&path, b"").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();

    // root ignores file modes
    if std::fs::OpenOptions::new().read(true).write(true).open(&path).is_ok() {
        return;
    }

    assert!(matches!(
        FileLock::new(&path).acquire_shared(),
        Err(ShelfError::PermissionDenied { .. })
    ));
    assert!(matches!(
        FileLock::create(&path),
        Err(ShelfError::PermissionDenied { .. })
    ));
    let fair = FairLock::with_poll_interval(FileLock::new(&path), POLL);
    assert!(matches!(fair.acquire_write(), Err(ShelfError::PermissionDenied { .. })));
    assert!(!fair.writer_waiting());
}
