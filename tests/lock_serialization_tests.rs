#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use sftp_fs::fs::SftpFs;
use sftp_fs::fs::inode::ROOT_INO;

use common::{MemBackend, mount};

/// Hammer the shared filesystem from many threads through its one lock and
/// assert no two operations ever overlap.
#[test]
fn operations_through_the_global_lock_never_overlap() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;

    let backend = MemBackend::new();
    backend.add_file("/remote/shared", b"seed");
    let fs: Arc<Mutex<SftpFs<MemBackend>>> = Arc::new(Mutex::new(mount(&backend)));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let fs = Arc::clone(&fs);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            std::thread::spawn(move || {
                for round in 0..ROUNDS {
                    let mut fs = fs.lock();
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);

                    let entry = fs.lookup(ROOT_INO, "shared").unwrap();
                    let fh = fs.open(entry.ino).unwrap();
                    fs.write(entry.ino, fh, 0, format!("{t}:{round}").as_bytes())
                        .unwrap();
                    let data = fs.read(entry.ino, fh, 0, 64).unwrap();
                    assert!(!data.is_empty());
                    fs.release(fh).unwrap();

                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(fs.lock().handle_count(), 0);
}

/// Identifier allocation stays strictly monotonic even when requests arrive
/// from many threads.
#[test]
fn identifiers_stay_monotonic_under_contention() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 25;

    let backend = MemBackend::new();
    let fs: Arc<Mutex<SftpFs<MemBackend>>> = Arc::new(Mutex::new(mount(&backend)));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let fs = Arc::clone(&fs);
            std::thread::spawn(move || {
                let mut last_ino = 0;
                let mut last_fh = 0;
                for round in 0..ROUNDS {
                    let mut fs = fs.lock();
                    let (entry, fh) = fs.create(ROOT_INO, &format!("f-{t}-{round}"), 0o644).unwrap();
                    assert!(entry.ino > last_ino);
                    assert!(fh > last_fh);
                    last_ino = entry.ino;
                    last_fh = fh;
                    fs.release(fh).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let mut fs = fs.lock();
    let dir_fh = fs.opendir(ROOT_INO).unwrap();
    assert_eq!(fs.readdir(ROOT_INO, dir_fh, 0).unwrap().len(), THREADS * ROUNDS);
}
