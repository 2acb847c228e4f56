use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use fsverify_config::FileConfig;
use fsverify_core::{CheckOutcome, Directory, OsRandom};
use tempfile::TempDir;

#[test]
fn stress_test_shared_directory() {
    // Several workers create, write and check files in one directory while
    // contending on the chain and on each other's file locks.
    const THREAD_COUNT: usize = 8;
    const FILES_PER_THREAD: usize = 16;
    const PASSES: usize = 3;

    let temp = TempDir::new().unwrap();
    let dir = Directory::create(temp.path().join("shared")).unwrap();
    let config = FileConfig::new(10, 13, false);

    println!("Starting {} threads, {} files each...", THREAD_COUNT, FILES_PER_THREAD);
    let start = Instant::now();

    let barrier = Arc::new(Barrier::new(THREAD_COUNT));
    let mut handles = Vec::new();

    for _ in 0..THREAD_COUNT {
        let d = Arc::clone(&dir);
        let b = Arc::clone(&barrier);

        handles.push(thread::spawn(move || {
            b.wait();

            let mut mine = Vec::new();
            for _ in 0..FILES_PER_THREAD {
                let file = d.create_file(&config, &mut OsRandom).unwrap();
                file.lock().unwrap().write(&config).unwrap();
                mine.push(file);
            }

            // Check everything currently in the chain, including other workers' files.
            for _ in 0..PASSES {
                for file in d.files().unwrap() {
                    if let Some(mut guard) = file.try_lock().unwrap() {
                        if guard.state().created_at.is_some() {
                            let outcome = guard.check().unwrap();
                            assert!(matches!(outcome, CheckOutcome::Clean { .. }), "{outcome:?}");
                        }
                    }
                }
            }

            // Nobody may still be checking a file we are about to delete
            b.wait();

            // Delete half of our own files individually
            for file in mine.iter().step_by(2) {
                file.lock().unwrap().delete().unwrap();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(dir.len().unwrap(), THREAD_COUNT * FILES_PER_THREAD / 2);

    let summary = dir.delete_all().unwrap();
    assert_eq!(summary.removed, THREAD_COUNT * FILES_PER_THREAD / 2);
    assert_eq!(summary.refused, 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    println!("Concurrent test finished in {:?}", start.elapsed());
}
