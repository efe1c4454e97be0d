//! Concurrent writer and reader behaviour on a shared key

use serde_json::json;
use stagecache::{CacheKey, CacheManager, Stage};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

fn shared_key() -> CacheKey {
    CacheKey::new("compilation", "f".repeat(64), Stage::Code).unwrap()
}

/// Scenario: sixteen threads race to put distinct payloads at the same
/// key. Exactly one publication wins, every write succeeds, and no
/// `tmp_*` or `backup_*` debris survives.
#[test]
fn concurrent_writers_to_one_key() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(CacheManager::new(dir.path(), 1024 * 1024 * 1024).unwrap());
    let key = shared_key();

    let threads: Vec<_> = (0..16)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            std::thread::spawn(move || {
                let payload = serde_json::to_vec(&json!({"value": i})).unwrap();
                manager.put(&key, &payload, BTreeMap::new()).unwrap();
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    // The surviving payload is one of the sixteen
    let payload = manager.get(&key).unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    let winner = value["value"].as_u64().unwrap();
    assert!(winner < 16);

    // All sixteen writes completed
    let stats = manager.stats().unwrap();
    assert_eq!(stats.metrics.writes, 16);

    // Exactly one stage directory with one data file, no debris
    let key_dir = key.key_dir(dir.path());
    let children: Vec<String> = std::fs::read_dir(&key_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != ".lock")
        .collect();
    assert_eq!(children, vec!["code".to_string()]);
    assert!(key_dir.join("code").join("data").exists());
    assert!(key_dir.join("code").join("metadata").exists());
    assert!(key_dir.join("code").join("last_access").exists());
}

/// Scenario: while a writer republishes large payloads in a loop, a pool
/// of readers hammers the same key. Every successful read parses cleanly
/// and carries the magic marker, which a torn or mixed read would break.
#[test]
fn concurrent_reads_under_writer() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(CacheManager::new(dir.path(), 10 * 1024 * 1024 * 1024).unwrap());
    let key = shared_key();

    let filler = "x".repeat(1024 * 1024);
    let payload_for = move |round: usize| {
        serde_json::to_vec(&json!({
            "magic": "stagecache",
            "round": round,
            "filler": filler,
        }))
        .unwrap()
    };

    // Seed so early readers can hit
    manager.put(&key, &payload_for(0), BTreeMap::new()).unwrap();

    let writer_done = Arc::new(AtomicBool::new(false));
    let successful_reads = Arc::new(AtomicUsize::new(0));

    let writer = {
        let manager = Arc::clone(&manager);
        let key = key.clone();
        let writer_done = Arc::clone(&writer_done);
        std::thread::spawn(move || {
            for round in 1..=10 {
                manager.put(&key, &payload_for(round), BTreeMap::new()).unwrap();
            }
            writer_done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..32)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            let writer_done = Arc::clone(&writer_done);
            let successful_reads = Arc::clone(&successful_reads);
            std::thread::spawn(move || {
                loop {
                    let done = writer_done.load(Ordering::Acquire);
                    if let Some(payload) = manager.get(&key).unwrap() {
                        let value: serde_json::Value =
                            serde_json::from_slice(&payload).expect("payload must parse");
                        assert_eq!(value["magic"], "stagecache");
                        assert_eq!(value["filler"].as_str().unwrap().len(), 1024 * 1024);
                        successful_reads.fetch_add(1, Ordering::Relaxed);
                    }
                    if done {
                        break;
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(successful_reads.load(Ordering::Relaxed) > 0);
    let stats = manager.stats().unwrap();
    assert_eq!(stats.metrics.errors, 0);
}

/// Puts to different keys proceed independently and in parallel.
#[test]
fn independent_keys_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(CacheManager::new(dir.path(), 1024 * 1024 * 1024).unwrap());

    let threads: Vec<_> = (0..8)
        .map(|i| {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                let key = CacheKey::new(
                    "compilation",
                    format!("{i:x}").repeat(64),
                    Stage::Inputs,
                )
                .unwrap();
                let payload = serde_json::to_vec(&json!({"worker": i})).unwrap();
                manager.put(&key, &payload, BTreeMap::new()).unwrap();
                assert_eq!(manager.get(&key).unwrap(), Some(payload));
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(manager.stats().unwrap().usage.entry_count, 8);
}
