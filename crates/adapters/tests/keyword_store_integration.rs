//! Integration tests for the SQLite keyword embedding store.

use kwcache_adapters::store::{
    CorruptReason, InvalidEmbeddingReason, KeywordEmbeddingStore, SCHEMA_VERSION, StoreError,
    encode_embedding,
};
use kwcache_ports::{EmbeddingArray, InsertSummary, KeywordEntry, KeywordStorePort};
use kwcache_shared::{ErrorCode, ErrorEnvelope};
use proptest::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{SystemTime, UNIX_EPOCH};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

fn temp_db(prefix: &str) -> PathBuf {
    temp_dir(prefix).join("nested").join("embeddings.db")
}

#[test]
fn entries_survive_close_and_reopen() -> TestResult {
    let path = temp_db("kwcache-reopen");

    let mut store = KeywordEmbeddingStore::open(&path)?;
    let summary = store.add(&[
        KeywordEntry::new("apple", vec![0.1_f32, 0.2, 0.3]),
        KeywordEntry::new("banana", vec![0.4_f32, 0.5, 0.6]),
    ])?;
    assert_eq!(summary, InsertSummary { inserted: 2, skipped: 0 });
    store.close()?;

    let store = KeywordEmbeddingStore::open(&path)?;
    let found = store.get(&["apple", "banana", "cherry"])?;
    assert_eq!(found.len(), 2);
    assert_eq!(found["apple"].as_slice(), &[0.1_f32, 0.2, 0.3]);
    assert_eq!(found["banana"].as_slice(), &[0.4_f32, 0.5, 0.6]);
    assert!(!found.contains_key("cherry"));
    assert_eq!(store.count()?, 2);
    Ok(())
}

#[test]
fn first_write_wins() -> TestResult {
    let mut store = KeywordEmbeddingStore::open(temp_db("kwcache-first-write"))?;
    store.add(&[KeywordEntry::new("apple", vec![1.0_f32, 2.0])])?;

    let summary = store.add(&[
        KeywordEntry::new("apple", vec![9.0_f32, 9.0, 9.0]),
        KeywordEntry::new("pear", vec![3.0_f32]),
        KeywordEntry::new("pear", vec![4.0_f32]),
    ])?;
    assert_eq!(summary, InsertSummary { inserted: 1, skipped: 2 });

    let found = store.get(&["apple", "pear"])?;
    assert_eq!(found["apple"].as_slice(), &[1.0_f32, 2.0]);
    assert_eq!(found["pear"].as_slice(), &[3.0_f32]);
    Ok(())
}

#[test]
fn empty_inputs_are_no_ops() -> TestResult {
    let mut store = KeywordEmbeddingStore::open(temp_db("kwcache-empty"))?;
    let none: [&str; 0] = [];
    assert!(store.get(&none)?.is_empty());
    assert_eq!(store.add(&[])?, InsertSummary::default());
    assert_eq!(store.count()?, 0);
    Ok(())
}

#[test]
fn duplicate_lookups_and_partial_hits() -> TestResult {
    let mut store = KeywordEmbeddingStore::open(temp_db("kwcache-partial"))?;
    store.add(&[KeywordEntry::new("apple", vec![0.5_f32])])?;

    let found = store.get(&["apple", "apple", "kiwi", "apple"])?;
    assert_eq!(found.keys().collect::<Vec<_>>(), vec!["apple"]);
    Ok(())
}

#[test]
fn invalid_entry_mid_batch_leaves_store_unchanged() -> TestResult {
    let mut store = KeywordEmbeddingStore::open(temp_db("kwcache-reject"))?;
    store.add(&[KeywordEntry::new("seed", vec![0.0_f32])])?;

    for invalid in [
        EmbeddingArray::from(vec![1.0_f64, 2.0]),
        EmbeddingArray::from(vec![1_i32, 2]),
        EmbeddingArray::from(vec![1_i64]),
    ] {
        let expected = invalid.element_type();
        let outcome = store.add(&[
            KeywordEntry::new("apple", vec![1.0_f32]),
            KeywordEntry::new("bad", invalid),
            KeywordEntry::new("cherry", vec![2.0_f32]),
        ]);
        match outcome {
            Err(StoreError::InvalidEmbedding { keyword, reason }) => {
                assert_eq!(keyword, "bad");
                assert_eq!(reason, InvalidEmbeddingReason::WrongElementType(expected));
            },
            other => return Err(format!("expected InvalidEmbedding, got {other:?}").into()),
        }
    }

    assert_eq!(store.count()?, 1);
    assert!(store.get(&["apple", "cherry"])?.is_empty());
    Ok(())
}

#[test]
fn use_after_close_is_reported() -> TestResult {
    let mut store = KeywordEmbeddingStore::open(temp_db("kwcache-closed"))?;
    store.close()?;

    let error = store.get(&["apple"]).err();
    assert!(matches!(error, Some(StoreError::UseAfterClose { operation: "get" })));

    let envelope = KeywordStorePort::add_many(&mut store, &[KeywordEntry::new("a", vec![1.0_f32])])
        .err()
        .ok_or("add after close should fail")?;
    assert_eq!(envelope.code, ErrorCode::new("store", "closed"));
    Ok(())
}

#[test]
fn corrupt_blob_length_is_reported() -> TestResult {
    let path = temp_db("kwcache-corrupt");
    KeywordEmbeddingStore::open(&path)?.close()?;

    let conn = rusqlite_connection(&path)?;
    conn.execute(
        "INSERT INTO keyword_embeddings (keyword, embedding) VALUES (?1, ?2)",
        ("broken", vec![0u8; 7]),
    )?;
    drop(conn);

    let store = KeywordEmbeddingStore::open(&path)?;
    match store.get(&["broken"]) {
        Err(StoreError::CorruptEntry { keyword, reason }) => {
            assert_eq!(keyword, "broken");
            assert_eq!(reason, CorruptReason::Length(7));
        },
        other => return Err(format!("expected CorruptEntry, got {other:?}").into()),
    }
    Ok(())
}

#[test]
fn legacy_files_are_adopted_and_newer_schemas_rejected() -> TestResult {
    let legacy = temp_db("kwcache-legacy");
    std::fs::create_dir_all(legacy.parent().ok_or("no parent")?)?;
    let conn = rusqlite_connection(&legacy)?;
    conn.execute_batch(
        "CREATE TABLE keyword_embeddings (keyword TEXT PRIMARY KEY, embedding BLOB);",
    )?;
    conn.execute(
        "INSERT INTO keyword_embeddings (keyword, embedding) VALUES (?1, ?2)",
        ("apple", encode_embedding(&[0.25, 0.75])),
    )?;
    drop(conn);

    let store = KeywordEmbeddingStore::open(&legacy)?;
    assert_eq!(store.get(&["apple"])?["apple"].as_slice(), &[0.25_f32, 0.75]);
    drop(store);
    let version: i64 =
        rusqlite_connection(&legacy)?.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    assert_eq!(version, SCHEMA_VERSION);

    let newer = temp_db("kwcache-newer");
    KeywordEmbeddingStore::open(&newer)?.close()?;
    rusqlite_connection(&newer)?.execute_batch("PRAGMA user_version = 99;")?;
    match KeywordEmbeddingStore::open(&newer) {
        Err(StoreError::UnsupportedSchema { found, supported }) => {
            assert_eq!(found, 99);
            assert_eq!(supported, SCHEMA_VERSION);
        },
        other => return Err(format!("expected UnsupportedSchema, got {other:?}").into()),
    }
    Ok(())
}

#[test]
fn scoped_store_closes_and_propagates_body_errors() -> TestResult {
    let path = temp_db("kwcache-scoped");
    let inserted = KeywordEmbeddingStore::scoped(&path, |store| {
        store
            .add(&[KeywordEntry::new("apple", vec![1.0_f32])])
            .map(|summary| summary.inserted)
    })?;
    assert_eq!(inserted, 1);

    let failed: Result<(), ErrorEnvelope> = KeywordEmbeddingStore::scoped(&path, |store| {
        store.add(&[KeywordEntry::new("", vec![1.0_f32])])?;
        Ok(())
    });
    let envelope = failed.err().ok_or("empty keyword should fail")?;
    assert_eq!(envelope.code, ErrorCode::new("store", "invalid_embedding"));
    Ok(())
}

#[test]
fn concurrent_disjoint_writers_do_not_collide() -> TestResult {
    let path = temp_db("kwcache-concurrent");
    KeywordEmbeddingStore::open(&path)?.close()?;

    let handles: Vec<_> = (0..4)
        .map(|writer| {
            let path = path.clone();
            std::thread::spawn(move || -> Result<usize, StoreError> {
                let mut store = KeywordEmbeddingStore::open(&path)?;
                let entries: Vec<KeywordEntry> = (0..25)
                    .map(|index| KeywordEntry::new(format!("w{writer}-{index}"), vec![1.0_f32]))
                    .collect();
                Ok(store.add(&entries)?.inserted)
            })
        })
        .collect();

    let mut total = 0;
    for handle in handles {
        total += handle.join().map_err(|_| "writer panicked")??;
    }
    assert_eq!(total, 100);
    assert_eq!(KeywordEmbeddingStore::open(&path)?.count()?, 100);
    Ok(())
}

const BATCHES: usize = 20;
const BATCH_SIZE: usize = 40;

fn batch_keywords(batch: usize) -> Vec<String> {
    (0..BATCH_SIZE).map(|index| format!("b{batch}-{index}")).collect()
}

fn batch_vector(batch: usize, index: usize) -> Vec<u32> {
    let nan_payload = 0x7fc0_0000 | u32::try_from(index).unwrap_or(0);
    vec![
        (batch as f32).to_bits(),
        (index as f32).to_bits(),
        nan_payload,
    ]
}

#[test]
fn readers_never_observe_a_partially_committed_batch() -> TestResult {
    let path = temp_db("kwcache-read-during-write");
    KeywordEmbeddingStore::open(&path)?.close()?;
    let start = Arc::new(Barrier::new(2));
    let writer_done = Arc::new(AtomicBool::new(false));

    let writer = {
        let path = path.clone();
        let start = Arc::clone(&start);
        let writer_done = Arc::clone(&writer_done);
        std::thread::spawn(move || -> Result<(), StoreError> {
            let mut store = KeywordEmbeddingStore::open(&path)?;
            start.wait();
            for batch in 0..BATCHES {
                let entries: Vec<KeywordEntry> = batch_keywords(batch)
                    .into_iter()
                    .enumerate()
                    .map(|(index, keyword)| {
                        let values: Vec<f32> = batch_vector(batch, index)
                            .into_iter()
                            .map(f32::from_bits)
                            .collect();
                        KeywordEntry::new(keyword, values)
                    })
                    .collect();
                store.add(&entries)?;
            }
            writer_done.store(true, Ordering::SeqCst);
            Ok(())
        })
    };

    let reader = {
        let path = path.clone();
        let start = Arc::clone(&start);
        let writer_done = Arc::clone(&writer_done);
        std::thread::spawn(move || -> Result<usize, String> {
            let store = KeywordEmbeddingStore::open(&path).map_err(|error| error.to_string())?;
            start.wait();
            let mut observations = 0;
            loop {
                let finished = writer_done.load(Ordering::SeqCst);
                for batch in 0..BATCHES {
                    let keywords = batch_keywords(batch);
                    let found = store.get(&keywords).map_err(|error| error.to_string())?;
                    if found.is_empty() {
                        continue;
                    }
                    if found.len() != BATCH_SIZE {
                        return Err(format!(
                            "batch {batch} seen with {} of {BATCH_SIZE} entries",
                            found.len()
                        ));
                    }
                    for (index, keyword) in keywords.iter().enumerate() {
                        let bits: Vec<u32> = found[keyword]
                            .as_slice()
                            .iter()
                            .map(|value| value.to_bits())
                            .collect();
                        if bits != batch_vector(batch, index) {
                            return Err(format!("{keyword} read back as {bits:?}"));
                        }
                    }
                    observations += 1;
                }
                if finished {
                    return Ok(observations);
                }
            }
        })
    };

    writer.join().map_err(|_| "writer panicked")??;
    let observations = reader.join().map_err(|_| "reader panicked")??;
    assert!(observations >= BATCHES, "final pass must see every batch");
    assert_eq!(
        KeywordEmbeddingStore::open(&path)?.count()?,
        (BATCHES * BATCH_SIZE) as u64
    );
    Ok(())
}

fn rusqlite_connection(path: &std::path::Path) -> rusqlite::Result<rusqlite::Connection> {
    rusqlite::Connection::open(path)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn stored_vectors_are_bit_exact(bits in proptest::collection::vec(any::<u32>(), 1..32)) {
        let values: Vec<f32> = bits.iter().copied().map(f32::from_bits).collect();
        let store = KeywordEmbeddingStore::open(":memory:");
        prop_assert!(store.is_ok());
        let Ok(mut store) = store else { return Ok(()) };

        let added = store.add(&[KeywordEntry::new("kw", values)]);
        prop_assert!(added.is_ok());
        let found = store.get(&["kw"]);
        prop_assert!(found.is_ok());
        let found = found.unwrap_or_default();
        let stored: Vec<u32> = found
            .get("kw")
            .map(|vector| vector.as_slice().iter().map(|value| value.to_bits()).collect())
            .unwrap_or_default();
        prop_assert_eq!(stored, bits);
    }
}
