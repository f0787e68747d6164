use medichain_ledger::{
    Block, ChainVerification, DuckDbLedgerStore, GENESIS_HASH, Ledger, LedgerStore,
    MemoryLedgerStore, NewBlock, verify_chain, verify_linkage,
};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn memory_ledger() -> Ledger {
    Ledger::new(Arc::new(MemoryLedgerStore::new()))
}

fn append_n(ledger: &Ledger, n: usize) -> Vec<Block> {
    (0..n)
        .map(|i| {
            ledger
                .append_block(NewBlock::new(
                    format!("doctor-{}", i % 3),
                    format!("patient-{}", i % 2),
                    format!("cid-{i}"),
                    format!("data-hash-{i}"),
                ))
                .unwrap()
        })
        .collect()
}

// ── Chain integrity ──

#[test]
fn fresh_chain_verifies() {
    let ledger = memory_ledger();
    append_n(&ledger, 8);

    let expected = ChainVerification {
        valid: true,
        total_blocks: 8,
        first_broken_block_id: None,
    };
    assert_eq!(ledger.verify_chain().unwrap(), expected);
    assert_eq!(ledger.verify_linkage().unwrap(), expected);
}

#[test]
fn empty_ledger_verifies() {
    let ledger = memory_ledger();
    let result = ledger.verify_chain().unwrap();
    assert!(result.valid);
    assert_eq!(result.total_blocks, 0);
    assert_eq!(result.first_broken_block_id, None);
}

#[test]
fn corrupted_previous_hash_reported_at_exact_block() {
    let ledger = memory_ledger();
    let blocks = append_n(&ledger, 6);

    for k in 0..blocks.len() {
        let mut tampered = blocks.clone();
        tampered[k].previous_hash = "f".repeat(64);

        let strict = verify_chain(&tampered);
        assert!(!strict.valid);
        assert_eq!(strict.first_broken_block_id, Some(blocks[k].id), "k = {k}");

        // Lenient linkage has nothing to compare the first block against.
        let lenient = verify_linkage(&tampered);
        if k == 0 {
            assert!(lenient.valid);
        } else {
            assert_eq!(lenient.first_broken_block_id, Some(blocks[k].id), "k = {k}");
        }
    }
}

#[test]
fn corrupted_hash_value_reported_at_exact_block() {
    let ledger = memory_ledger();
    let blocks = append_n(&ledger, 6);

    for k in 0..blocks.len() {
        let mut tampered = blocks.clone();
        tampered[k].hash_value = "0".repeat(64);

        // Block k fails recomputation before block k + 1 fails linkage.
        assert_eq!(
            verify_chain(&tampered).first_broken_block_id,
            Some(blocks[k].id),
            "k = {k}"
        );
    }
}

#[test]
fn edited_block_reported_through_ledger() {
    let ledger = memory_ledger();
    let mut blocks = append_n(&ledger, 5);
    blocks[2].content_ref = "cid-swapped".to_string();

    let reloaded = Ledger::new(Arc::new(MemoryLedgerStore::with_blocks(blocks)));
    assert_eq!(reloaded.verify_chain().unwrap().first_broken_block_id, Some(3));
    assert!(reloaded.verify_linkage().unwrap().valid);
}

#[test]
fn consistently_rehashed_suffix_still_detected_by_linkage() {
    let ledger = memory_ledger();
    let mut blocks = append_n(&ledger, 4);

    // Rewrite block 2 and recompute its hash so it is self-consistent.
    blocks[1].data_hash = "forged".to_string();
    blocks[1].hash_value = blocks[1].recompute_hash();

    assert_eq!(verify_linkage(&blocks).first_broken_block_id, Some(blocks[2].id));
    assert_eq!(verify_chain(&blocks).first_broken_block_id, Some(blocks[2].id));
}

// ── Concurrency ──

#[test]
fn concurrent_appends_never_fork() {
    let ledger = Arc::new(memory_ledger());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for i in 0..25 {
                    ledger
                        .append_block(NewBlock::new(
                            format!("doctor-{t}"),
                            "patient",
                            format!("cid-{t}-{i}"),
                            "h",
                        ))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let blocks = ledger.all_blocks().unwrap();
    assert_eq!(blocks.len(), 200);

    let previous: HashSet<&str> = blocks.iter().map(|b| b.previous_hash.as_str()).collect();
    assert_eq!(previous.len(), blocks.len(), "two blocks share a previous_hash");
    assert!(ledger.verify_chain().unwrap().valid);
}

#[test]
fn ledgers_sharing_a_duckdb_store_never_fork() {
    let store = DuckDbLedgerStore::open_in_memory().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let ledger = Ledger::new(Arc::new(store.clone()));
            thread::spawn(move || {
                for i in 0..20 {
                    ledger
                        .append_block(NewBlock::new(
                            format!("doctor-{t}"),
                            "patient",
                            format!("cid-{t}-{i}"),
                            "h",
                        ))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let ledger = Ledger::new(Arc::new(store));
    let blocks = ledger.all_blocks().unwrap();
    assert_eq!(blocks.len(), 80);

    let previous: HashSet<&str> = blocks.iter().map(|b| b.previous_hash.as_str()).collect();
    assert_eq!(previous.len(), blocks.len(), "two blocks share a previous_hash");
    assert!(ledger.verify_chain().unwrap().valid);
}

// ── Queries ──

#[test]
fn participant_queries_are_ordered_subsets() {
    let ledger = memory_ledger();
    append_n(&ledger, 6);

    let patient: Vec<i64> = ledger
        .blocks_for_patient("patient-0")
        .unwrap()
        .iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(patient, vec![1, 3, 5]);

    let doctor: Vec<i64> = ledger
        .blocks_for_doctor("doctor-1")
        .unwrap()
        .iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(doctor, vec![2, 5]);

    let record = ledger.blocks_for_record("cid-4").unwrap();
    assert_eq!(record.len(), 1);
    assert_eq!(record[0].data_hash, "data-hash-4");
}

// ── DuckDB persistence ──

#[test]
fn duckdb_in_memory_chain_verifies() {
    let ledger = Ledger::new(Arc::new(DuckDbLedgerStore::open_in_memory().unwrap()));
    let blocks = append_n(&ledger, 5);

    assert_eq!(blocks[0].previous_hash, GENESIS_HASH);
    assert_eq!(blocks.iter().map(|b| b.id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    assert_eq!(ledger.all_blocks().unwrap(), blocks);
    assert!(ledger.verify_chain().unwrap().valid);
}

#[test]
fn duckdb_chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.duckdb");

    let written = {
        let ledger = Ledger::new(Arc::new(DuckDbLedgerStore::open(&path).unwrap()));
        append_n(&ledger, 3)
    };

    let ledger = Ledger::new(Arc::new(DuckDbLedgerStore::open(&path).unwrap()));
    assert_eq!(ledger.all_blocks().unwrap(), written);

    let next = ledger
        .append_block(NewBlock::new("doctor-9", "patient-9", "cid-9", "h"))
        .unwrap();
    assert_eq!(next.id, 4);
    assert_eq!(next.previous_hash, written[2].hash_value);
    assert!(ledger.verify_chain().unwrap().valid);
}

#[test]
fn failed_open_leaves_the_wal_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.duckdb");
    let wal = dir.path().join("ledger.duckdb.wal");
    std::fs::write(&path, b"not a duckdb database file").unwrap();
    std::fs::write(&wal, b"pending ledger writes").unwrap();

    assert!(DuckDbLedgerStore::open(&path).is_err());
    assert_eq!(std::fs::read(&wal).unwrap(), b"pending ledger writes");
}

#[test]
fn duckdb_row_edit_detected_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.duckdb");

    {
        let ledger = Ledger::new(Arc::new(DuckDbLedgerStore::open(&path).unwrap()));
        append_n(&ledger, 4);
    }
    {
        let conn = duckdb::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE blocks SET data_hash = 'rewritten' WHERE id = 3",
            duckdb::params![],
        )
        .unwrap();
    }

    let ledger = Ledger::new(Arc::new(DuckDbLedgerStore::open(&path).unwrap()));
    assert_eq!(ledger.verify_chain().unwrap().first_broken_block_id, Some(3));
}

#[test]
fn duckdb_filters_match_memory_store() {
    let memory = MemoryLedgerStore::new();
    let duck = DuckDbLedgerStore::open_in_memory().unwrap();

    let mem_ledger = Ledger::new(Arc::new(memory));
    let duck_ledger = Ledger::new(Arc::new(duck.clone()));
    append_n(&mem_ledger, 6);
    append_n(&duck_ledger, 6);

    let ids = |blocks: Vec<Block>| blocks.into_iter().map(|b| b.id).collect::<Vec<_>>();
    assert_eq!(
        ids(duck_ledger.blocks_for_patient("patient-1").unwrap()),
        ids(mem_ledger.blocks_for_patient("patient-1").unwrap())
    );
    assert_eq!(
        ids(duck_ledger.blocks_for_doctor("doctor-2").unwrap()),
        ids(mem_ledger.blocks_for_doctor("doctor-2").unwrap())
    );
    assert_eq!(duck.tail().unwrap().map(|b| b.id), Some(6));
}
