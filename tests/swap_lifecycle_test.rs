//! Integration tests for the swap store state machine.
//!
//! Run with: cargo test --test swap_lifecycle_test -- --nocapture
//!
//! Prerequisites:
//! - PostgreSQL reachable via DATABASE_URL
//!
//! Each test skips itself when DATABASE_URL is not set, so the suite is safe
//! to run in environments without infrastructure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use scrt_bridge_operator::db::{
    self, InsertOutcome, NewSignature, NewSwap, SwapStatus,
};

static UNIQUE: AtomicU64 = AtomicU64::new(0);

/// Connect and migrate, or None when the environment is not configured.
async fn test_pool() -> Option<sqlx::PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = db::create_pool(&url).await.ok()?;
    db::run_migrations(&pool).await.ok()?;
    Some(pool)
}

/// Unique-enough suffix so tests never collide across runs.
fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    format!(
        "{}-{}-{}",
        std::process::id(),
        nanos,
        UNIQUE.fetch_add(1, Ordering::Relaxed)
    )
}

fn new_swap(tx_hash: &str, sequence: i64) -> NewSwap {
    NewSwap {
        source_tx_hash: tx_hash.to_string(),
        source_network: "ethereum".to_string(),
        source_coin: "0x0000000000000000000000000000000000000000".to_string(),
        source_nonce: sequence,
        destination_network: "secret".to_string(),
        destination_coin: "secret1zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3rcrt0n".to_string(),
        destination_address: "secret1qqqsyqcyq5rqwzqfpg9scrgwpugpzysnpn9nv9".to_string(),
        amount: "100".to_string(),
        sequence,
        unsigned_tx: "{}".to_string(),
    }
}

async fn insert(pool: &sqlx::PgPool, tx_hash: &str, sequence: i64) -> i64 {
    match db::insert_swap(pool, &new_swap(tx_hash, sequence))
        .await
        .expect("insert swap")
    {
        InsertOutcome::Created(id) => id,
        InsertOutcome::Duplicate => panic!("fresh hash reported duplicate"),
    }
}

#[tokio::test]
async fn one_swap_per_source_tx_hash() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let tx_hash = format!("0xuniq-{}", unique_suffix());
    insert(&pool, &tx_hash, 0).await;

    // Re-delivered event: the duplicate is detected, not an error
    let second = db::insert_swap(&pool, &new_swap(&tx_hash, 1))
        .await
        .expect("duplicate insert must not error");
    assert_eq!(second, InsertOutcome::Duplicate);
}

#[tokio::test]
async fn signing_twice_leaves_one_signature() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let tx_hash = format!("0xsig-{}", unique_suffix());
    let swap_id = insert(&pool, &tx_hash, 0).await;

    // The signer's guard: check before insert. Both deliveries of the same
    // swap funnel through this path.
    for _ in 0..2 {
        if !db::signature_exists(&pool, swap_id, "operator-1")
            .await
            .expect("exists check")
        {
            db::insert_signature(
                &pool,
                &NewSignature {
                    swap_id,
                    signer: "operator-1".to_string(),
                    signed_tx: "sig-blob".to_string(),
                },
            )
            .await
            .expect("insert signature");
        }
    }

    let count = db::count_signatures(&pool, swap_id).await.expect("count");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn threshold_promotion_commits_exactly_once() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let tx_hash = format!("0xthr-{}", unique_suffix());
    let swap_id = insert(&pool, &tx_hash, 0).await;

    for signer in ["operator-1", "operator-2"] {
        db::insert_signature(
            &pool,
            &NewSignature {
                swap_id,
                signer: signer.to_string(),
                signed_tx: "sig-blob".to_string(),
            },
        )
        .await
        .expect("insert signature");
    }
    assert_eq!(db::count_signatures(&pool, swap_id).await.unwrap(), 2);

    // Two managers race on the same observation; one commits.
    let first = db::update_swap_status(&pool, swap_id, SwapStatus::Unsigned, SwapStatus::Signed)
        .await
        .unwrap();
    let second = db::update_swap_status(&pool, swap_id, SwapStatus::Unsigned, SwapStatus::Signed)
        .await
        .unwrap();
    assert!(first);
    assert!(!second);
}

#[tokio::test]
async fn broadcast_failure_demotes_later_sequences() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let suffix = unique_suffix();
    let mut ids = Vec::new();
    for sequence in 1..=3 {
        let id = insert(&pool, &format!("0xord-{}-{}", sequence, suffix), sequence).await;
        db::update_swap_status(&pool, id, SwapStatus::Unsigned, SwapStatus::Signed)
            .await
            .unwrap();
        ids.push(id);
    }

    // Sequence 1 fails to broadcast; 2 and 3 must not be attempted.
    assert!(
        db::update_swap_status(&pool, ids[0], SwapStatus::Signed, SwapStatus::Failed)
            .await
            .unwrap()
    );
    for &id in &ids[1..] {
        assert!(
            db::update_swap_status(&pool, id, SwapStatus::Signed, SwapStatus::Retry)
                .await
                .unwrap()
        );
    }

    for (&id, expected) in ids.iter().zip(["failed", "retry", "retry"]) {
        let swap = db::get_swap(&pool, id).await.unwrap().unwrap();
        assert_eq!(swap.status, expected);
    }
}

#[tokio::test]
async fn terminal_states_are_sticky() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let tx_hash = format!("0xterm-{}", unique_suffix());
    let swap_id = insert(&pool, &tx_hash, 0).await;

    db::update_swap_status(&pool, swap_id, SwapStatus::Unsigned, SwapStatus::Signed)
        .await
        .unwrap();
    db::mark_swap_submitted(&pool, swap_id, "DESTHASH").await.unwrap();
    assert!(
        db::update_swap_status(&pool, swap_id, SwapStatus::Submitted, SwapStatus::Confirmed)
            .await
            .unwrap()
    );

    // Every conditional transition out of a non-matching state is a no-op.
    assert!(
        !db::update_swap_status(&pool, swap_id, SwapStatus::Submitted, SwapStatus::Retry)
            .await
            .unwrap()
    );
    assert!(
        !db::update_swap_status(&pool, swap_id, SwapStatus::Unsigned, SwapStatus::Failed)
            .await
            .unwrap()
    );

    let swap = db::get_swap(&pool, swap_id).await.unwrap().unwrap();
    assert_eq!(swap.status, "confirmed");
}

#[tokio::test]
async fn requeue_purges_signatures_and_raises_sequence() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let suffix = unique_suffix();
    let tx_hash = format!("0xrq-{}", suffix);
    let old_sequence = 5;
    let swap_id = insert(&pool, &tx_hash, old_sequence).await;

    db::insert_signature(
        &pool,
        &NewSignature {
            swap_id,
            signer: "operator-1".to_string(),
            signed_tx: "sig-blob".to_string(),
        },
    )
    .await
    .unwrap();

    db::update_swap_status(&pool, swap_id, SwapStatus::Unsigned, SwapStatus::Signed)
        .await
        .unwrap();
    db::mark_swap_submitted(&pool, swap_id, "DESTHASH").await.unwrap();
    // Cooldown elapsed without the tx appearing
    assert!(
        db::update_swap_status(&pool, swap_id, SwapStatus::Submitted, SwapStatus::Retry)
            .await
            .unwrap()
    );

    // The leader's requeue path
    db::delete_signatures(&pool, swap_id).await.unwrap();
    let seq_key = format!("seq:test-{}", suffix);
    let new_sequence = db::allocate_sequence_at_least(&pool, &seq_key, old_sequence + 1)
        .await
        .unwrap();
    assert!(new_sequence > old_sequence);
    assert!(
        db::requeue_swap(&pool, swap_id, new_sequence, "{\"rebuilt\":true}")
            .await
            .unwrap()
    );

    let swap = db::get_swap(&pool, swap_id).await.unwrap().unwrap();
    assert_eq!(swap.status, "unsigned");
    assert!(swap.sequence > old_sequence);
    assert_eq!(swap.destination_tx_hash, None);
    assert_eq!(db::count_signatures(&pool, swap_id).await.unwrap(), 0);
}

#[tokio::test]
async fn duplicate_confirmation_delivery_is_a_noop() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let tx_hash = format!("0xdup-{}", unique_suffix());
    let swap_id = insert(&pool, &tx_hash, 0).await;

    db::update_swap_status(&pool, swap_id, SwapStatus::Unsigned, SwapStatus::Signed)
        .await
        .unwrap();
    db::mark_swap_submitted(&pool, swap_id, "DESTHASH").await.unwrap();

    // First withdraw event finalizes
    assert!(
        db::update_swap_status(&pool, swap_id, SwapStatus::Submitted, SwapStatus::Confirmed)
            .await
            .unwrap()
    );
    let first = db::get_swap(&pool, swap_id).await.unwrap().unwrap();

    // Re-delivered event: the confirmer's guard sees a finalized swap
    assert!(
        !db::update_swap_status(&pool, swap_id, SwapStatus::Submitted, SwapStatus::Confirmed)
            .await
            .unwrap()
    );
    let second = db::get_swap(&pool, swap_id).await.unwrap().unwrap();
    assert_eq!(first.status, second.status);
    assert_eq!(first.updated_on, second.updated_on);
}

#[tokio::test]
async fn trackers_initialize_and_advance_monotonically() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let key = format!("eth-block:test-{}", unique_suffix());

    // Lazy creation at -1; concurrent get-or-create converges on one row
    let tracker = db::get_or_create_tracker(&pool, &key).await.unwrap();
    assert_eq!(tracker.nonce, -1);
    let tracker = db::get_or_create_tracker(&pool, &key).await.unwrap();
    assert_eq!(tracker.nonce, -1);

    db::update_last_processed(&pool, &key, 10).await.unwrap();
    assert_eq!(db::last_processed(&pool, &key).await.unwrap(), 10);

    // A stale writer cannot move the cursor backward
    db::update_last_processed(&pool, &key, 7).await.unwrap();
    assert_eq!(db::last_processed(&pool, &key).await.unwrap(), 10);

    // Explicit resync may
    db::force_set_tracker(&pool, &key, 4).await.unwrap();
    assert_eq!(db::last_processed(&pool, &key).await.unwrap(), 4);
}

#[tokio::test]
async fn sequence_allocation_is_dense_and_starts_at_zero() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let key = format!("seq:test-{}", unique_suffix());
    assert_eq!(db::allocate_sequence(&pool, &key).await.unwrap(), 0);
    assert_eq!(db::allocate_sequence(&pool, &key).await.unwrap(), 1);
    assert_eq!(db::allocate_sequence(&pool, &key).await.unwrap(), 2);
}
