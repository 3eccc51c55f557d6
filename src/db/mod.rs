use eyre::{eyre, Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

pub mod models;

pub use models::*;

const SWAP_COLUMNS: &str = "id, source_tx_hash, source_network, source_coin, source_nonce, \
     destination_network, destination_coin, destination_address, amount::TEXT as amount, \
     sequence, unsigned_tx, destination_tx_hash, status, created_on, updated_on";

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Outcome of inserting a swap keyed by source transaction hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(i64),
    /// A swap for this source_tx_hash already exists (re-delivered event)
    Duplicate,
}

/// Insert a new swap. A unique-violation on source_tx_hash is reported as
/// `Duplicate`, never as an error: re-delivered events are expected.
pub async fn insert_swap(pool: &PgPool, swap: &NewSwap) -> Result<InsertOutcome> {
    let result = sqlx::query(
        r#"
        INSERT INTO swaps (source_tx_hash, source_network, source_coin, source_nonce,
            destination_network, destination_coin, destination_address, amount, sequence,
            unsigned_tx)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8::NUMERIC, $9, $10)
        RETURNING id
        "#,
    )
    .bind(&swap.source_tx_hash)
    .bind(&swap.source_network)
    .bind(&swap.source_coin)
    .bind(swap.source_nonce)
    .bind(&swap.destination_network)
    .bind(&swap.destination_coin)
    .bind(&swap.destination_address)
    .bind(&swap.amount)
    .bind(swap.sequence)
    .bind(&swap.unsigned_tx)
    .fetch_one(pool)
    .await;

    match result {
        Ok(row) => Ok(InsertOutcome::Created(row.get("id"))),
        Err(e) => {
            if is_unique_violation(&e) {
                Ok(InsertOutcome::Duplicate)
            } else {
                Err(e).wrap_err("Failed to insert swap")
            }
        }
    }
}

/// Postgres unique_violation (23505)
fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

pub async fn get_swap(pool: &PgPool, id: i64) -> Result<Option<Swap>> {
    let row = sqlx::query_as::<_, Swap>(&format!("SELECT {SWAP_COLUMNS} FROM swaps WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .wrap_err("Failed to get swap by id")?;
    Ok(row)
}

pub async fn get_swap_by_source_tx_hash(pool: &PgPool, tx_hash: &str) -> Result<Option<Swap>> {
    let row = sqlx::query_as::<_, Swap>(&format!(
        "SELECT {SWAP_COLUMNS} FROM swaps WHERE source_tx_hash = $1"
    ))
    .bind(tx_hash)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to get swap by source tx hash")?;
    Ok(row)
}

/// Swaps in a given status, ascending sequence order. Dependent transactions
/// must be handled in creation order, so every scan uses this ordering.
pub async fn get_swaps_by_status(pool: &PgPool, status: SwapStatus) -> Result<Vec<Swap>> {
    let rows = sqlx::query_as::<_, Swap>(&format!(
        "SELECT {SWAP_COLUMNS} FROM swaps WHERE status = $1 ORDER BY sequence ASC"
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await
    .wrap_err("Failed to get swaps by status")?;
    Ok(rows)
}

/// Status scan restricted to one destination network, ascending sequence.
pub async fn get_swaps_by_status_for_destination(
    pool: &PgPool,
    status: SwapStatus,
    destination_network: &str,
) -> Result<Vec<Swap>> {
    let rows = sqlx::query_as::<_, Swap>(&format!(
        "SELECT {SWAP_COLUMNS} FROM swaps \
         WHERE status = $1 AND destination_network = $2 ORDER BY sequence ASC"
    ))
    .bind(status.as_str())
    .bind(destination_network)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to get swaps by status for destination")?;
    Ok(rows)
}

/// Return-leg lookup: the withdraw submission on the EVM side is identified
/// by (source burn nonce, destination token).
pub async fn find_swap_by_nonce_and_coin(
    pool: &PgPool,
    source_nonce: i64,
    destination_coin: &str,
) -> Result<Option<Swap>> {
    let row = sqlx::query_as::<_, Swap>(&format!(
        "SELECT {SWAP_COLUMNS} FROM swaps \
         WHERE source_nonce = $1 AND LOWER(destination_coin) = LOWER($2)"
    ))
    .bind(source_nonce)
    .bind(destination_coin)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to find swap by nonce and coin")?;
    Ok(row)
}

/// Compare-and-swap status transition. Returns true when this caller won the
/// transition; false means another worker moved the swap first (or the swap
/// was never in `from`), and the caller must not assume the transition
/// happened.
pub async fn update_swap_status(
    pool: &PgPool,
    id: i64,
    from: SwapStatus,
    to: SwapStatus,
) -> Result<bool> {
    let result = sqlx::query(
        r#"UPDATE swaps SET status = $3, updated_on = NOW() WHERE id = $1 AND status = $2"#,
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to update swap {} status {} -> {}", id, from, to))?;

    Ok(result.rows_affected() == 1)
}

/// SIGNED -> SUBMITTED, recording the broadcast hash in the same atomic step.
pub async fn mark_swap_submitted(pool: &PgPool, id: i64, destination_tx_hash: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"UPDATE swaps SET status = 'submitted', destination_tx_hash = $2, updated_on = NOW()
           WHERE id = $1 AND status = 'signed'"#,
    )
    .bind(id)
    .bind(destination_tx_hash)
    .execute(pool)
    .await
    .wrap_err("Failed to mark swap submitted")?;

    Ok(result.rows_affected() == 1)
}

/// RETRY -> UNSIGNED with a fresh sequence and rebuilt payload. The caller
/// purges signatures first; they were produced against the stale sequence.
pub async fn requeue_swap(
    pool: &PgPool,
    id: i64,
    new_sequence: i64,
    new_unsigned_tx: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"UPDATE swaps
           SET status = 'unsigned', sequence = $2, unsigned_tx = $3,
               destination_tx_hash = NULL, updated_on = NOW()
           WHERE id = $1 AND status = 'retry'"#,
    )
    .bind(id)
    .bind(new_sequence)
    .bind(new_unsigned_tx)
    .execute(pool)
    .await
    .wrap_err("Failed to requeue swap")?;

    Ok(result.rows_affected() == 1)
}

pub async fn signature_exists(pool: &PgPool, swap_id: i64, signer: &str) -> Result<bool> {
    let row: (bool,) = sqlx::query_as(
        r#"SELECT EXISTS(SELECT 1 FROM signatures WHERE swap_id = $1 AND signer = $2)"#,
    )
    .bind(swap_id)
    .bind(signer)
    .fetch_one(pool)
    .await
    .wrap_err("Failed to check signature existence")?;
    Ok(row.0)
}

pub async fn insert_signature(pool: &PgPool, sig: &NewSignature) -> Result<i64> {
    let row = sqlx::query(
        r#"INSERT INTO signatures (swap_id, signer, signed_tx) VALUES ($1, $2, $3) RETURNING id"#,
    )
    .bind(sig.swap_id)
    .bind(&sig.signer)
    .bind(&sig.signed_tx)
    .fetch_one(pool)
    .await
    .wrap_err("Failed to insert signature")?;
    Ok(row.get("id"))
}

/// Distinct signer count. The table carries no uniqueness constraint, so a
/// raced double-insert by one signer must not count twice toward threshold.
pub async fn count_signatures(pool: &PgPool, swap_id: i64) -> Result<i64> {
    let row: (i64,) =
        sqlx::query_as(r#"SELECT COUNT(DISTINCT signer) FROM signatures WHERE swap_id = $1"#)
            .bind(swap_id)
            .fetch_one(pool)
            .await
            .wrap_err("Failed to count signatures")?;
    Ok(row.0)
}

/// All signatures for a swap, oldest first, one per signer.
pub async fn get_signatures(pool: &PgPool, swap_id: i64) -> Result<Vec<Signature>> {
    let rows = sqlx::query_as::<_, Signature>(
        r#"SELECT DISTINCT ON (signer) id, swap_id, signer, signed_tx, created_on
           FROM signatures WHERE swap_id = $1 ORDER BY signer, created_on ASC"#,
    )
    .bind(swap_id)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to get signatures")?;
    Ok(rows)
}

pub async fn delete_signatures(pool: &PgPool, swap_id: i64) -> Result<u64> {
    let result = sqlx::query(r#"DELETE FROM signatures WHERE swap_id = $1"#)
        .bind(swap_id)
        .execute(pool)
        .await
        .wrap_err("Failed to delete signatures")?;
    Ok(result.rows_affected())
}

/// Get-or-create a tracker at nonce -1. The upsert makes concurrent creation
/// for the same key race-free: losers simply read the winner's row. More than
/// one row per key breaks the store's integrity contract and is escalated.
pub async fn get_or_create_tracker(pool: &PgPool, key: &str) -> Result<SwapTracker> {
    sqlx::query(r#"INSERT INTO swap_trackers (key, nonce) VALUES ($1, -1) ON CONFLICT (key) DO NOTHING"#)
        .bind(key)
        .execute(pool)
        .await
        .wrap_err("Failed to upsert tracker")?;

    let rows = sqlx::query_as::<_, SwapTracker>(
        r#"SELECT key, nonce, updated_on FROM swap_trackers WHERE key = $1"#,
    )
    .bind(key)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to read tracker")?;

    let mut rows = rows;
    match rows.len() {
        1 => Ok(rows.remove(0)),
        0 => Err(eyre!("Tracker {} vanished after upsert", key)),
        n => Err(eyre!(
            "Data integrity violation: {} tracker rows for key {}",
            n,
            key
        )),
    }
}

pub async fn last_processed(pool: &PgPool, key: &str) -> Result<i64> {
    Ok(get_or_create_tracker(pool, key).await?.nonce)
}

/// Monotonic cursor advance; a stale writer cannot move a cursor backward.
pub async fn update_last_processed(pool: &PgPool, key: &str, value: i64) -> Result<()> {
    sqlx::query(
        r#"UPDATE swap_trackers SET nonce = $2, updated_on = NOW()
           WHERE key = $1 AND nonce < $2"#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to update tracker {}", key))?;
    Ok(())
}

/// Atomically hand out the next sequence number for a destination account.
/// First allocation on a fresh key yields 0.
pub async fn allocate_sequence(pool: &PgPool, key: &str) -> Result<i64> {
    let row = sqlx::query(
        r#"INSERT INTO swap_trackers (key, nonce) VALUES ($1, 0)
           ON CONFLICT (key) DO UPDATE SET nonce = swap_trackers.nonce + 1, updated_on = NOW()
           RETURNING nonce"#,
    )
    .bind(key)
    .fetch_one(pool)
    .await
    .wrap_err_with(|| format!("Failed to allocate sequence from {}", key))?;
    Ok(row.get("nonce"))
}

/// Like `allocate_sequence`, but never hands out less than `min`. Used when
/// requeueing a RETRY swap, whose fresh sequence must be strictly greater
/// than the stale one it gives up.
pub async fn allocate_sequence_at_least(pool: &PgPool, key: &str, min: i64) -> Result<i64> {
    let row = sqlx::query(
        r#"INSERT INTO swap_trackers (key, nonce) VALUES ($1, $2)
           ON CONFLICT (key) DO UPDATE
           SET nonce = GREATEST(swap_trackers.nonce + 1, $2), updated_on = NOW()
           RETURNING nonce"#,
    )
    .bind(key)
    .bind(min)
    .fetch_one(pool)
    .await
    .wrap_err_with(|| format!("Failed to allocate sequence from {}", key))?;
    Ok(row.get("nonce"))
}

/// Overwrite a tracker with authoritative chain state after a failure.
/// Unlike `update_last_processed` this may move backward; it is only ever
/// applied to `seq:*` allocators.
pub async fn force_set_tracker(pool: &PgPool, key: &str, value: i64) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO swap_trackers (key, nonce) VALUES ($1, $2)
           ON CONFLICT (key) DO UPDATE SET nonce = $2, updated_on = NOW()"#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to force-set tracker {}", key))?;
    Ok(())
}

/// Swap counts per status, for the status API and gauges.
pub async fn count_swaps_by_status(pool: &PgPool, status: SwapStatus) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM swaps WHERE status = $1"#)
        .bind(status.as_str())
        .fetch_one(pool)
        .await
        .wrap_err("Failed to count swaps")?;
    Ok(row.0)
}

/// Most recent swaps, optionally filtered by status.
pub async fn recent_swaps(
    pool: &PgPool,
    status: Option<SwapStatus>,
    limit: i64,
) -> Result<Vec<Swap>> {
    let rows = match status {
        Some(status) => {
            sqlx::query_as::<_, Swap>(&format!(
                "SELECT {SWAP_COLUMNS} FROM swaps WHERE status = $1 \
                 ORDER BY created_on DESC LIMIT $2"
            ))
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Swap>(&format!(
                "SELECT {SWAP_COLUMNS} FROM swaps ORDER BY created_on DESC LIMIT $1"
            ))
            .bind(limit)
            .fetch_all(pool)
            .await
        }
    }
    .wrap_err("Failed to list recent swaps")?;
    Ok(rows)
}
