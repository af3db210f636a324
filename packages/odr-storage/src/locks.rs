//! `sync_locks` table: expiring single-holder locks.

use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use crate::Result;

/// Takes the lock if it is free or expired. Returns whether `holder` now owns it.
pub async fn try_acquire(pool: &PgPool, key: &str, holder: Uuid, ttl: Duration) -> Result<bool> {
	let acquired = sqlx::query_scalar::<_, Uuid>(
		"\
INSERT INTO sync_locks (key, holder, acquired_at, expires_at)
VALUES ($1, $2, now(), now() + make_interval(secs => $3))
ON CONFLICT (key) DO UPDATE
SET holder = EXCLUDED.holder,
	acquired_at = EXCLUDED.acquired_at,
	expires_at = EXCLUDED.expires_at
WHERE sync_locks.expires_at <= now()
RETURNING holder",
	)
	.bind(key)
	.bind(holder)
	.bind(ttl.as_secs_f64())
	.fetch_optional(pool)
	.await?;

	Ok(acquired == Some(holder))
}

/// Deletes the lock only while `holder` still owns it.
pub async fn release(pool: &PgPool, key: &str, holder: Uuid) -> Result<bool> {
	let result = sqlx::query("DELETE FROM sync_locks WHERE key = $1 AND holder = $2")
		.bind(key)
		.bind(holder)
		.execute(pool)
		.await?;

	Ok(result.rows_affected() > 0)
}
