//! `search_cache` table: one JSON payload per key, hashed maps stored as JSON objects.

use serde_json::Value;
use sqlx::PgPool;

use crate::Result;

pub async fn get(pool: &PgPool, key: &str) -> Result<Option<Value>> {
	let payload = sqlx::query_scalar::<_, Value>("SELECT payload FROM search_cache WHERE key = $1")
		.bind(key)
		.fetch_optional(pool)
		.await?;

	Ok(payload)
}

pub async fn put(pool: &PgPool, key: &str, payload: &Value) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO search_cache (key, payload, updated_at)
VALUES ($1, $2, now())
ON CONFLICT (key) DO UPDATE
SET payload = EXCLUDED.payload, updated_at = EXCLUDED.updated_at",
	)
	.bind(key)
	.bind(payload)
	.execute(pool)
	.await?;

	Ok(())
}

pub async fn get_entry(pool: &PgPool, key: &str, entry: &str) -> Result<Option<Value>> {
	let payload = sqlx::query_scalar::<_, Option<Value>>(
		"SELECT payload -> $2 FROM search_cache WHERE key = $1",
	)
	.bind(key)
	.bind(entry)
	.fetch_optional(pool)
	.await?;

	Ok(payload.flatten())
}

/// Sets one entry of a hashed map, creating the map if needed.
pub async fn put_entry(pool: &PgPool, key: &str, entry: &str, value: &Value) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO search_cache (key, payload, updated_at)
VALUES ($1, jsonb_build_object($2::text, $3::jsonb), now())
ON CONFLICT (key) DO UPDATE
SET payload = CASE
		WHEN jsonb_typeof(search_cache.payload) = 'object'
			THEN search_cache.payload || jsonb_build_object($2::text, $3::jsonb)
		ELSE jsonb_build_object($2::text, $3::jsonb)
	END,
	updated_at = now()",
	)
	.bind(key)
	.bind(entry)
	.bind(value)
	.execute(pool)
	.await?;

	Ok(())
}

pub async fn delete_keys(pool: &PgPool, keys: &[String]) -> Result<u64> {
	if keys.is_empty() {
		return Ok(0);
	}

	let result = sqlx::query("DELETE FROM search_cache WHERE key = ANY($1)")
		.bind(keys)
		.execute(pool)
		.await?;

	Ok(result.rows_affected())
}
