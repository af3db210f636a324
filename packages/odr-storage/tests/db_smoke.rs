use std::time::Duration;

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use odr_config::Postgres;
use odr_domain::{
	grammar::parse_query,
	model::FieldType,
	predicate::Predicate,
	sync_plan::{SyncOp, SyncPlan},
};
use odr_storage::{apply, cache, db::Db, locks, predicates, records, structure};
use odr_testkit::TestDatabase;

async fn bootstrap(test_db: &TestDatabase) -> Db {
	let cfg = Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 2 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	db
}

async fn insert_top_schema(pool: &PgPool, name: &str) -> i64 {
	let id: i64 = sqlx::query_scalar(
		"\
INSERT INTO schemas (unique_id, parent_id, grandparent_id, setup_step, is_public, name)
VALUES ($1, 0, 0, 'operational', true, $2)
RETURNING id",
	)
	.bind(Uuid::new_v4())
	.bind(name)
	.fetch_one(pool)
	.await
	.expect("Failed to insert schema.");

	sqlx::query("UPDATE schemas SET parent_id = id, grandparent_id = id WHERE id = $1")
		.bind(id)
		.execute(pool)
		.await
		.expect("Failed to root schema.");

	id
}

async fn insert_top_record(pool: &PgPool, schema_id: i64) -> i64 {
	let id: i64 = sqlx::query_scalar(
		"\
INSERT INTO records (schema_id, parent_id, grandparent_id, public_date)
VALUES ($1, 0, 0, now())
RETURNING id",
	)
	.bind(schema_id)
	.fetch_one(pool)
	.await
	.expect("Failed to insert record.");

	sqlx::query("UPDATE records SET parent_id = id, grandparent_id = id WHERE id = $1")
		.bind(id)
		.execute(pool)
		.await
		.expect("Failed to root record.");

	id
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set ODR_PG_DSN to run."]
async fn bootstrap_creates_tables_and_is_repeatable() {
	let Some(base_dsn) = odr_testkit::env_dsn() else {
		eprintln!("Skipping bootstrap_creates_tables_and_is_repeatable; set ODR_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;

	db.ensure_schema().await.expect("Second bootstrap should be a no-op.");

	for table in ["schemas", "tag_edges", "layout_slots", "search_cache", "sync_locks"] {
		let count: i64 = sqlx::query_scalar(
			"SELECT count(*) FROM information_schema.tables WHERE table_name = $1",
		)
		.bind(table)
		.fetch_one(&db.pool)
		.await
		.expect("Failed to query schema tables.");

		assert_eq!(count, 1, "missing table {table}");
	}

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set ODR_PG_DSN to run."]
async fn sync_lock_has_a_single_holder_until_released() {
	let Some(base_dsn) = odr_testkit::env_dsn() else {
		eprintln!("Skipping sync_lock_has_a_single_holder_until_released; set ODR_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
	let ttl = Duration::from_secs(30);

	assert!(locks::try_acquire(&db.pool, "sync_7", first, ttl).await.expect("Acquire failed."));
	assert!(!locks::try_acquire(&db.pool, "sync_7", second, ttl).await.expect("Acquire failed."));
	assert!(!locks::release(&db.pool, "sync_7", second).await.expect("Release failed."));
	assert!(locks::release(&db.pool, "sync_7", first).await.expect("Release failed."));
	assert!(locks::try_acquire(&db.pool, "sync_7", second, ttl).await.expect("Acquire failed."));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set ODR_PG_DSN to run."]
async fn hashed_cache_entries_merge_and_delete() {
	let Some(base_dsn) = odr_testkit::env_dsn() else {
		eprintln!("Skipping hashed_cache_entries_merge_and_delete; set ODR_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let key = "cached_search_df_12";

	cache::put_entry(&db.pool, key, "a", &json!([1, 2])).await.expect("Put failed.");
	cache::put_entry(&db.pool, key, "b", &json!([3])).await.expect("Put failed.");

	assert_eq!(cache::get_entry(&db.pool, key, "a").await.expect("Get failed."), Some(json!([1, 2])));
	assert_eq!(cache::get_entry(&db.pool, key, "c").await.expect("Get failed."), None);

	let deleted = cache::delete_keys(&db.pool, &[key.to_string(), "cached_search_df_13".to_string()])
		.await
		.expect("Delete failed.");

	assert_eq!(deleted, 1);
	assert_eq!(cache::get(&db.pool, key).await.expect("Get failed."), None);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set ODR_PG_DSN to run."]
async fn records_without_a_value_match_empty_criteria() {
	let Some(base_dsn) = odr_testkit::env_dsn() else {
		eprintln!("Skipping records_without_a_value_match_empty_criteria; set ODR_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let schema_id = insert_top_schema(&db.pool, "Samples").await;
	let field_id: i64 = sqlx::query_scalar(
		"\
INSERT INTO fields (schema_id, field_uuid, field_type, name)
VALUES ($1, $2, 'ShortVarchar', 'Label')
RETURNING id",
	)
	.bind(schema_id)
	.bind(Uuid::new_v4())
	.fetch_one(&db.pool)
	.await
	.expect("Failed to insert field.");
	let with_value = insert_top_record(&db.pool, schema_id).await;
	let without_value = insert_top_record(&db.pool, schema_id).await;

	sqlx::query("INSERT INTO short_varchar_values (record_id, field_id, value) VALUES ($1, $2, 'x')")
		.bind(with_value)
		.bind(field_id)
		.execute(&db.pool)
		.await
		.expect("Failed to insert value.");

	let text = |raw: &str| Predicate::FieldText {
		schema_id,
		field_id,
		field_type: FieldType::ShortVarchar,
		query: parse_query(raw, 8),
	};
	let hits = predicates::evaluate(&db.pool, &text("x")).await.expect("Evaluate failed.");

	assert_eq!(hits.into_iter().collect::<Vec<_>>(), vec![with_value]);

	let hits = predicates::evaluate(&db.pool, &text("\"\"")).await.expect("Evaluate failed.");

	assert_eq!(hits.into_iter().collect::<Vec<_>>(), vec![without_value]);

	let rows = records::list_records(&db.pool, schema_id).await.expect("List failed.");

	assert_eq!(rows.len(), 2);
	assert!(rows.iter().all(|row| row.is_top_level() && row.is_public));

	let structure =
		structure::load_search_structure(&db.pool, schema_id).await.expect("Load failed.");

	assert!(structure.fields.contains_key(&field_id));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set ODR_PG_DSN to run."]
async fn deleting_a_tag_soft_deletes_its_selections() {
	let Some(base_dsn) = odr_testkit::env_dsn() else {
		eprintln!("Skipping deleting_a_tag_soft_deletes_its_selections; set ODR_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let schema_id = insert_top_schema(&db.pool, "Specimens").await;
	let field_id: i64 = sqlx::query_scalar(
		"\
INSERT INTO fields (schema_id, field_uuid, field_type, name)
VALUES ($1, $2, 'Tags', 'Habitat')
RETURNING id",
	)
	.bind(schema_id)
	.bind(Uuid::new_v4())
	.fetch_one(&db.pool)
	.await
	.expect("Failed to insert field.");
	let tag_id: i64 = sqlx::query_scalar(
		"INSERT INTO tags (field_id, tag_uuid, name) VALUES ($1, $2, 'Dog') RETURNING id",
	)
	.bind(field_id)
	.bind(Uuid::new_v4())
	.fetch_one(&db.pool)
	.await
	.expect("Failed to insert tag.");
	let record_id = insert_top_record(&db.pool, schema_id).await;

	sqlx::query("INSERT INTO tag_selections (record_id, field_id, tag_id) VALUES ($1, $2, $3)")
		.bind(record_id)
		.bind(field_id)
		.bind(tag_id)
		.execute(&db.pool)
		.await
		.expect("Failed to insert selection.");

	let plan = SyncPlan { ops: vec![SyncOp::DeleteTag { tag_id }], ..Default::default() };
	let applied = apply::apply_plan(&db.pool, &plan, 0).await.expect("Apply failed.");

	// The tag and its one selection.
	assert_eq!(applied.mutations, 2);

	let tag_deleted: bool =
		sqlx::query_scalar("SELECT deleted_at IS NOT NULL FROM tags WHERE id = $1")
			.bind(tag_id)
			.fetch_one(&db.pool)
			.await
			.expect("Failed to read tag.");
	let live_selections: i64 = sqlx::query_scalar(
		"SELECT count(*) FROM tag_selections WHERE tag_id = $1 AND deleted_at IS NULL",
	)
	.bind(tag_id)
	.fetch_one(&db.pool)
	.await
	.expect("Failed to count selections.");
	let all_selections: i64 =
		sqlx::query_scalar("SELECT count(*) FROM tag_selections WHERE tag_id = $1")
			.bind(tag_id)
			.fetch_one(&db.pool)
			.await
			.expect("Failed to count selections.");

	assert!(tag_deleted);
	assert_eq!(live_selections, 0);
	// Soft deleted, not removed.
	assert_eq!(all_selections, 1);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
