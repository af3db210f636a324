//! Template synchronization and record search over pluggable collaborators.
//!
//! The service never touches storage directly: every read and write goes through an
//! [`EntityStore`], every cached search result through a [`CacheStore`], and sync exclusion
//! through a [`LockService`].

pub mod invalidation;
pub mod memory;
pub mod postgres;
pub mod search;
pub mod template_sync;

mod error;

pub use error::Error;
pub use invalidation::{CacheEvent, InvalidationReport};
pub use memory::{MemoryCacheStore, MemoryLockService};
pub use postgres::{PgCacheStore, PgEntityStore, PgLockService};
pub use search::{SearchRequest, SearchResponse};
pub use template_sync::{SyncOutcome, SyncReport};

use std::{collections::BTreeSet, future::Future, pin::Pin, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::time::{self, Instant};
use uuid::Uuid;

use odr_config::{CacheBackend, Config};
use odr_domain::{
	cache_keys::InvalidationContext,
	hydrate::{HydratedPools, HydrationRequest},
	model::{RecordId, Schema, SchemaId, UserId},
	permissions::UserPermissions,
	predicate::{Predicate, SearchStructure},
	search_tree::RecordRow,
	stack::StructureRows,
	sync_plan::{AppliedPlan, SyncPlan},
};
use odr_storage::db::Db;

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Queryable, transactional store of schemas, fields, choices, layouts and records.
///
/// Reads never return soft-deleted rows.
pub trait EntityStore
where
	Self: Send + Sync,
{
	fn load_schema<'a>(&'a self, schema_id: SchemaId) -> BoxFuture<'a, Result<Schema>>;

	/// Slim rows of the family reachable from `root_id` through containment and link edges.
	fn load_structure_rows<'a>(&'a self, root_id: SchemaId) -> BoxFuture<'a, Result<StructureRows>>;

	fn hydrate<'a>(&'a self, request: &'a HydrationRequest) -> BoxFuture<'a, Result<HydratedPools>>;

	/// Runs every operation of `plan` in one transaction.
	fn apply_plan<'a>(
		&'a self,
		plan: &'a SyncPlan,
		user_id: UserId,
	) -> BoxFuture<'a, Result<AppliedPlan>>;

	fn load_search_structure<'a>(
		&'a self,
		top_schema_id: SchemaId,
	) -> BoxFuture<'a, Result<SearchStructure>>;

	fn list_records<'a>(&'a self, schema_id: SchemaId) -> BoxFuture<'a, Result<Vec<RecordRow>>>;

	fn evaluate_predicate<'a>(
		&'a self,
		predicate: &'a Predicate,
	) -> BoxFuture<'a, Result<BTreeSet<RecordId>>>;

	fn load_permissions<'a>(
		&'a self,
		user_id: Option<UserId>,
	) -> BoxFuture<'a, Result<UserPermissions>>;

	fn load_invalidation_context<'a>(
		&'a self,
		schema_id: SchemaId,
	) -> BoxFuture<'a, Result<InvalidationContext>>;
}

/// Best-effort key/value cache. Hashed maps are JSON objects addressed by entry name.
pub trait CacheStore
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>>;

	fn put<'a>(&'a self, key: &'a str, value: &'a Value) -> BoxFuture<'a, Result<()>>;

	fn get_entry<'a>(&'a self, key: &'a str, entry: &'a str)
	-> BoxFuture<'a, Result<Option<Value>>>;

	fn put_entry<'a>(
		&'a self,
		key: &'a str,
		entry: &'a str,
		value: &'a Value,
	) -> BoxFuture<'a, Result<()>>;

	/// Returns how many keys existed.
	fn delete_keys<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<u64>>;
}

/// Proof of holding a named lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
	pub key: String,
	pub holder: Uuid,
}

/// Named, TTL-bounded mutual exclusion.
pub trait LockService
where
	Self: Send + Sync,
{
	/// Takes the lock if it is free or expired.
	fn acquire<'a>(&'a self, key: &'a str, ttl: Duration)
	-> BoxFuture<'a, Result<Option<LockToken>>>;

	/// Releases the lock only while `token` still holds it.
	fn release<'a>(&'a self, token: &'a LockToken) -> BoxFuture<'a, Result<bool>>;

	/// Polls [`LockService::acquire`] until it succeeds or `wait` elapses.
	fn acquire_blocking<'a>(
		&'a self,
		key: &'a str,
		ttl: Duration,
		wait: Duration,
	) -> BoxFuture<'a, Result<Option<LockToken>>> {
		Box::pin(async move {
			let deadline = Instant::now() + wait;

			loop {
				if let Some(token) = self.acquire(key, ttl).await? {
					return Ok(Some(token));
				}
				if Instant::now() >= deadline {
					return Ok(None);
				}

				time::sleep(LOCK_POLL_INTERVAL).await;
			}
		})
	}
}

pub struct OdrService {
	pub cfg: Config,
	pub store: Arc<dyn EntityStore>,
	pub cache: Arc<dyn CacheStore>,
	pub locks: Arc<dyn LockService>,
}
impl OdrService {
	pub fn new(
		cfg: Config,
		store: Arc<dyn EntityStore>,
		cache: Arc<dyn CacheStore>,
		locks: Arc<dyn LockService>,
	) -> Self {
		Self { cfg, store, cache, locks }
	}

	/// Postgres entity store and sync locks; only the search cache follows `cache.backend`.
	///
	/// Sync locks stay in Postgres so separate processes exclude each other.
	pub fn with_postgres(cfg: Config, db: Db) -> Self {
		let store = Arc::new(PgEntityStore::new(db.pool.clone()));
		let cache: Arc<dyn CacheStore> = match cfg.cache.backend {
			CacheBackend::Postgres => Arc::new(PgCacheStore::new(db.pool.clone())),
			CacheBackend::Memory => Arc::new(MemoryCacheStore::default()),
		};
		let locks = Arc::new(PgLockService::new(db.pool));

		Self { cfg, store, cache, locks }
	}
}
