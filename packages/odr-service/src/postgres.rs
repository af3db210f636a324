//! Postgres-backed collaborators.

use std::{collections::BTreeSet, time::Duration};

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

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
use odr_storage::{apply, cache, hydrate, locks, permissions, predicates, records, structure};

use crate::{BoxFuture, CacheStore, EntityStore, Error, LockService, LockToken, Result};

pub struct PgEntityStore {
	pool: PgPool,
}
impl PgEntityStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}
impl EntityStore for PgEntityStore {
	fn load_schema<'a>(&'a self, schema_id: SchemaId) -> BoxFuture<'a, Result<Schema>> {
		Box::pin(async move { Ok(structure::load_schema(&self.pool, schema_id).await?) })
	}

	fn load_structure_rows<'a>(&'a self, root_id: SchemaId) -> BoxFuture<'a, Result<StructureRows>> {
		Box::pin(async move { Ok(structure::load_structure_rows(&self.pool, root_id).await?) })
	}

	fn hydrate<'a>(&'a self, request: &'a HydrationRequest) -> BoxFuture<'a, Result<HydratedPools>> {
		Box::pin(async move { Ok(hydrate::hydrate(&self.pool, request).await?) })
	}

	fn apply_plan<'a>(
		&'a self,
		plan: &'a SyncPlan,
		user_id: UserId,
	) -> BoxFuture<'a, Result<AppliedPlan>> {
		Box::pin(async move { Ok(apply::apply_plan(&self.pool, plan, user_id).await?) })
	}

	fn load_search_structure<'a>(
		&'a self,
		top_schema_id: SchemaId,
	) -> BoxFuture<'a, Result<SearchStructure>> {
		Box::pin(async move { Ok(structure::load_search_structure(&self.pool, top_schema_id).await?) })
	}

	fn list_records<'a>(&'a self, schema_id: SchemaId) -> BoxFuture<'a, Result<Vec<RecordRow>>> {
		Box::pin(async move { Ok(records::list_records(&self.pool, schema_id).await?) })
	}

	fn evaluate_predicate<'a>(
		&'a self,
		predicate: &'a Predicate,
	) -> BoxFuture<'a, Result<BTreeSet<RecordId>>> {
		Box::pin(async move { Ok(predicates::evaluate(&self.pool, predicate).await?) })
	}

	fn load_permissions<'a>(
		&'a self,
		user_id: Option<UserId>,
	) -> BoxFuture<'a, Result<UserPermissions>> {
		Box::pin(async move { Ok(permissions::load_user_permissions(&self.pool, user_id).await?) })
	}

	fn load_invalidation_context<'a>(
		&'a self,
		schema_id: SchemaId,
	) -> BoxFuture<'a, Result<InvalidationContext>> {
		Box::pin(
			async move { Ok(structure::load_invalidation_context(&self.pool, schema_id).await?) },
		)
	}
}

/// `search_cache` table.
pub struct PgCacheStore {
	pool: PgPool,
}
impl PgCacheStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}
impl CacheStore for PgCacheStore {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
		Box::pin(async move { cache::get(&self.pool, key).await.map_err(cache_error) })
	}

	fn put<'a>(&'a self, key: &'a str, value: &'a Value) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { cache::put(&self.pool, key, value).await.map_err(cache_error) })
	}

	fn get_entry<'a>(
		&'a self,
		key: &'a str,
		entry: &'a str,
	) -> BoxFuture<'a, Result<Option<Value>>> {
		Box::pin(async move { cache::get_entry(&self.pool, key, entry).await.map_err(cache_error) })
	}

	fn put_entry<'a>(
		&'a self,
		key: &'a str,
		entry: &'a str,
		value: &'a Value,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			cache::put_entry(&self.pool, key, entry, value).await.map_err(cache_error)
		})
	}

	fn delete_keys<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move { cache::delete_keys(&self.pool, keys).await.map_err(cache_error) })
	}
}

/// `sync_locks` table. Each acquire mints a fresh holder token.
pub struct PgLockService {
	pool: PgPool,
}
impl PgLockService {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}
impl LockService for PgLockService {
	fn acquire<'a>(
		&'a self,
		key: &'a str,
		ttl: Duration,
	) -> BoxFuture<'a, Result<Option<LockToken>>> {
		Box::pin(async move {
			let holder = Uuid::new_v4();
			let acquired =
				locks::try_acquire(&self.pool, key, holder, ttl).await.map_err(lock_error)?;

			Ok(acquired.then(|| LockToken { key: key.to_string(), holder }))
		})
	}

	fn release<'a>(&'a self, token: &'a LockToken) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			locks::release(&self.pool, &token.key, token.holder).await.map_err(lock_error)
		})
	}
}

fn cache_error(err: odr_storage::Error) -> Error {
	Error::Cache { message: err.to_string() }
}

fn lock_error(err: odr_storage::Error) -> Error {
	Error::Lock { message: err.to_string() }
}
