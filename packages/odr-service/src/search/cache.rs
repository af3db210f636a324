//! Cached predicate results and record listings.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::{OdrService, Result};
use odr_domain::{
	cache_keys::{self, DatatypeSuffix},
	model::{RecordId, SchemaId},
	predicate::{CacheSlot, Predicate},
	search_tree::RecordRow,
};

impl OdrService {
	pub(super) async fn evaluate_cached(&self, predicate: &Predicate) -> Result<BTreeSet<RecordId>> {
		if !self.cfg.search.cache_enabled {
			return self.store.evaluate_predicate(predicate).await;
		}

		let slot = predicate.cache_slot();

		if let Some(ids) = self.read_ids(&slot).await {
			return Ok(ids);
		}

		let generation = self.search_generation().await;
		let ids = self.store.evaluate_predicate(predicate).await?;

		self.write_ids(&slot, &ids).await;
		self.discard_if_invalidated(&slot.key, &generation).await;

		Ok(ids)
	}

	pub(super) async fn search_generation(&self) -> Option<Value> {
		match self.cache.get(cache_keys::SEARCH_GENERATION_KEY).await {
			Ok(value) => value,
			Err(err) => {
				tracing::warn!(error = %err, "Search cache generation read failed.");

				None
			},
		}
	}

	/// Drops `key` again when an invalidation ran while its value was being computed.
	pub(super) async fn discard_if_invalidated(&self, key: &str, generation: &Option<Value>) {
		if self.search_generation().await == *generation {
			return;
		}

		tracing::debug!(key, "Invalidation overlapped a cache fill; dropping the entry.");

		if let Err(err) = self.cache.delete_keys(&[key.to_string()]).await {
			tracing::warn!(key, error = %err, "Failed to drop a stale search cache entry.");
		}
	}

	pub(super) async fn read_ids(&self, slot: &CacheSlot) -> Option<BTreeSet<RecordId>> {
		let cached = match &slot.entry {
			Some(entry) => self.cache.get_entry(&slot.key, entry).await,
			None => self.cache.get(&slot.key).await,
		};
		let value = match cached {
			Ok(value) => value?,
			Err(err) => {
				tracing::warn!(key = %slot.key, error = %err, "Search cache read failed.");

				return None;
			},
		};

		match serde_json::from_value(value) {
			Ok(ids) => Some(ids),
			Err(err) => {
				tracing::warn!(
					key = %slot.key,
					error = %err,
					"Ignoring undecodable search cache entry."
				);

				None
			},
		}
	}

	pub(super) async fn write_ids(&self, slot: &CacheSlot, ids: &BTreeSet<RecordId>) {
		let value = Value::from(ids.iter().copied().collect::<Vec<_>>());
		let written = match &slot.entry {
			Some(entry) => self.cache.put_entry(&slot.key, entry, &value).await,
			None => self.cache.put(&slot.key, &value).await,
		};

		if let Err(err) = written {
			tracing::warn!(key = %slot.key, error = %err, "Search cache write failed.");
		}
	}

	/// Live records of one schema, through the `record_list` key when caching is on.
	pub(super) async fn schema_records(&self, schema_id: SchemaId) -> Result<Vec<RecordRow>> {
		if !self.cfg.search.cache_enabled {
			return self.store.list_records(schema_id).await;
		}

		let key = cache_keys::datatype_key(schema_id, DatatypeSuffix::RecordList);

		match self.cache.get(&key).await {
			Ok(Some(value)) => match serde_json::from_value(value) {
				Ok(rows) => return Ok(rows),
				Err(err) => tracing::warn!(key, error = %err, "Ignoring undecodable record list."),
			},
			Ok(None) => {},
			Err(err) => tracing::warn!(key, error = %err, "Record list cache read failed."),
		}

		let generation = self.search_generation().await;
		let rows = self.store.list_records(schema_id).await?;

		match serde_json::to_value(&rows) {
			Ok(value) =>
				if let Err(err) = self.cache.put(&key, &value).await {
					tracing::warn!(key, error = %err, "Record list cache write failed.");
				},
			Err(err) => tracing::warn!(key, error = %err, "Failed to encode record list."),
		}

		self.discard_if_invalidated(&key, &generation).await;

		Ok(rows)
	}
}
