use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, OdrService, Result};
use odr_domain::{
	cache_keys::{self, DatatypeSuffix, InvalidationContext},
	model::{FieldId, SchemaId},
};

/// Write-side events that make cached search results or structures stale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
	SchemaCreated { schema_id: SchemaId },
	SchemaDeleted { schema_id: SchemaId },
	SchemaImported { schema_id: SchemaId },
	FieldCreated { schema_id: SchemaId, field_id: FieldId },
	FieldModified { schema_id: SchemaId, field_id: FieldId },
	FieldDeleted { schema_id: SchemaId, field_id: FieldId },
	FieldPublicChanged { schema_id: SchemaId, field_id: FieldId },
	RecordCreated { schema_id: SchemaId },
	RecordModified { schema_id: SchemaId },
	RecordDeleted { schema_id: SchemaId },
	RecordPublicChanged { schema_id: SchemaId },
	LinkStatusChanged { ancestor_schema_id: SchemaId, descendant_schema_id: SchemaId },
}
impl CacheEvent {
	pub fn schema_id(&self) -> SchemaId {
		match self {
			Self::SchemaCreated { schema_id }
			| Self::SchemaDeleted { schema_id }
			| Self::SchemaImported { schema_id }
			| Self::FieldCreated { schema_id, .. }
			| Self::FieldModified { schema_id, .. }
			| Self::FieldDeleted { schema_id, .. }
			| Self::FieldPublicChanged { schema_id, .. }
			| Self::RecordCreated { schema_id }
			| Self::RecordModified { schema_id }
			| Self::RecordDeleted { schema_id }
			| Self::RecordPublicChanged { schema_id } => *schema_id,
			Self::LinkStatusChanged { descendant_schema_id, .. } => *descendant_schema_id,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvalidationReport {
	/// Keys the event maps to, sorted.
	pub keys: Vec<String>,
	/// How many of them were present.
	pub deleted: u64,
}

/// Maps an event onto the cache keys it makes stale.
pub fn keys_for_event(event: &CacheEvent, ctx: &InvalidationContext) -> BTreeSet<String> {
	let mut keys = BTreeSet::new();

	match event {
		CacheEvent::SchemaCreated { .. }
		| CacheEvent::SchemaDeleted { .. }
		| CacheEvent::SchemaImported { .. } => {
			keys.extend(ctx.datatype_keys());
			keys.extend(ctx.field_keys());
			keys.extend(ctx.structure_keys());
		},
		CacheEvent::FieldCreated { field_id, .. }
		| CacheEvent::FieldModified { field_id, .. }
		| CacheEvent::FieldDeleted { field_id, .. }
		| CacheEvent::FieldPublicChanged { field_id, .. } => {
			keys.extend(ctx.field_keys());
			keys.insert(cache_keys::datafield_key(*field_id));
			keys.extend(ctx.structure_keys());
		},
		CacheEvent::RecordCreated { .. }
		| CacheEvent::RecordModified { .. }
		| CacheEvent::RecordDeleted { .. } => {
			keys.extend(ctx.datatype_keys());
			keys.extend(ctx.field_keys());
		},
		CacheEvent::RecordPublicChanged { schema_id } => {
			for suffix in [DatatypeSuffix::PublicStatus, DatatypeSuffix::RecordList] {
				keys.insert(cache_keys::datatype_key(*schema_id, suffix));

				if let Some(uuid) = ctx.template_uuid {
					keys.insert(cache_keys::template_datatype_key(uuid, suffix));
				}
			}
		},
		CacheEvent::LinkStatusChanged { descendant_schema_id, .. } => {
			keys.insert(cache_keys::datatype_key(*descendant_schema_id, DatatypeSuffix::RecordList));

			if let Some(uuid) = ctx.template_uuid {
				keys.insert(cache_keys::template_datatype_key(uuid, DatatypeSuffix::RecordList));
			}
		},
	}

	keys
}

impl OdrService {
	pub async fn invalidate(&self, event: CacheEvent) -> Result<InvalidationReport> {
		let schema_id = event.schema_id();
		let ctx = match self.store.load_invalidation_context(schema_id).await {
			Ok(ctx) => ctx,
			// A deleted schema may already be gone; its id-scoped keys still need to go.
			Err(Error::NotFound { .. }) if matches!(event, CacheEvent::SchemaDeleted { .. }) =>
				InvalidationContext { schema_id, grandparent_id: schema_id, ..Default::default() },
			Err(err) => return Err(err),
		};
		let keys = keys_for_event(&event, &ctx).into_iter().collect::<Vec<_>>();

		self.rotate_search_generation().await;

		let deleted = self.cache.delete_keys(&keys).await?;

		tracing::info!(?event, keys = keys.len(), deleted, "Cache invalidated.");

		Ok(InvalidationReport { keys, deleted })
	}

	/// Drops every search and structure key of the given schemas. Failures are logged only.
	pub(crate) async fn clear_schema_caches(&self, schema_ids: &BTreeSet<SchemaId>) {
		let mut keys = BTreeSet::new();

		for schema_id in schema_ids {
			match self.store.load_invalidation_context(*schema_id).await {
				Ok(ctx) => {
					keys.extend(ctx.datatype_keys());
					keys.extend(ctx.field_keys());
					keys.extend(ctx.structure_keys());
				},
				Err(err) => {
					tracing::warn!(schema_id, error = %err, "Failed to load invalidation context.");

					keys.extend(cache_keys::datatype_keys(*schema_id));
					keys.insert(cache_keys::schema_key(*schema_id));
				},
			}
		}

		let keys = keys.into_iter().collect::<Vec<_>>();

		self.rotate_search_generation().await;

		if let Err(err) = self.cache.delete_keys(&keys).await {
			tracing::warn!(error = %err, keys = keys.len(), "Failed to clear schema caches.");
		}
	}

	/// Must run before the keys are deleted, so a fill that started earlier sees the change.
	async fn rotate_search_generation(&self) {
		let token = Value::from(Uuid::new_v4().to_string());

		if let Err(err) = self.cache.put(cache_keys::SEARCH_GENERATION_KEY, &token).await {
			tracing::warn!(error = %err, "Failed to rotate search cache generation.");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn context() -> InvalidationContext {
		InvalidationContext {
			schema_id: 5,
			grandparent_id: 1,
			template_uuid: Some(Uuid::from_u128(9)),
			field_ids: vec![11, 12],
			template_field_uuids: vec![Uuid::from_u128(21)],
			option_ids: vec![31],
		}
	}

	#[test]
	fn record_events_leave_structure_keys_alone() {
		let keys = keys_for_event(&CacheEvent::RecordModified { schema_id: 5 }, &context());

		assert!(keys.contains("cached_search_dt_5_record_list"));
		assert!(keys.contains("cached_search_df_11"));
		assert!(keys.contains("cached_search_ro_31"));
		assert!(!keys.contains("cached_schema_5"));
	}

	#[test]
	fn field_events_include_the_field_and_structure() {
		let keys =
			keys_for_event(&CacheEvent::FieldCreated { schema_id: 5, field_id: 40 }, &context());

		assert!(keys.contains("cached_search_df_40"));
		assert!(keys.contains("cached_schema_family_1"));
		assert!(!keys.contains("cached_search_dt_5_created_date"));
	}

	#[test]
	fn public_status_changes_touch_two_suffixes() {
		let keys = keys_for_event(&CacheEvent::RecordPublicChanged { schema_id: 5 }, &context());

		assert_eq!(keys.len(), 4);
		assert!(keys.contains("cached_search_dt_5_public_status"));
		assert!(keys.contains(&cache_keys::template_datatype_key(
			Uuid::from_u128(9),
			DatatypeSuffix::RecordList
		)));
	}

	#[test]
	fn events_decode_from_tagged_json() {
		let event: CacheEvent = serde_json::from_str(
			r#"{"event":"link_status_changed","ancestor_schema_id":1,"descendant_schema_id":2}"#,
		)
		.expect("Event should decode.");

		assert_eq!(event.schema_id(), 2);
	}
}
