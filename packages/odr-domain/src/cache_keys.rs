//! Search and structure cache key namespace.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{FieldId, OptionId, SchemaId};

const CRITERIA_CACHE_SCHEMA_VERSION: i32 = 1;

pub const SEARCH_PREFIX: &str = "cached_search_";
/// Token rotated by every invalidation. Cache fills compare it before and after computing.
pub const SEARCH_GENERATION_KEY: &str = "cached_search_generation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatatypeSuffix {
	CreatedDate,
	ModifiedDate,
	CreatedBy,
	ModifiedBy,
	PublicStatus,
	RecordList,
}
impl DatatypeSuffix {
	pub const ALL: [Self; 6] = [
		Self::CreatedDate,
		Self::ModifiedDate,
		Self::CreatedBy,
		Self::ModifiedBy,
		Self::PublicStatus,
		Self::RecordList,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::CreatedDate => "created_date",
			Self::ModifiedDate => "modified_date",
			Self::CreatedBy => "created_by",
			Self::ModifiedBy => "modified_by",
			Self::PublicStatus => "public_status",
			Self::RecordList => "record_list",
		}
	}
}

pub fn datatype_key(schema_id: SchemaId, suffix: DatatypeSuffix) -> String {
	format!("{SEARCH_PREFIX}dt_{schema_id}_{}", suffix.as_str())
}

pub fn datafield_key(field_id: FieldId) -> String {
	format!("{SEARCH_PREFIX}df_{field_id}")
}

pub fn radio_option_key(option_id: OptionId) -> String {
	format!("{SEARCH_PREFIX}ro_{option_id}")
}

pub fn template_datatype_key(template_uuid: Uuid, suffix: DatatypeSuffix) -> String {
	format!("{SEARCH_PREFIX}template_dt_{template_uuid}_{}", suffix.as_str())
}

pub fn template_datafield_key(template_field_uuid: Uuid) -> String {
	format!("{SEARCH_PREFIX}template_df_{template_field_uuid}")
}

pub fn schema_family_key(grandparent_id: SchemaId) -> String {
	format!("cached_schema_family_{grandparent_id}")
}

pub fn schema_key(schema_id: SchemaId) -> String {
	format!("cached_schema_{schema_id}")
}

pub fn master_theme_key(schema_id: SchemaId) -> String {
	format!("cached_master_theme_{schema_id}")
}

/// Every per-schema search key.
pub fn datatype_keys(schema_id: SchemaId) -> Vec<String> {
	DatatypeSuffix::ALL.into_iter().map(|suffix| datatype_key(schema_id, suffix)).collect()
}

/// Every template-scoped per-schema search key.
pub fn template_datatype_keys(template_uuid: Uuid) -> Vec<String> {
	DatatypeSuffix::ALL
		.into_iter()
		.map(|suffix| template_datatype_key(template_uuid, suffix))
		.collect()
}

/// What invalidation needs to know about a schema to find its dependent keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationContext {
	pub schema_id: SchemaId,
	pub grandparent_id: SchemaId,
	/// Unique id of the template this schema was cloned from.
	pub template_uuid: Option<Uuid>,
	pub field_ids: Vec<FieldId>,
	/// Template field uuids the schema's fields descend from.
	pub template_field_uuids: Vec<Uuid>,
	pub option_ids: Vec<OptionId>,
}
impl InvalidationContext {
	/// Per-schema search keys, template-scoped ones included.
	pub fn datatype_keys(&self) -> Vec<String> {
		let mut keys = datatype_keys(self.schema_id);

		if let Some(uuid) = self.template_uuid {
			keys.extend(template_datatype_keys(uuid));
		}

		keys
	}

	/// Per-field and per-option search keys.
	pub fn field_keys(&self) -> Vec<String> {
		self.field_ids
			.iter()
			.map(|id| datafield_key(*id))
			.chain(self.template_field_uuids.iter().map(|uuid| template_datafield_key(*uuid)))
			.chain(self.option_ids.iter().map(|id| radio_option_key(*id)))
			.collect()
	}

	pub fn structure_keys(&self) -> Vec<String> {
		vec![
			schema_family_key(self.grandparent_id),
			schema_key(self.schema_id),
			master_theme_key(self.schema_id),
		]
	}
}

/// Stable entry name for one set of criteria inside a hashed cache map.
pub fn hash_criteria(payload: &Value) -> String {
	let versioned = serde_json::json!({
		"schema_version": CRITERIA_CACHE_SCHEMA_VERSION,
		"criteria": payload,
	});

	blake3::hash(versioned.to_string().as_bytes()).to_hex().to_string()
}
