//! Per-facet search predicates and the facet plan built from a search key.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use time::Date;
use uuid::Uuid;

use crate::{
	Error, Result,
	cache_keys::{self, DatatypeSuffix},
	grammar::{ParsedQuery, parse_query},
	model::{
		Field, FieldId, FieldType, OptionId, RecordId, Schema, SchemaEdge, SchemaId, SearchKind,
		TagId, UserId,
	},
	search_key::{Combine, FieldCriterion, PublicStatus, SearchKey},
};

/// One independently evaluated and cached criterion. Evaluation yields record ids of
/// `schema_id` only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "predicate", rename_all = "snake_case")]
pub enum Predicate {
	FieldText { schema_id: SchemaId, field_id: FieldId, field_type: FieldType, query: ParsedQuery },
	FieldBoolean { schema_id: SchemaId, field_id: FieldId, value: bool },
	FieldFile {
		schema_id: SchemaId,
		field_id: FieldId,
		field_type: FieldType,
		filename: Option<ParsedQuery>,
		has_file: Option<bool>,
	},
	FieldDate { schema_id: SchemaId, field_id: FieldId, after: Option<Date>, before: Option<Date> },
	OptionSelected { schema_id: SchemaId, field_id: FieldId, option_id: OptionId },
	TagSelected { schema_id: SchemaId, field_id: FieldId, tag_id: TagId },
	CreatedDate { schema_id: SchemaId, after: Option<Date>, before: Option<Date> },
	ModifiedDate { schema_id: SchemaId, after: Option<Date>, before: Option<Date> },
	CreatedBy { schema_id: SchemaId, user_id: UserId },
	ModifiedBy { schema_id: SchemaId, user_id: UserId },
	PublicStatus { schema_id: SchemaId, public: bool },
}
impl Predicate {
	pub fn schema_id(&self) -> SchemaId {
		match self {
			Self::FieldText { schema_id, .. }
			| Self::FieldBoolean { schema_id, .. }
			| Self::FieldFile { schema_id, .. }
			| Self::FieldDate { schema_id, .. }
			| Self::OptionSelected { schema_id, .. }
			| Self::TagSelected { schema_id, .. }
			| Self::CreatedDate { schema_id, .. }
			| Self::ModifiedDate { schema_id, .. }
			| Self::CreatedBy { schema_id, .. }
			| Self::ModifiedBy { schema_id, .. }
			| Self::PublicStatus { schema_id, .. } => *schema_id,
		}
	}

	/// Where the evaluated record ids are cached.
	pub fn cache_slot(&self) -> CacheSlot {
		let hashed = |key: String| CacheSlot { key, entry: Some(self.criteria_hash()) };

		match self {
			Self::OptionSelected { option_id, .. } =>
				CacheSlot { key: cache_keys::radio_option_key(*option_id), entry: None },
			Self::FieldText { field_id, .. }
			| Self::FieldBoolean { field_id, .. }
			| Self::FieldFile { field_id, .. }
			| Self::FieldDate { field_id, .. }
			| Self::TagSelected { field_id, .. } => hashed(cache_keys::datafield_key(*field_id)),
			Self::CreatedDate { schema_id, .. } =>
				hashed(cache_keys::datatype_key(*schema_id, DatatypeSuffix::CreatedDate)),
			Self::ModifiedDate { schema_id, .. } =>
				hashed(cache_keys::datatype_key(*schema_id, DatatypeSuffix::ModifiedDate)),
			Self::CreatedBy { schema_id, .. } =>
				hashed(cache_keys::datatype_key(*schema_id, DatatypeSuffix::CreatedBy)),
			Self::ModifiedBy { schema_id, .. } =>
				hashed(cache_keys::datatype_key(*schema_id, DatatypeSuffix::ModifiedBy)),
			Self::PublicStatus { schema_id, .. } =>
				hashed(cache_keys::datatype_key(*schema_id, DatatypeSuffix::PublicStatus)),
		}
	}

	fn criteria_hash(&self) -> String {
		cache_keys::hash_criteria(&serde_json::to_value(self).unwrap_or_default())
	}
}

/// A cache key plus, for hashed maps, the entry holding this criteria's result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheSlot {
	pub key: String,
	pub entry: Option<String>,
}

/// Predicates whose results combine into one record set of a single schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "facet", rename_all = "snake_case")]
pub enum Facet {
	Single(Predicate),
	/// Union over every field in the schema descending from one template field.
	Template { template_field_uuid: Uuid, schema_id: SchemaId, predicates: Vec<Predicate> },
	/// Radio or tag membership; unselected entries are complemented within the schema.
	Selection {
		schema_id: SchemaId,
		field_id: FieldId,
		selected: Vec<Predicate>,
		unselected: Vec<Predicate>,
		combine: Combine,
	},
}
impl Facet {
	pub fn schema_id(&self) -> SchemaId {
		match self {
			Self::Single(predicate) => predicate.schema_id(),
			Self::Template { schema_id, .. } | Self::Selection { schema_id, .. } => *schema_id,
		}
	}

	/// Evaluation order expected by [`Facet::combine`].
	pub fn predicates(&self) -> Vec<&Predicate> {
		match self {
			Self::Single(predicate) => vec![predicate],
			Self::Template { predicates, .. } => predicates.iter().collect(),
			Self::Selection { selected, unselected, .. } => selected.iter().chain(unselected).collect(),
		}
	}

	/// Facet-level cache slot for facets that cache their combined result.
	pub fn cache_slot(&self) -> Option<CacheSlot> {
		match self {
			Self::Template { template_field_uuid, .. } => Some(CacheSlot {
				key: cache_keys::template_datafield_key(*template_field_uuid),
				entry: Some(cache_keys::hash_criteria(&serde_json::to_value(self).unwrap_or_default())),
			}),
			Self::Single(_) | Self::Selection { .. } => None,
		}
	}

	/// Combines per-predicate results given in [`Facet::predicates`] order.
	pub fn combine(
		&self,
		results: Vec<BTreeSet<RecordId>>,
		schema_records: &BTreeSet<RecordId>,
	) -> BTreeSet<RecordId> {
		match self {
			Self::Single(_) => results.into_iter().next().unwrap_or_default(),
			Self::Template { .. } => results.into_iter().flatten().collect(),
			Self::Selection { selected, combine, .. } => {
				let mut sets = Vec::with_capacity(results.len());

				for (idx, result) in results.into_iter().enumerate() {
					if idx < selected.len() {
						sets.push(result);
					} else {
						sets.push(schema_records.difference(&result).copied().collect());
					}
				}

				match combine {
					Combine::Or => sets.into_iter().flatten().collect(),
					Combine::And => intersect_all(sets),
				}
			},
		}
	}
}

pub fn intersect_all(sets: impl IntoIterator<Item = BTreeSet<RecordId>>) -> BTreeSet<RecordId> {
	let mut sets = sets.into_iter();
	let Some(first) = sets.next() else {
		return BTreeSet::new();
	};

	sets.fold(first, |acc, set| acc.intersection(&set).copied().collect())
}

/// Schemas, fields and choices of a search family, already permission filtered when used
/// for planning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStructure {
	pub top_schema_id: SchemaId,
	pub schemas: BTreeMap<SchemaId, Schema>,
	pub edges: Vec<SchemaEdge>,
	pub fields: BTreeMap<FieldId, Field>,
	pub options: BTreeMap<OptionId, FieldId>,
	pub tags: BTreeMap<TagId, FieldId>,
}
impl SearchStructure {
	pub fn retain(
		&mut self,
		mut keep_schema: impl FnMut(&Schema) -> bool,
		mut keep_field: impl FnMut(&Field) -> bool,
	) {
		self.schemas.retain(|_, schema| keep_schema(schema));

		let schemas = &self.schemas;

		self.edges.retain(|edge| {
			schemas.contains_key(&edge.ancestor_id) && schemas.contains_key(&edge.descendant_id)
		});
		self.fields.retain(|_, field| schemas.contains_key(&field.schema_id) && keep_field(field));

		let fields = &self.fields;

		self.options.retain(|_, field_id| fields.contains_key(field_id));
		self.tags.retain(|_, field_id| fields.contains_key(field_id));
	}

	/// Fields in the family sourced from, or equal to, a template field.
	pub fn fields_for_template(&self, template_field_uuid: Uuid) -> Vec<&Field> {
		self.fields
			.values()
			.filter(|field| {
				field.template_field_uuid == Some(template_field_uuid)
					|| field.field_uuid == template_field_uuid
			})
			.collect()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralSearch {
	pub query: ParsedQuery,
	pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FacetPlan {
	pub by_schema: BTreeMap<SchemaId, Vec<Facet>>,
	pub general: Option<GeneralSearch>,
	/// Grammar fragments dropped while parsing text criteria.
	pub discarded: Vec<String>,
}
impl FacetPlan {
	/// Schemas carrying at least one advanced criterion.
	pub fn searched_schemas(&self) -> BTreeSet<SchemaId> {
		self.by_schema.keys().copied().collect()
	}
}

/// Builds the facet plan for a validated key against a permission-filtered structure.
pub fn plan_facets(
	key: &SearchKey,
	structure: &SearchStructure,
	max_terms: usize,
) -> Result<FacetPlan> {
	let mut plan = FacetPlan::default();

	for (field_id, criterion) in &key.fields {
		let field = structure.fields.get(field_id).ok_or_else(|| {
			Error::invalid_key(format!(
				"Field {field_id} is not part of schema {}.",
				structure.top_schema_id
			))
		})?;
		let facet = field_facet(field, criterion, structure, max_terms, &mut plan.discarded)?;

		plan.by_schema.entry(field.schema_id).or_default().push(facet);
	}

	for (schema_id, criteria) in &key.schemas {
		if !structure.schemas.contains_key(schema_id) {
			return Err(Error::invalid_key(format!(
				"Schema {schema_id} is not part of schema {}.",
				structure.top_schema_id
			)));
		}

		let facets = plan.by_schema.entry(*schema_id).or_default();
		let schema_id = *schema_id;

		if let Some(range) = &criteria.created {
			let (after, before) = range.bounds()?;

			facets.push(Facet::Single(Predicate::CreatedDate { schema_id, after, before }));
		}
		if let Some(range) = &criteria.modified {
			let (after, before) = range.bounds()?;

			facets.push(Facet::Single(Predicate::ModifiedDate { schema_id, after, before }));
		}
		if let Some(user_id) = criteria.created_by {
			facets.push(Facet::Single(Predicate::CreatedBy { schema_id, user_id }));
		}
		if let Some(user_id) = criteria.modified_by {
			facets.push(Facet::Single(Predicate::ModifiedBy { schema_id, user_id }));
		}
		if let Some(status) = criteria.public_status {
			facets.push(Facet::Single(Predicate::PublicStatus {
				schema_id,
				public: status == PublicStatus::Public,
			}));
		}
	}

	for (template_field_uuid, value) in &key.template_fields {
		let fields = structure.fields_for_template(*template_field_uuid);

		if fields.is_empty() {
			return Err(Error::invalid_key(format!(
				"Template field {template_field_uuid} has no searchable counterpart."
			)));
		}

		let query = parse_text(value, max_terms, &mut plan.discarded);
		let mut per_schema = BTreeMap::<SchemaId, Vec<Predicate>>::new();

		for field in fields {
			if !field.field_type.search_kind().is_general_searchable() {
				continue;
			}

			per_schema.entry(field.schema_id).or_default().push(Predicate::FieldText {
				schema_id: field.schema_id,
				field_id: field.id,
				field_type: field.field_type,
				query: query.clone(),
			});
		}

		for (schema_id, predicates) in per_schema {
			plan.by_schema.entry(schema_id).or_default().push(Facet::Template {
				template_field_uuid: *template_field_uuid,
				schema_id,
				predicates,
			});
		}
	}

	if let Some(general) = &key.general {
		let query = parse_text(general, max_terms, &mut plan.discarded);
		let predicates = structure
			.fields
			.values()
			.filter(|field| field.searchable && field.field_type.search_kind().is_general_searchable())
			.map(|field| Predicate::FieldText {
				schema_id: field.schema_id,
				field_id: field.id,
				field_type: field.field_type,
				query: query.clone(),
			})
			.collect();

		plan.general = Some(GeneralSearch { query, predicates });
	}

	plan.by_schema.retain(|_, facets| !facets.is_empty());

	Ok(plan)
}

fn parse_text(value: &str, max_terms: usize, discarded: &mut Vec<String>) -> ParsedQuery {
	let query = parse_query(value, max_terms);

	discarded.extend(query.discarded.iter().cloned());

	query
}

fn field_facet(
	field: &Field,
	criterion: &FieldCriterion,
	structure: &SearchStructure,
	max_terms: usize,
	discarded: &mut Vec<String>,
) -> Result<Facet> {
	let kind = field.field_type.search_kind();
	let mismatch = || {
		Error::invalid_key(format!(
			"Field {} of type {} does not accept this criterion.",
			field.id,
			field.field_type.as_str()
		))
	};
	let (schema_id, field_id) = (field.schema_id, field.id);

	let facet = match criterion {
		FieldCriterion::Text { value } => {
			if !matches!(kind, SearchKind::Text | SearchKind::Number) {
				return Err(mismatch());
			}

			Facet::Single(Predicate::FieldText {
				schema_id,
				field_id,
				field_type: field.field_type,
				query: parse_text(value, max_terms, discarded),
			})
		},
		FieldCriterion::Boolean { value } => {
			if kind != SearchKind::Boolean {
				return Err(mismatch());
			}

			Facet::Single(Predicate::FieldBoolean { schema_id, field_id, value: *value })
		},
		FieldCriterion::File { filename, has_file } => {
			if !matches!(kind, SearchKind::File | SearchKind::Image) {
				return Err(mismatch());
			}

			Facet::Single(Predicate::FieldFile {
				schema_id,
				field_id,
				field_type: field.field_type,
				filename: filename.as_deref().map(|raw| parse_text(raw, max_terms, discarded)),
				has_file: *has_file,
			})
		},
		FieldCriterion::DateRange { range } => {
			if kind != SearchKind::Date {
				return Err(mismatch());
			}

			let (after, before) = range.bounds()?;

			Facet::Single(Predicate::FieldDate { schema_id, field_id, after, before })
		},
		FieldCriterion::Radio { selected, unselected, combine } => {
			if kind != SearchKind::Radio {
				return Err(mismatch());
			}

			let option = |option_id: &OptionId| {
				if structure.options.get(option_id) != Some(&field_id) {
					return Err(Error::invalid_key(format!(
						"Option {option_id} does not belong to field {field_id}."
					)));
				}

				Ok(Predicate::OptionSelected { schema_id, field_id, option_id: *option_id })
			};

			Facet::Selection {
				schema_id,
				field_id,
				selected: selected.iter().map(option).collect::<Result<_>>()?,
				unselected: unselected.iter().map(option).collect::<Result<_>>()?,
				combine: *combine,
			}
		},
		FieldCriterion::Tag { selected, unselected, combine } => {
			if kind != SearchKind::Tag {
				return Err(mismatch());
			}

			let tag = |tag_id: &TagId| {
				if structure.tags.get(tag_id) != Some(&field_id) {
					return Err(Error::invalid_key(format!(
						"Tag {tag_id} does not belong to field {field_id}."
					)));
				}

				Ok(Predicate::TagSelected { schema_id, field_id, tag_id: *tag_id })
			};

			Facet::Selection {
				schema_id,
				field_id,
				selected: selected.iter().map(tag).collect::<Result<_>>()?,
				unselected: unselected.iter().map(tag).collect::<Result<_>>()?,
				combine: *combine,
			}
		},
	};

	Ok(facet)
}
