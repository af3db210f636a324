//! Explicit structural trees built from slim structure rows.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
	Error, Result,
	model::{FieldId, FieldType, SchemaEdge, SchemaId},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRow {
	pub id: SchemaId,
	pub master_template_id: Option<SchemaId>,
	pub parent_id: SchemaId,
	pub grandparent_id: SchemaId,
	pub metadata_for_id: Option<SchemaId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRow {
	pub id: FieldId,
	pub schema_id: SchemaId,
	pub field_uuid: Uuid,
	pub master_field_id: Option<FieldId>,
	pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRow {
	pub field_id: FieldId,
	pub uuid: Uuid,
	pub name: String,
	pub display_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEdgeRow {
	pub field_id: FieldId,
	pub parent_uuid: Uuid,
	pub child_uuid: Uuid,
}

/// Everything stacking needs for one family, excluding soft-deleted rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureRows {
	pub schemas: Vec<SchemaRow>,
	pub edges: Vec<SchemaEdge>,
	pub fields: Vec<FieldRow>,
	pub options: Vec<EntryRow>,
	pub tags: Vec<EntryRow>,
	pub tag_edges: Vec<TagEdgeRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntry {
	pub name: String,
	pub display_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackedField {
	pub id: FieldId,
	pub field_uuid: Uuid,
	pub master_field_id: Option<FieldId>,
	pub field_type: FieldType,
	pub options: BTreeMap<Uuid, NamedEntry>,
	pub tags: BTreeMap<Uuid, NamedEntry>,
	pub tag_tree: BTreeSet<(Uuid, Uuid)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackedDescendant {
	pub is_link: bool,
	pub multiple_allowed: bool,
	pub schema: StackedSchema,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackedSchema {
	pub id: SchemaId,
	pub master_template_id: Option<SchemaId>,
	pub is_top_level: bool,
	pub is_metadata: bool,
	pub fields: BTreeMap<FieldId, StackedField>,
	pub descendants: BTreeMap<SchemaId, StackedDescendant>,
}
impl StackedSchema {
	/// Derived field whose master reference points at `template_field_id`.
	pub fn field_by_master(&self, template_field_id: FieldId) -> Option<&StackedField> {
		self.fields.values().find(|field| field.master_field_id == Some(template_field_id))
	}

	/// Derived descendant cloned from `template_schema_id`.
	pub fn descendant_by_master(
		&self,
		template_schema_id: SchemaId,
	) -> Option<&StackedDescendant> {
		self.descendants
			.values()
			.find(|descendant| descendant.schema.master_template_id == Some(template_schema_id))
	}

	/// Every linked schema reachable from this node, keyed by id.
	pub fn linked_schemas(&self) -> BTreeMap<SchemaId, &StackedSchema> {
		let mut out = BTreeMap::new();

		collect_linked(self, &mut out);

		out
	}
}

struct RowIndex<'a> {
	schemas: HashMap<SchemaId, &'a SchemaRow>,
	edges: HashMap<SchemaId, Vec<&'a SchemaEdge>>,
	fields: HashMap<SchemaId, Vec<&'a FieldRow>>,
	options: HashMap<FieldId, Vec<&'a EntryRow>>,
	tags: HashMap<FieldId, Vec<&'a EntryRow>>,
	tag_edges: HashMap<FieldId, Vec<&'a TagEdgeRow>>,
}
impl<'a> RowIndex<'a> {
	fn new(rows: &'a StructureRows) -> Self {
		let mut index = Self {
			schemas: HashMap::new(),
			edges: HashMap::new(),
			fields: HashMap::new(),
			options: HashMap::new(),
			tags: HashMap::new(),
			tag_edges: HashMap::new(),
		};

		for schema in &rows.schemas {
			index.schemas.insert(schema.id, schema);
		}
		for edge in &rows.edges {
			index.edges.entry(edge.ancestor_id).or_default().push(edge);
		}
		for field in &rows.fields {
			index.fields.entry(field.schema_id).or_default().push(field);
		}
		for option in &rows.options {
			index.options.entry(option.field_id).or_default().push(option);
		}
		for tag in &rows.tags {
			index.tags.entry(tag.field_id).or_default().push(tag);
		}
		for edge in &rows.tag_edges {
			index.tag_edges.entry(edge.field_id).or_default().push(edge);
		}

		index
	}
}

/// Builds the structural tree rooted at `root_id`, following containment and link edges.
///
/// A link leading back into the current path is not followed again.
pub fn stack_family(rows: &StructureRows, root_id: SchemaId) -> Result<StackedSchema> {
	let index = RowIndex::new(rows);
	let mut path = BTreeSet::new();

	stack_schema(&index, root_id, &mut path)
}

fn stack_schema(
	index: &RowIndex<'_>,
	schema_id: SchemaId,
	path: &mut BTreeSet<SchemaId>,
) -> Result<StackedSchema> {
	let row = index
		.schemas
		.get(&schema_id)
		.ok_or_else(|| Error::structural(format!("Schema {schema_id} is missing from the structure rows.")))?;

	path.insert(schema_id);

	let mut fields = BTreeMap::new();

	for field in index.fields.get(&schema_id).into_iter().flatten() {
		fields.insert(field.id, stack_field(index, field));
	}

	let mut descendants = BTreeMap::new();

	for edge in index.edges.get(&schema_id).into_iter().flatten() {
		if path.contains(&edge.descendant_id) {
			continue;
		}

		let schema = stack_schema(index, edge.descendant_id, path)?;

		descendants.insert(
			edge.descendant_id,
			StackedDescendant { is_link: edge.is_link, multiple_allowed: edge.multiple_allowed, schema },
		);
	}

	path.remove(&schema_id);

	Ok(StackedSchema {
		id: row.id,
		master_template_id: row.master_template_id,
		is_top_level: row.parent_id == row.id && row.grandparent_id == row.id,
		is_metadata: row.metadata_for_id.is_some(),
		fields,
		descendants,
	})
}

fn stack_field(index: &RowIndex<'_>, field: &FieldRow) -> StackedField {
	let entries = |map: &HashMap<FieldId, Vec<&EntryRow>>| {
		map.get(&field.id)
			.into_iter()
			.flatten()
			.map(|entry| {
				(entry.uuid, NamedEntry { name: entry.name.clone(), display_order: entry.display_order })
			})
			.collect::<BTreeMap<_, _>>()
	};
	let tag_tree = index
		.tag_edges
		.get(&field.id)
		.into_iter()
		.flatten()
		.map(|edge| (edge.parent_uuid, edge.child_uuid))
		.collect();

	StackedField {
		id: field.id,
		field_uuid: field.field_uuid,
		master_field_id: field.master_field_id,
		field_type: field.field_type,
		options: entries(&index.options),
		tags: entries(&index.tags),
		tag_tree,
	}
}

fn collect_linked<'a>(schema: &'a StackedSchema, out: &mut BTreeMap<SchemaId, &'a StackedSchema>) {
	for descendant in schema.descendants.values() {
		if descendant.is_link {
			out.entry(descendant.schema.id).or_insert(&descendant.schema);
		}

		collect_linked(&descendant.schema, out);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn schema(id: SchemaId, parent: SchemaId, grandparent: SchemaId) -> SchemaRow {
		SchemaRow {
			id,
			master_template_id: None,
			parent_id: parent,
			grandparent_id: grandparent,
			metadata_for_id: None,
		}
	}

	#[test]
	fn stacks_children_and_stops_at_link_cycles() {
		let rows = StructureRows {
			schemas: vec![schema(1, 1, 1), schema(2, 1, 1), schema(3, 3, 3)],
			edges: vec![
				SchemaEdge { ancestor_id: 1, descendant_id: 2, is_link: false, multiple_allowed: true },
				SchemaEdge { ancestor_id: 2, descendant_id: 3, is_link: true, multiple_allowed: false },
				SchemaEdge { ancestor_id: 3, descendant_id: 1, is_link: true, multiple_allowed: false },
			],
			fields: vec![FieldRow {
				id: 10,
				schema_id: 2,
				field_uuid: Uuid::from_u128(10),
				master_field_id: None,
				field_type: FieldType::ShortVarchar,
			}],
			..Default::default()
		};
		let root = stack_family(&rows, 1).expect("Stacking should succeed.");

		assert!(root.is_top_level);

		let child = &root.descendants[&2];

		assert!(!child.is_link);
		assert!(child.schema.fields.contains_key(&10));

		let linked = &child.schema.descendants[&3];

		assert!(linked.is_link);
		assert!(linked.schema.descendants.is_empty());
		assert_eq!(root.linked_schemas().keys().copied().collect::<Vec<_>>(), vec![3]);
	}

	#[test]
	fn missing_root_is_structural() {
		let err = stack_family(&StructureRows::default(), 7).expect_err("Expected failure.");

		assert!(matches!(err, Error::Structural { .. }));
	}
}
