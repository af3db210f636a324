//! Collects the entity references a changelist needs, and holds the batch-loaded pools.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
	Error, Result,
	changelist::{Changelist, SchemaChanges},
	model::{
		Field, FieldId, PermissionGroup, RadioOption, Schema, SchemaId, Tag, TagEdge, ThemeLayout,
	},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRefs {
	pub schema_ids: BTreeSet<SchemaId>,
	pub field_ids: BTreeSet<FieldId>,
	pub option_keys: BTreeSet<(FieldId, Uuid)>,
	pub tag_keys: BTreeSet<(FieldId, Uuid)>,
	pub tag_edge_keys: BTreeSet<(FieldId, Uuid, Uuid)>,
}
impl EntityRefs {
	pub fn option_field_ids(&self) -> BTreeSet<FieldId> {
		self.option_keys.iter().map(|(field_id, _)| *field_id).collect()
	}

	pub fn tag_field_ids(&self) -> BTreeSet<FieldId> {
		self.tag_keys.iter().map(|(field_id, _)| *field_id).collect()
	}

	pub fn tag_edge_field_ids(&self) -> BTreeSet<FieldId> {
		self.tag_edge_keys.iter().map(|(field_id, _, _)| *field_id).collect()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydrationRequest {
	pub template_root_id: SchemaId,
	pub derived_root_id: SchemaId,
	pub template: EntityRefs,
	pub derived: EntityRefs,
	/// Template schemas whose master theme layout may be cloned.
	pub template_layouts: BTreeSet<SchemaId>,
	/// Derived schemas whose master theme receives slots or serves as a link copy source.
	pub derived_themes: BTreeSet<SchemaId>,
}

/// Walks the changelist once and records every id or uuid each side needs.
pub fn plan_hydration(changelist: &Changelist) -> HydrationRequest {
	let mut request = HydrationRequest {
		template_root_id: changelist.template_root_id,
		derived_root_id: changelist.derived_root_id,
		template: EntityRefs::default(),
		derived: EntityRefs::default(),
		template_layouts: BTreeSet::new(),
		derived_themes: BTreeSet::new(),
	};

	request.derived.schema_ids.insert(changelist.derived_root_id);
	request.derived.schema_ids.extend(changelist.existing_linked.values().copied());
	request.derived_themes.extend(changelist.existing_linked.values().copied());
	changelist.root.walk(&mut |node| record_node(&mut request, node));

	request
}

fn record_node(request: &mut HydrationRequest, node: &SchemaChanges) {
	request.template.schema_ids.insert(node.template_id);

	if let Some(derived_id) = node.derived_id {
		request.derived.schema_ids.insert(derived_id);
	}

	let grows = node.is_create()
		|| node.fields.values().any(|field| field.is_create())
		|| node.descendants.values().any(|child| child.changes.is_create());

	if grows {
		request.template_layouts.insert(node.template_id);

		if let Some(derived_id) = node.derived_id {
			request.derived_themes.insert(derived_id);
		}
	}

	for field in node.fields.values() {
		let template_field_id = field.template_field_id;

		request.template.field_ids.insert(template_field_id);

		for uuid in field.options.created.iter().chain(&field.options.updated) {
			request.template.option_keys.insert((template_field_id, *uuid));
		}
		for uuid in field.tags.created.iter().chain(&field.tags.updated) {
			request.template.tag_keys.insert((template_field_id, *uuid));
		}

		let Some(derived_field_id) = field.derived_field_id else {
			continue;
		};

		request.derived.field_ids.insert(derived_field_id);

		for uuid in field.options.updated.iter().chain(&field.options.deleted) {
			request.derived.option_keys.insert((derived_field_id, *uuid));
		}
		for uuid in field.tags.updated.iter().chain(&field.tags.deleted) {
			request.derived.tag_keys.insert((derived_field_id, *uuid));
		}
		for (parent, child) in &field.tag_tree.deleted {
			request.derived.tag_edge_keys.insert((derived_field_id, *parent, *child));
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidePool {
	pub schemas: BTreeMap<SchemaId, Schema>,
	pub fields: BTreeMap<FieldId, Field>,
	pub options: BTreeMap<(FieldId, Uuid), RadioOption>,
	pub tags: BTreeMap<(FieldId, Uuid), Tag>,
	pub tag_edges: BTreeMap<(FieldId, Uuid, Uuid), TagEdge>,
}
impl SidePool {
	pub fn insert_option(&mut self, option: RadioOption) {
		self.options.insert((option.field_id, option.option_uuid), option);
	}

	pub fn insert_tag(&mut self, tag: Tag) {
		self.tags.insert((tag.field_id, tag.tag_uuid), tag);
	}

	pub fn insert_tag_edge(&mut self, edge: TagEdge) {
		self.tag_edges.insert((edge.field_id, edge.parent_uuid, edge.child_uuid), edge);
	}

	pub fn schema(&self, id: SchemaId) -> Result<&Schema> {
		self.schemas
			.get(&id)
			.ok_or_else(|| Error::structural(format!("Schema {id} was not hydrated.")))
	}

	pub fn field(&self, id: FieldId) -> Result<&Field> {
		self.fields.get(&id).ok_or_else(|| Error::structural(format!("Field {id} was not hydrated.")))
	}

	pub fn option(&self, field_id: FieldId, uuid: Uuid) -> Result<&RadioOption> {
		self.options.get(&(field_id, uuid)).ok_or_else(|| {
			Error::structural(format!("Option {uuid} of field {field_id} was not hydrated."))
		})
	}

	pub fn tag(&self, field_id: FieldId, uuid: Uuid) -> Result<&Tag> {
		self.tags.get(&(field_id, uuid)).ok_or_else(|| {
			Error::structural(format!("Tag {uuid} of field {field_id} was not hydrated."))
		})
	}

	pub fn tag_edge(&self, field_id: FieldId, parent: Uuid, child: Uuid) -> Result<&TagEdge> {
		self.tag_edges.get(&(field_id, parent, child)).ok_or_else(|| {
			Error::structural(format!(
				"Tag edge {parent} -> {child} of field {field_id} was not hydrated."
			))
		})
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydratedPools {
	pub template: SidePool,
	pub derived: SidePool,
	pub template_layouts: BTreeMap<SchemaId, ThemeLayout>,
	pub derived_themes: BTreeMap<SchemaId, ThemeLayout>,
	/// Permission groups owned by the derived root.
	pub derived_groups: Vec<PermissionGroup>,
}
impl HydratedPools {
	pub fn derived_theme(&self, schema_id: SchemaId) -> Result<&ThemeLayout> {
		self.derived_themes.get(&schema_id).ok_or_else(|| {
			Error::structural(format!("Schema {schema_id} has no master theme."))
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::changelist::{EdgeDiff, EntryDiff, FieldChanges};

	#[test]
	fn splits_template_and_derived_references() {
		let u = Uuid::from_u128;
		let field = FieldChanges {
			template_field_id: 10,
			derived_field_id: Some(20),
			options: EntryDiff {
				created: BTreeSet::from([u(1)]),
				updated: BTreeSet::from([u(2)]),
				deleted: BTreeSet::from([u(3)]),
			},
			tags: EntryDiff::default(),
			tag_tree: EdgeDiff { created: BTreeSet::new(), deleted: BTreeSet::from([(u(4), u(5))]) },
		};
		let changelist = Changelist {
			template_root_id: 1,
			derived_root_id: 2,
			root: SchemaChanges {
				template_id: 1,
				derived_id: Some(2),
				copy_theme_structure: false,
				fields: BTreeMap::from([(10, field)]),
				descendants: BTreeMap::new(),
			},
			field_type_changes: Vec::new(),
			existing_linked: BTreeMap::new(),
		};
		let request = plan_hydration(&changelist);

		assert_eq!(request.template.option_keys, BTreeSet::from([(10, u(1)), (10, u(2))]));
		assert_eq!(request.derived.option_keys, BTreeSet::from([(20, u(2)), (20, u(3))]));
		assert_eq!(request.derived.tag_edge_keys, BTreeSet::from([(20, u(4), u(5))]));
		assert!(request.template_layouts.is_empty());
		assert!(request.derived.schema_ids.contains(&2));
	}
}
