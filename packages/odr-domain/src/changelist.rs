use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{FieldId, FieldType, SchemaId};

/// Three-way diff of uuid-keyed entries (options or tags).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDiff {
	pub created: BTreeSet<Uuid>,
	pub updated: BTreeSet<Uuid>,
	pub deleted: BTreeSet<Uuid>,
}
impl EntryDiff {
	pub fn is_empty(&self) -> bool {
		self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
	}

	pub fn len(&self) -> usize {
		self.created.len() + self.updated.len() + self.deleted.len()
	}
}

/// Tag tree edges are binary facts, so there is no updated set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDiff {
	pub created: BTreeSet<(Uuid, Uuid)>,
	pub deleted: BTreeSet<(Uuid, Uuid)>,
}
impl EdgeDiff {
	pub fn is_empty(&self) -> bool {
		self.created.is_empty() && self.deleted.is_empty()
	}

	pub fn len(&self) -> usize {
		self.created.len() + self.deleted.len()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChanges {
	pub template_field_id: FieldId,
	/// `None` when the derived side has no field sourced from this template field yet.
	pub derived_field_id: Option<FieldId>,
	pub options: EntryDiff,
	pub tags: EntryDiff,
	pub tag_tree: EdgeDiff,
}
impl FieldChanges {
	pub fn is_create(&self) -> bool {
		self.derived_field_id.is_none()
	}

	pub fn is_empty(&self) -> bool {
		!self.is_create() && self.options.is_empty() && self.tags.is_empty() && self.tag_tree.is_empty()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescendantChanges {
	pub is_link: bool,
	pub multiple_allowed: bool,
	pub changes: SchemaChanges,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChanges {
	pub template_id: SchemaId,
	/// `None` when the derived side has no schema cloned from this template node yet.
	pub derived_id: Option<SchemaId>,
	/// True while the derived node holds no field sourced from the template.
	pub copy_theme_structure: bool,
	pub fields: BTreeMap<FieldId, FieldChanges>,
	pub descendants: BTreeMap<SchemaId, DescendantChanges>,
}
impl SchemaChanges {
	pub fn is_create(&self) -> bool {
		self.derived_id.is_none()
	}

	pub fn is_empty(&self) -> bool {
		!self.is_create() && self.fields.is_empty() && self.descendants.is_empty()
	}

	/// Depth-first, parent before child.
	pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a SchemaChanges)) {
		visit(self);

		for descendant in self.descendants.values() {
			descendant.changes.walk(visit);
		}
	}
}

/// Template field whose type class differs from its derived counterpart. Reported only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTypeChange {
	pub template_field_id: FieldId,
	pub derived_field_id: FieldId,
	pub template_type: FieldType,
	pub derived_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changelist {
	pub template_root_id: SchemaId,
	pub derived_root_id: SchemaId,
	pub root: SchemaChanges,
	pub field_type_changes: Vec<FieldTypeChange>,
	/// Derived linked schemas already present in the family, keyed by their template id.
	pub existing_linked: BTreeMap<SchemaId, SchemaId>,
}
impl Changelist {
	/// An empty changelist means the derived instance is fully synchronized.
	pub fn is_empty(&self) -> bool {
		self.root.is_empty()
	}

	/// Number of entries the changelist reports, counting a created subtree node as one.
	pub fn entry_count(&self) -> usize {
		let mut count = 0;

		self.root.walk(&mut |node| {
			if node.is_create() {
				count += 1;
			}

			for field in node.fields.values() {
				count += usize::from(field.is_create())
					+ field.options.len()
					+ field.tags.len()
					+ field.tag_tree.len();
			}
		});

		count
	}
}
