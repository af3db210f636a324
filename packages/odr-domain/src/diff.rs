//! Structural comparison of a derived family against its master template.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::{
	Error, Result,
	changelist::{
		Changelist, DescendantChanges, EdgeDiff, EntryDiff, FieldChanges, FieldTypeChange,
		SchemaChanges,
	},
	model::SchemaId,
	stack::{NamedEntry, StackedField, StackedSchema},
};

#[derive(Default)]
struct DiffSession {
	field_type_changes: Vec<FieldTypeChange>,
	seen_links: BTreeSet<(SchemaId, SchemaId)>,
}
impl DiffSession {
	fn diff_schema(
		&mut self,
		template: &StackedSchema,
		derived: Option<&StackedSchema>,
	) -> SchemaChanges {
		let mut changes = SchemaChanges {
			template_id: template.id,
			derived_id: derived.map(|schema| schema.id),
			copy_theme_structure: true,
			fields: BTreeMap::new(),
			descendants: BTreeMap::new(),
		};

		for template_field in template.fields.values() {
			let derived_field = derived.and_then(|schema| schema.field_by_master(template_field.id));

			if derived_field.is_some() {
				changes.copy_theme_structure = false;
			}

			let field_changes = self.diff_field(template_field, derived_field);

			if !field_changes.is_empty() {
				changes.fields.insert(template_field.id, field_changes);
			}
		}

		for (template_child_id, template_child) in &template.descendants {
			let derived_child = derived
				.and_then(|schema| schema.descendant_by_master(*template_child_id));

			if let Some(derived_child) = derived_child
				&& template_child.is_link
				&& !self.seen_links.insert((*template_child_id, derived_child.schema.id))
			{
				continue;
			}

			let child_changes =
				self.diff_schema(&template_child.schema, derived_child.map(|child| &child.schema));

			if !child_changes.is_empty() {
				changes.descendants.insert(
					*template_child_id,
					DescendantChanges {
						is_link: template_child.is_link,
						multiple_allowed: template_child.multiple_allowed,
						changes: child_changes,
					},
				);
			}
		}

		changes
	}

	fn diff_field(
		&mut self,
		template: &StackedField,
		derived: Option<&StackedField>,
	) -> FieldChanges {
		let Some(derived) = derived else {
			return FieldChanges {
				template_field_id: template.id,
				derived_field_id: None,
				options: EntryDiff { created: template.options.keys().copied().collect(), ..Default::default() },
				tags: EntryDiff { created: template.tags.keys().copied().collect(), ..Default::default() },
				tag_tree: EdgeDiff { created: template.tag_tree.clone(), ..Default::default() },
			};
		};

		if template.field_type != derived.field_type {
			self.field_type_changes.push(FieldTypeChange {
				template_field_id: template.id,
				derived_field_id: derived.id,
				template_type: template.field_type,
				derived_type: derived.field_type,
			});
		}

		FieldChanges {
			template_field_id: template.id,
			derived_field_id: Some(derived.id),
			options: diff_entries(&template.options, &derived.options, |t, d| t.name != d.name),
			tags: diff_entries(&template.tags, &derived.tags, |t, d| {
				t.name != d.name || t.display_order != d.display_order
			}),
			tag_tree: EdgeDiff {
				created: template.tag_tree.difference(&derived.tag_tree).copied().collect(),
				deleted: derived.tag_tree.difference(&template.tag_tree).copied().collect(),
			},
		}
	}
}

/// Compares a derived family against its master template.
///
/// Both roots must be top-level, agree on being metadata or not, and the derived root must
/// be cloned from the template root. Derived fields and descendants that were not sourced
/// from the template are ignored, as are derived fields whose template counterpart is gone.
pub fn diff_families(template: &StackedSchema, derived: &StackedSchema) -> Result<Changelist> {
	if !template.is_top_level || !derived.is_top_level {
		return Err(Error::InvalidScope {
			message: format!(
				"Schemas {} and {} must both be top-level roots.",
				template.id, derived.id
			),
		});
	}
	if template.is_metadata != derived.is_metadata {
		return Err(Error::InvalidScope {
			message: format!(
				"Schemas {} and {} must both be metadata roots or both be data roots.",
				template.id, derived.id
			),
		});
	}
	if derived.master_template_id != Some(template.id) {
		return Err(Error::InvalidScope {
			message: format!("Schema {} is not derived from schema {}.", derived.id, template.id),
		});
	}

	let mut session = DiffSession::default();
	let root = session.diff_schema(template, Some(derived));
	let existing_linked = derived
		.linked_schemas()
		.into_iter()
		.filter_map(|(id, schema)| schema.master_template_id.map(|master| (master, id)))
		.collect();

	Ok(Changelist {
		template_root_id: template.id,
		derived_root_id: derived.id,
		root,
		field_type_changes: session.field_type_changes,
		existing_linked,
	})
}

fn diff_entries(
	template: &BTreeMap<Uuid, NamedEntry>,
	derived: &BTreeMap<Uuid, NamedEntry>,
	differs: impl Fn(&NamedEntry, &NamedEntry) -> bool,
) -> EntryDiff {
	let mut diff = EntryDiff::default();

	for (uuid, entry) in template {
		match derived.get(uuid) {
			None => {
				diff.created.insert(*uuid);
			},
			Some(existing) if differs(entry, existing) => {
				diff.updated.insert(*uuid);
			},
			Some(_) => {},
		}
	}
	for uuid in derived.keys() {
		if !template.contains_key(uuid) {
			diff.deleted.insert(*uuid);
		}
	}

	diff
}
