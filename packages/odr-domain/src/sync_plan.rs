//! Turns a changelist and its hydrated pools into an ordered list of store operations.
//!
//! New entities are addressed by arena ids until the applier assigns real ids inside its
//! transaction. The walk is depth-first, parent before child.

mod layout;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
	Error, Result,
	changelist::{Changelist, DescendantChanges, FieldChanges, SchemaChanges},
	hydrate::HydratedPools,
	model::{FieldId, FieldType, OptionId, Schema, SchemaId, TagId, ThemeKind},
};

pub use layout::IdRemap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NewId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
	Existing(i64),
	New(NewId),
}
impl EntityRef {
	pub fn existing(self) -> Option<i64> {
		match self {
			Self::Existing(id) => Some(id),
			Self::New(_) => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlannedSlot {
	Field { field: EntityRef },
	Schema { schema: EntityRef, child_theme: EntityRef },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncOp {
	/// `parent` and `grandparent` are `None` for a new top-level schema.
	CreateSchema {
		id: NewId,
		template_id: SchemaId,
		unique_id: Uuid,
		template_uuid: Uuid,
		parent: Option<EntityRef>,
		grandparent: Option<EntityRef>,
		name: String,
		description: String,
	},
	CreateSchemaEdge {
		ancestor: EntityRef,
		descendant: EntityRef,
		is_link: bool,
		multiple_allowed: bool,
	},
	CreateField {
		id: NewId,
		schema: EntityRef,
		master_field_id: FieldId,
		field_uuid: Uuid,
		template_field_uuid: Uuid,
		field_type: FieldType,
		name: String,
		description: String,
		required: bool,
		searchable: bool,
		is_public: bool,
	},
	CreateOption {
		field: EntityRef,
		option_uuid: Uuid,
		name: String,
		display_order: i32,
	},
	UpdateOption {
		option_id: OptionId,
		name: String,
		display_order: i32,
	},
	/// Also soft-deletes every radio selection of the option.
	DeleteOption {
		option_id: OptionId,
	},
	CreateTag {
		field: EntityRef,
		tag_uuid: Uuid,
		name: String,
		display_order: i32,
	},
	UpdateTag {
		tag_id: TagId,
		name: String,
		display_order: i32,
	},
	/// Also soft-deletes every tag selection and tag edge of the tag.
	DeleteTag {
		tag_id: TagId,
	},
	CreateTagEdge {
		field: EntityRef,
		parent_uuid: Uuid,
		child_uuid: Uuid,
	},
	DeleteTagEdge {
		edge_id: i64,
	},
	CreateTheme {
		id: NewId,
		schema: EntityRef,
		kind: ThemeKind,
		parent_theme: Option<EntityRef>,
		source_theme: Option<EntityRef>,
	},
	CreateLayoutGroup {
		id: NewId,
		theme: EntityRef,
		display_order: i32,
	},
	CreateLayoutSlot {
		group: EntityRef,
		display_order: i32,
		target: PlannedSlot,
	},
	/// Copies every group and slot of `from` into `to`.
	CopyThemeLayout {
		from: EntityRef,
		to: EntityRef,
	},
	/// Grants every group owned by `grandparent` its default rights on a new child schema.
	CopyGroupPermissions {
		schema: EntityRef,
		grandparent: EntityRef,
	},
	/// Creates the default groups for a new top-level schema.
	CreateDefaultGroups {
		schema: EntityRef,
	},
	GrantFieldPermissions {
		field: EntityRef,
		grandparent: EntityRef,
	},
	MarkOperational {
		schema: EntityRef,
	},
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
	pub derived_root_id: SchemaId,
	pub ops: Vec<SyncOp>,
	/// Number of arena ids handed out.
	pub arena_len: u32,
	/// Existing derived schemas that receive at least one operation.
	pub touched: BTreeSet<SchemaId>,
	pub created_schemas: Vec<NewId>,
	/// Existing derived linked schemas whose content changed.
	pub linked_targets: BTreeSet<SchemaId>,
}
impl SyncPlan {
	pub fn is_empty(&self) -> bool {
		self.ops.is_empty()
	}

	fn alloc(&mut self) -> NewId {
		let id = NewId(self.arena_len);

		self.arena_len += 1;

		id
	}
}

/// Result of applying a plan inside one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPlan {
	/// Real ids assigned to arena ids.
	pub ids: BTreeMap<NewId, i64>,
	/// Rows inserted, updated or soft-deleted.
	pub mutations: usize,
}
impl AppliedPlan {
	pub fn resolve(&self, entity: EntityRef) -> Option<i64> {
		match entity {
			EntityRef::Existing(id) => Some(id),
			EntityRef::New(id) => self.ids.get(&id).copied(),
		}
	}
}

#[derive(Debug, Clone, Copy)]
struct NodeContext {
	schema: EntityRef,
	grandparent: EntityRef,
	master_theme: Option<EntityRef>,
}

#[derive(Debug, Clone, Copy)]
struct LinkedTarget {
	schema: EntityRef,
	master_theme: Option<EntityRef>,
}

struct Planner<'a> {
	changelist: &'a Changelist,
	pools: &'a HydratedPools,
	plan: SyncPlan,
	/// Linked targets keyed by template schema id, either pre-existing or created earlier.
	linked: BTreeMap<SchemaId, LinkedTarget>,
}
impl<'a> Planner<'a> {
	fn master_theme(&self, ctx: &NodeContext) -> Result<EntityRef> {
		if let Some(theme) = ctx.master_theme {
			return Ok(theme);
		}

		match ctx.schema {
			EntityRef::Existing(id) =>
				Ok(EntityRef::Existing(self.pools.derived_theme(id)?.theme.id)),
			EntityRef::New(id) =>
				Err(Error::structural(format!("New schema {} has no master theme.", id.0))),
		}
	}

	fn sync_node(&mut self, changes: &'a SchemaChanges, ctx: NodeContext) -> Result<()> {
		let ops_before = self.plan.ops.len();
		let mut remap = IdRemap::default();

		for field in changes.fields.values() {
			self.sync_field(field, &ctx, &mut remap)?;
		}
		for (template_child_id, child) in &changes.descendants {
			self.sync_descendant(*template_child_id, child, &ctx, &mut remap)?;
		}

		if !remap.is_empty() {
			self.place_layout(changes, &ctx, &remap)?;
		}

		if self.plan.ops.len() > ops_before
			&& let EntityRef::Existing(id) = ctx.schema
		{
			self.plan.touched.insert(id);
		}

		Ok(())
	}

	fn sync_field(
		&mut self,
		field: &FieldChanges,
		ctx: &NodeContext,
		remap: &mut IdRemap,
	) -> Result<()> {
		let pools = self.pools;
		let template_field_id = field.template_field_id;
		let field_ref = match field.derived_field_id {
			Some(id) => EntityRef::Existing(id),
			None => {
				let template = pools.template.field(template_field_id)?;
				let id = self.plan.alloc();

				self.plan.ops.push(SyncOp::CreateField {
					id,
					schema: ctx.schema,
					master_field_id: template.id,
					field_uuid: Uuid::new_v4(),
					template_field_uuid: template.field_uuid,
					field_type: template.field_type,
					name: template.name.clone(),
					description: template.description.clone(),
					required: template.required,
					searchable: template.searchable,
					is_public: template.is_public,
				});
				self.plan.ops.push(SyncOp::GrantFieldPermissions {
					field: EntityRef::New(id),
					grandparent: ctx.grandparent,
				});
				remap.insert_field(template_field_id, EntityRef::New(id));

				EntityRef::New(id)
			},
		};

		for uuid in &field.options.created {
			let option = pools.template.option(template_field_id, *uuid)?;

			self.plan.ops.push(SyncOp::CreateOption {
				field: field_ref,
				option_uuid: *uuid,
				name: option.name.clone(),
				display_order: option.display_order,
			});
		}
		for uuid in &field.tags.created {
			let tag = pools.template.tag(template_field_id, *uuid)?;

			self.plan.ops.push(SyncOp::CreateTag {
				field: field_ref,
				tag_uuid: *uuid,
				name: tag.name.clone(),
				display_order: tag.display_order,
			});
		}
		for (parent_uuid, child_uuid) in &field.tag_tree.created {
			self.plan.ops.push(SyncOp::CreateTagEdge {
				field: field_ref,
				parent_uuid: *parent_uuid,
				child_uuid: *child_uuid,
			});
		}

		let Some(derived_field_id) = field.derived_field_id else {
			return Ok(());
		};

		for uuid in &field.options.updated {
			let source = pools.template.option(template_field_id, *uuid)?;
			let target = pools.derived.option(derived_field_id, *uuid)?;

			self.plan.ops.push(SyncOp::UpdateOption {
				option_id: target.id,
				name: source.name.clone(),
				display_order: source.display_order,
			});
		}
		for uuid in &field.options.deleted {
			let target = pools.derived.option(derived_field_id, *uuid)?;

			self.plan.ops.push(SyncOp::DeleteOption { option_id: target.id });
		}
		for uuid in &field.tags.updated {
			let source = pools.template.tag(template_field_id, *uuid)?;
			let target = pools.derived.tag(derived_field_id, *uuid)?;

			self.plan.ops.push(SyncOp::UpdateTag {
				tag_id: target.id,
				name: source.name.clone(),
				display_order: source.display_order,
			});
		}
		for (parent_uuid, child_uuid) in &field.tag_tree.deleted {
			let edge = pools.derived.tag_edge(derived_field_id, *parent_uuid, *child_uuid)?;

			self.plan.ops.push(SyncOp::DeleteTagEdge { edge_id: edge.id });
		}
		// Tags go after edges so edge deletions never target an already cascaded row.
		for uuid in &field.tags.deleted {
			let target = pools.derived.tag(derived_field_id, *uuid)?;

			self.plan.ops.push(SyncOp::DeleteTag { tag_id: target.id });
		}

		Ok(())
	}

	fn sync_descendant(
		&mut self,
		template_child_id: SchemaId,
		child: &'a DescendantChanges,
		parent: &NodeContext,
		remap: &mut IdRemap,
	) -> Result<()> {
		if let Some(derived_id) = child.changes.derived_id {
			let derived = self.pools.derived.schema(derived_id)?;
			let ctx = NodeContext {
				schema: EntityRef::Existing(derived_id),
				grandparent: EntityRef::Existing(derived.grandparent_id),
				master_theme: None,
			};
			let ops_before = self.plan.ops.len();

			self.sync_node(&child.changes, ctx)?;

			if child.is_link && self.plan.ops.len() > ops_before {
				self.plan.linked_targets.insert(derived_id);
			}

			return Ok(());
		}

		if child.is_link {
			return self.link_descendant(template_child_id, child, parent, remap);
		}

		let pools = self.pools;
		let template = pools.template.schema(template_child_id)?;
		let parent_theme = self.master_theme(parent)?;
		let schema_id = self.plan.alloc();
		let schema = EntityRef::New(schema_id);
		let theme = EntityRef::New(self.plan.alloc());

		self.push_new_schema(schema_id, template, Some(parent.schema), Some(parent.grandparent));
		self.plan.ops.push(SyncOp::CreateSchemaEdge {
			ancestor: parent.schema,
			descendant: schema,
			is_link: false,
			multiple_allowed: child.multiple_allowed,
		});
		self.push_theme(theme, schema, ThemeKind::Master, Some(parent_theme), None);
		self.plan.ops.push(SyncOp::CopyGroupPermissions { schema, grandparent: parent.grandparent });
		self.sync_node(
			&child.changes,
			NodeContext { schema, grandparent: parent.grandparent, master_theme: Some(theme) },
		)?;
		self.plan.ops.push(SyncOp::MarkOperational { schema });
		remap.insert_schema(template.id, schema, theme);

		Ok(())
	}

	fn link_descendant(
		&mut self,
		template_child_id: SchemaId,
		child: &'a DescendantChanges,
		parent: &NodeContext,
		remap: &mut IdRemap,
	) -> Result<()> {
		let target = match self.linked.get(&template_child_id).copied() {
			Some(target) => target,
			None => {
				let pools = self.pools;
				let template = pools.template.schema(template_child_id)?;
				let schema_id = self.plan.alloc();
				let schema = EntityRef::New(schema_id);
				let theme = EntityRef::New(self.plan.alloc());

				self.push_new_schema(schema_id, template, None, None);
				self.plan.ops.push(SyncOp::CreateDefaultGroups { schema });
				self.push_theme(theme, schema, ThemeKind::Master, None, None);

				let target = LinkedTarget { schema, master_theme: Some(theme) };

				// Registered before recursing so a nested reference reuses it.
				self.linked.insert(template_child_id, target);
				self.sync_node(
					&child.changes,
					NodeContext { schema, grandparent: schema, master_theme: Some(theme) },
				)?;
				self.plan.ops.push(SyncOp::MarkOperational { schema });

				target
			},
		};
		let target_theme = match target.master_theme {
			Some(theme) => theme,
			None => self.master_theme(&NodeContext {
				schema: target.schema,
				grandparent: target.schema,
				master_theme: None,
			})?,
		};
		let parent_theme = self.master_theme(parent)?;
		let copy_theme = EntityRef::New(self.plan.alloc());

		self.plan.ops.push(SyncOp::CreateSchemaEdge {
			ancestor: parent.schema,
			descendant: target.schema,
			is_link: true,
			multiple_allowed: child.multiple_allowed,
		});
		self.push_theme(
			copy_theme,
			target.schema,
			ThemeKind::LinkCopy,
			Some(parent_theme),
			Some(target_theme),
		);
		self.plan.ops.push(SyncOp::CopyThemeLayout { from: target_theme, to: copy_theme });
		remap.insert_schema(template_child_id, target.schema, copy_theme);

		Ok(())
	}

	fn place_layout(
		&mut self,
		changes: &SchemaChanges,
		ctx: &NodeContext,
		remap: &IdRemap,
	) -> Result<()> {
		let pools = self.pools;
		let theme = self.master_theme(ctx)?;
		let first_order = match ctx.schema {
			EntityRef::Existing(id) => pools.derived_theme(id)?.next_group_order(),
			EntityRef::New(_) => 0,
		};
		let template_layout = changes
			.copy_theme_structure
			.then(|| pools.template_layouts.get(&changes.template_id))
			.flatten();
		let mut alloc = || self.plan.alloc();
		let ops = match template_layout {
			Some(source) =>
				layout::clone_template_groups(source, remap, theme, first_order, &mut alloc),
			None => layout::append_group(remap, theme, first_order, &mut alloc),
		};

		self.plan.ops.extend(ops);

		Ok(())
	}

	fn push_new_schema(
		&mut self,
		id: NewId,
		template: &Schema,
		parent: Option<EntityRef>,
		grandparent: Option<EntityRef>,
	) {
		self.plan.ops.push(SyncOp::CreateSchema {
			id,
			template_id: template.id,
			unique_id: Uuid::new_v4(),
			template_uuid: template.unique_id,
			parent,
			grandparent,
			name: template.name.clone(),
			description: template.description.clone(),
		});
		self.plan.created_schemas.push(id);
	}

	fn push_theme(
		&mut self,
		theme: EntityRef,
		schema: EntityRef,
		kind: ThemeKind,
		parent_theme: Option<EntityRef>,
		source_theme: Option<EntityRef>,
	) {
		if let EntityRef::New(id) = theme {
			self.plan.ops.push(SyncOp::CreateTheme { id, schema, kind, parent_theme, source_theme });
		}
	}
}

/// Plans the operations that bring the derived family in line with the changelist.
///
/// Any entity the changelist references but the pools lack is a structural error.
pub fn plan_sync(changelist: &Changelist, pools: &HydratedPools) -> Result<SyncPlan> {
	let mut planner = Planner {
		changelist,
		pools,
		plan: SyncPlan { derived_root_id: changelist.derived_root_id, ..Default::default() },
		linked: BTreeMap::new(),
	};

	if changelist.is_empty() {
		return Ok(planner.plan);
	}

	let root = pools.derived.schema(changelist.derived_root_id)?;

	if pools.derived_groups.is_empty() {
		return Err(Error::structural(format!(
			"Schema {} has no permission groups.",
			changelist.derived_root_id
		)));
	}

	for (template_id, derived_id) in &planner.changelist.existing_linked {
		planner.linked.insert(
			*template_id,
			LinkedTarget { schema: EntityRef::Existing(*derived_id), master_theme: None },
		);
	}

	let ctx = NodeContext {
		schema: EntityRef::Existing(root.id),
		grandparent: EntityRef::Existing(root.grandparent_id),
		master_theme: None,
	};

	planner.sync_node(&changelist.root, ctx)?;

	Ok(planner.plan)
}

#[cfg(test)]
mod tests;
