//! In-memory entity store for hermetic service tests.
//!
//! Reads and the plan applier follow the Postgres store row for row, including cascades and
//! mutation counts. Deletions are hard because nothing reads deleted rows back.

use std::{
	collections::{BTreeMap, BTreeSet},
	sync::{
		Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use time::{Date, OffsetDateTime};

use odr_domain::{
	cache_keys::InvalidationContext,
	grammar::ParsedQuery,
	hydrate::{EntityRefs, HydratedPools, HydrationRequest, SidePool},
	model::{
		Field, FieldId, GroupLayout, GroupPurpose, LayoutGroup, LayoutGroupId, LayoutSlot,
		OptionId, PermissionGroup, PermissionGroupId, RadioOption, Record, RecordId, Schema,
		SchemaEdge, SchemaId, SetupStep, SlotTarget, Tag, TagEdge, TagId, Theme, ThemeId,
		ThemeKind, ThemeLayout, UserId,
	},
	permissions::{FieldRights, SchemaRights, UserPermissions},
	predicate::{Predicate, SearchStructure},
	search_tree::RecordRow,
	stack::{EntryRow, FieldRow, SchemaRow, StructureRows, TagEdgeRow},
	sync_plan::{AppliedPlan, EntityRef, NewId, PlannedSlot, SyncOp, SyncPlan},
};
use odr_service::{BoxFuture, EntityStore, Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
	Text(String),
	Boolean(bool),
	Date(OffsetDateTime),
	File { filename: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueRow {
	pub record_id: RecordId,
	pub field_id: FieldId,
	pub value: StoredValue,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
	pub schemas: BTreeMap<SchemaId, Schema>,
	pub edges: Vec<SchemaEdge>,
	pub fields: BTreeMap<FieldId, Field>,
	pub options: BTreeMap<OptionId, RadioOption>,
	pub tags: BTreeMap<TagId, Tag>,
	pub tag_edges: BTreeMap<i64, TagEdge>,
	pub themes: BTreeMap<ThemeId, Theme>,
	pub layout_groups: BTreeMap<LayoutGroupId, LayoutGroup>,
	pub layout_slots: BTreeMap<i64, LayoutSlot>,
	pub permission_groups: BTreeMap<PermissionGroupId, PermissionGroup>,
	pub schema_rights: Vec<(PermissionGroupId, SchemaId, SchemaRights)>,
	pub field_rights: Vec<(PermissionGroupId, FieldId, FieldRights)>,
	/// User id to super admin flag.
	pub users: BTreeMap<UserId, bool>,
	pub memberships: BTreeSet<(UserId, PermissionGroupId)>,
	pub records: BTreeMap<RecordId, Record>,
	/// `(ancestor, descendant)` record links.
	pub linked_records: BTreeSet<(RecordId, RecordId)>,
	pub values: Vec<ValueRow>,
	pub radio_selections: BTreeSet<(RecordId, OptionId)>,
	pub tag_selections: BTreeSet<(RecordId, TagId)>,
	last_id: i64,
}
impl MemoryState {
	/// One id sequence shared by every table.
	pub fn next_id(&mut self) -> i64 {
		self.last_id += 1;

		self.last_id
	}

	pub fn schema(&self, schema_id: SchemaId) -> Result<&Schema> {
		self.schemas
			.get(&schema_id)
			.ok_or_else(|| Error::NotFound { message: format!("Schema {schema_id} does not exist.") })
	}

	pub fn family_ids(&self, root_id: SchemaId) -> Vec<SchemaId> {
		let mut seen = BTreeSet::from([root_id]);
		let mut queue = vec![root_id];

		while let Some(id) = queue.pop() {
			for edge in self.edges.iter().filter(|edge| edge.ancestor_id == id) {
				if self.schemas.contains_key(&edge.descendant_id) && seen.insert(edge.descendant_id) {
					queue.push(edge.descendant_id);
				}
			}
		}

		seen.into_iter().collect()
	}

	pub fn master_theme(&self, schema_id: SchemaId) -> Option<&Theme> {
		self.themes
			.values()
			.find(|theme| theme.schema_id == schema_id && theme.kind == ThemeKind::Master)
	}

	fn master_layout(&self, schema_id: SchemaId) -> Option<ThemeLayout> {
		let theme = self.master_theme(schema_id)?.clone();
		let mut groups = self
			.layout_groups
			.values()
			.filter(|group| group.theme_id == theme.id)
			.cloned()
			.collect::<Vec<_>>();

		groups.sort_by_key(|group| (group.display_order, group.id));

		let groups = groups
			.into_iter()
			.map(|group| {
				let mut slots = self
					.layout_slots
					.values()
					.filter(|slot| slot.group_id == group.id)
					.cloned()
					.collect::<Vec<_>>();

				slots.sort_by_key(|slot| (slot.display_order, slot.id));

				GroupLayout { group, slots }
			})
			.collect();

		Some(ThemeLayout { theme, groups })
	}

	fn edges_among(&self, ids: &BTreeSet<SchemaId>) -> Vec<SchemaEdge> {
		self.edges
			.iter()
			.filter(|edge| ids.contains(&edge.ancestor_id) && ids.contains(&edge.descendant_id))
			.copied()
			.collect()
	}

	fn structure_rows(&self, root_id: SchemaId) -> Result<StructureRows> {
		self.schema(root_id)?;

		let ids = self.family_ids(root_id).into_iter().collect::<BTreeSet<_>>();
		let fields =
			self.fields.values().filter(|field| ids.contains(&field.schema_id)).collect::<Vec<_>>();
		let field_ids = fields.iter().map(|field| field.id).collect::<BTreeSet<_>>();

		Ok(StructureRows {
			schemas: ids
				.iter()
				.filter_map(|id| self.schemas.get(id))
				.map(|schema| SchemaRow {
					id: schema.id,
					master_template_id: schema.master_template_id,
					parent_id: schema.parent_id,
					grandparent_id: schema.grandparent_id,
					metadata_for_id: schema.metadata_for_id,
				})
				.collect(),
			edges: self.edges_among(&ids),
			fields: fields
				.iter()
				.map(|field| FieldRow {
					id: field.id,
					schema_id: field.schema_id,
					field_uuid: field.field_uuid,
					master_field_id: field.master_field_id,
					field_type: field.field_type,
				})
				.collect(),
			options: self
				.options
				.values()
				.filter(|option| field_ids.contains(&option.field_id))
				.map(|option| EntryRow {
					field_id: option.field_id,
					uuid: option.option_uuid,
					name: option.name.clone(),
					display_order: option.display_order,
				})
				.collect(),
			tags: self
				.tags
				.values()
				.filter(|tag| field_ids.contains(&tag.field_id))
				.map(|tag| EntryRow {
					field_id: tag.field_id,
					uuid: tag.tag_uuid,
					name: tag.name.clone(),
					display_order: tag.display_order,
				})
				.collect(),
			tag_edges: self
				.tag_edges
				.values()
				.filter(|edge| field_ids.contains(&edge.field_id))
				.map(|edge| TagEdgeRow {
					field_id: edge.field_id,
					parent_uuid: edge.parent_uuid,
					child_uuid: edge.child_uuid,
				})
				.collect(),
		})
	}

	fn side(&self, refs: &EntityRefs) -> SidePool {
		let mut side = SidePool::default();

		for id in &refs.schema_ids {
			if let Some(schema) = self.schemas.get(id) {
				side.schemas.insert(*id, schema.clone());
			}
		}
		for id in &refs.field_ids {
			if let Some(field) = self.fields.get(id) {
				side.fields.insert(*id, field.clone());
			}
		}
		for option in self.options.values() {
			if refs.option_keys.contains(&(option.field_id, option.option_uuid)) {
				side.insert_option(option.clone());
			}
		}
		for tag in self.tags.values() {
			if refs.tag_keys.contains(&(tag.field_id, tag.tag_uuid)) {
				side.insert_tag(tag.clone());
			}
		}
		for edge in self.tag_edges.values() {
			if refs.tag_edge_keys.contains(&(edge.field_id, edge.parent_uuid, edge.child_uuid)) {
				side.insert_tag_edge(edge.clone());
			}
		}

		side
	}

	fn hydrate(&self, request: &HydrationRequest) -> HydratedPools {
		let layouts = |ids: &BTreeSet<SchemaId>| {
			ids.iter()
				.filter_map(|id| self.master_layout(*id).map(|layout| (*id, layout)))
				.collect::<BTreeMap<_, _>>()
		};

		HydratedPools {
			template: self.side(&request.template),
			derived: self.side(&request.derived),
			template_layouts: layouts(&request.template_layouts),
			derived_themes: layouts(&request.derived_themes),
			derived_groups: self.groups_of(request.derived_root_id),
		}
	}

	pub fn groups_of(&self, schema_id: SchemaId) -> Vec<PermissionGroup> {
		self.permission_groups.values().filter(|group| group.schema_id == schema_id).cloned().collect()
	}

	fn search_structure(&self, top_schema_id: SchemaId) -> Result<SearchStructure> {
		self.schema(top_schema_id)?;

		let ids = self.family_ids(top_schema_id).into_iter().collect::<BTreeSet<_>>();
		let fields = self
			.fields
			.values()
			.filter(|field| ids.contains(&field.schema_id))
			.map(|field| (field.id, field.clone()))
			.collect::<BTreeMap<_, _>>();

		Ok(SearchStructure {
			top_schema_id,
			schemas: ids
				.iter()
				.filter_map(|id| self.schemas.get(id).map(|schema| (*id, schema.clone())))
				.collect(),
			edges: self.edges_among(&ids),
			options: self
				.options
				.values()
				.filter(|option| fields.contains_key(&option.field_id))
				.map(|option| (option.id, option.field_id))
				.collect(),
			tags: self
				.tags
				.values()
				.filter(|tag| fields.contains_key(&tag.field_id))
				.map(|tag| (tag.id, tag.field_id))
				.collect(),
			fields,
		})
	}

	fn list_records(&self, schema_id: SchemaId) -> Vec<RecordRow> {
		self.records
			.values()
			.filter(|record| record.schema_id == schema_id)
			.map(|record| RecordRow {
				id: record.id,
				schema_id: record.schema_id,
				parent_id: record.parent_id,
				linked_from: self
					.linked_records
					.iter()
					.filter(|(ancestor, descendant)| {
						*descendant == record.id && self.records.contains_key(ancestor)
					})
					.map(|(ancestor, _)| *ancestor)
					.collect(),
				created_at: record.created_at,
				updated_at: record.updated_at,
				created_by: record.created_by,
				updated_by: record.updated_by,
				is_public: record.is_public(),
			})
			.collect()
	}

	fn values_of(&self, record_id: RecordId, field_id: FieldId) -> impl Iterator<Item = &StoredValue> {
		self.values
			.iter()
			.filter(move |row| row.record_id == record_id && row.field_id == field_id)
			.map(|row| &row.value)
	}

	fn records_where(
		&self,
		schema_id: SchemaId,
		test: impl Fn(&Record) -> bool,
	) -> BTreeSet<RecordId> {
		self.records
			.values()
			.filter(|record| record.schema_id == schema_id && test(record))
			.map(|record| record.id)
			.collect()
	}

	fn evaluate(&self, predicate: &Predicate) -> Result<BTreeSet<RecordId>> {
		let schema_id = predicate.schema_id();
		let ids = match predicate {
			Predicate::FieldText { field_id, field_type, query, .. } => {
				if field_type.value_table().is_none() {
					return Err(Error::InvalidRequest {
						message: format!("Field type {} stores no values.", field_type.as_str()),
					});
				}
				if query.is_empty() {
					return Ok(BTreeSet::new());
				}

				self.records_where(schema_id, |record| {
					let texts = self
						.values_of(record.id, *field_id)
						.filter_map(|value| match value {
							StoredValue::Text(text) => Some(text.as_str()),
							_ => None,
						})
						.collect::<Vec<_>>();

					matches_values(query, &texts)
				})
			},
			Predicate::FieldBoolean { field_id, value, .. } => {
				let set = |record: &Record| {
					self.values_of(record.id, *field_id).any(|v| *v == StoredValue::Boolean(true))
				};

				self.records_where(schema_id, |record| set(record) == *value)
			},
			Predicate::FieldFile { field_id, filename, has_file, .. } => {
				if filename.as_ref().is_some_and(ParsedQuery::is_empty) {
					return Ok(BTreeSet::new());
				}

				self.records_where(schema_id, |record| {
					let names = self
						.values_of(record.id, *field_id)
						.filter_map(|value| match value {
							StoredValue::File { filename } => Some(filename.as_str()),
							_ => None,
						})
						.collect::<Vec<_>>();

					has_file.is_none_or(|has| has == !names.is_empty())
						&& filename.as_ref().is_none_or(|query| matches_values(query, &names))
				})
			},
			Predicate::FieldDate { field_id, after, before, .. } =>
				self.records_where(schema_id, |record| {
					self.values_of(record.id, *field_id).any(|value| match value {
						StoredValue::Date(at) => in_range(*at, *after, *before),
						_ => false,
					})
				}),
			Predicate::OptionSelected { option_id, .. } => self.records_where(schema_id, |record| {
				self.radio_selections.contains(&(record.id, *option_id))
			}),
			Predicate::TagSelected { tag_id, .. } => self.records_where(schema_id, |record| {
				self.tag_selections.contains(&(record.id, *tag_id))
			}),
			Predicate::CreatedDate { after, before, .. } =>
				self.records_where(schema_id, |record| in_range(record.created_at, *after, *before)),
			Predicate::ModifiedDate { after, before, .. } =>
				self.records_where(schema_id, |record| in_range(record.updated_at, *after, *before)),
			Predicate::CreatedBy { user_id, .. } =>
				self.records_where(schema_id, |record| record.created_by == Some(*user_id)),
			Predicate::ModifiedBy { user_id, .. } =>
				self.records_where(schema_id, |record| record.updated_by == Some(*user_id)),
			Predicate::PublicStatus { public, .. } =>
				self.records_where(schema_id, |record| record.is_public() == *public),
		};

		Ok(ids)
	}

	fn permissions(&self, user_id: Option<UserId>) -> Result<UserPermissions> {
		let Some(user_id) = user_id else {
			return Ok(UserPermissions::anonymous());
		};
		let super_admin = *self
			.users
			.get(&user_id)
			.ok_or_else(|| Error::NotFound { message: format!("User {user_id} does not exist.") })?;
		let mut perms = if super_admin {
			UserPermissions::super_admin(user_id)
		} else {
			UserPermissions::for_user(user_id)
		};
		let groups = self
			.memberships
			.iter()
			.filter(|(member, group_id)| {
				*member == user_id && self.permission_groups.contains_key(group_id)
			})
			.map(|(_, group_id)| *group_id)
			.collect::<BTreeSet<_>>();

		for (group_id, schema_id, rights) in &self.schema_rights {
			if groups.contains(group_id) {
				perms.grant_schema(*schema_id, *rights);
			}
		}
		for (group_id, field_id, rights) in &self.field_rights {
			if groups.contains(group_id) {
				perms.grant_field(*field_id, *rights);
			}
		}

		Ok(perms)
	}

	fn invalidation_context(&self, schema_id: SchemaId) -> Result<InvalidationContext> {
		let schema = self.schema(schema_id)?;
		let fields =
			self.fields.values().filter(|field| field.schema_id == schema_id).collect::<Vec<_>>();

		Ok(InvalidationContext {
			schema_id,
			grandparent_id: schema.grandparent_id,
			template_uuid: schema.template_uuid,
			field_ids: fields.iter().map(|field| field.id).collect(),
			template_field_uuids: fields.iter().filter_map(|field| field.template_field_uuid).collect(),
			option_ids: self
				.options
				.values()
				.filter(|option| fields.iter().any(|field| field.id == option.field_id))
				.map(|option| option.id)
				.collect(),
		})
	}
}

/// A record with no stored value is tested as `""`.
fn matches_values(query: &ParsedQuery, values: &[&str]) -> bool {
	if values.is_empty() {
		return query.matches_empty();
	}

	values.iter().any(|value| query.matches(value))
}

fn in_range(at: OffsetDateTime, after: Option<Date>, before: Option<Date>) -> bool {
	let day = at.date();

	after.is_none_or(|after| day >= after) && before.is_none_or(|before| day <= before)
}

struct Applier<'a> {
	state: &'a mut MemoryState,
	user_id: UserId,
	ids: BTreeMap<NewId, i64>,
	mutations: usize,
}
impl Applier<'_> {
	fn resolve(&self, entity: EntityRef) -> Result<i64> {
		match entity {
			EntityRef::Existing(id) => Ok(id),
			EntityRef::New(id) => self.ids.get(&id).copied().ok_or_else(|| Error::InvalidRequest {
				message: format!("Arena id {} is used before it is created.", id.0),
			}),
		}
	}

	fn resolve_opt(&self, entity: Option<EntityRef>) -> Result<Option<i64>> {
		entity.map(|entity| self.resolve(entity)).transpose()
	}

	fn assign(&mut self, id: NewId, real: i64) {
		self.ids.insert(id, real);
		self.mutations += 1;
	}

	fn conflict(entity: &str, id: i64) -> Error {
		Error::Conflict { message: format!("{entity} {id} changed during sync.") }
	}

	fn apply(&mut self, op: &SyncOp) -> Result<()> {
		match op {
			SyncOp::CreateSchema {
				id,
				template_id,
				unique_id,
				template_uuid,
				parent,
				grandparent,
				name,
				description,
			} => {
				let is_public = self
					.state
					.schemas
					.get(template_id)
					.map(|template| template.is_public)
					.ok_or_else(|| Error::Conflict {
						message: format!("Template schema {template_id} disappeared during sync."),
					})?;
				let real = self.state.next_id();
				let parent_id = self.resolve_opt(*parent)?.unwrap_or(real);
				let grandparent_id = self.resolve_opt(*grandparent)?.unwrap_or(real);

				self.state.schemas.insert(real, Schema {
					id: real,
					unique_id: *unique_id,
					master_template_id: Some(*template_id),
					template_uuid: Some(*template_uuid),
					parent_id,
					grandparent_id,
					metadata_for_id: None,
					is_master_type: false,
					setup_step: SetupStep::Initial,
					is_public,
					name: name.clone(),
					description: description.clone(),
				});
				self.assign(*id, real);
			},
			SyncOp::CreateSchemaEdge { ancestor, descendant, is_link, multiple_allowed } => {
				let edge = SchemaEdge {
					ancestor_id: self.resolve(*ancestor)?,
					descendant_id: self.resolve(*descendant)?,
					is_link: *is_link,
					multiple_allowed: *multiple_allowed,
				};

				self.state.edges.push(edge);
				self.mutations += 1;
			},
			SyncOp::CreateField {
				id,
				schema,
				master_field_id,
				field_uuid,
				template_field_uuid,
				field_type,
				name,
				description,
				required,
				searchable,
				is_public,
			} => {
				let schema_id = self.resolve(*schema)?;
				let real = self.state.next_id();

				self.state.fields.insert(real, Field {
					id: real,
					schema_id,
					field_uuid: *field_uuid,
					master_field_id: Some(*master_field_id),
					template_field_uuid: Some(*template_field_uuid),
					field_type: *field_type,
					name: name.clone(),
					description: description.clone(),
					required: *required,
					searchable: *searchable,
					is_public: *is_public,
				});
				self.assign(*id, real);
			},
			SyncOp::CreateOption { field, option_uuid, name, display_order } => {
				let field_id = self.resolve(*field)?;
				let id = self.state.next_id();

				self.state.options.insert(id, RadioOption {
					id,
					field_id,
					option_uuid: *option_uuid,
					name: name.clone(),
					display_order: *display_order,
				});
				self.mutations += 1;
			},
			SyncOp::UpdateOption { option_id, name, display_order } => {
				let option = self
					.state
					.options
					.get_mut(option_id)
					.ok_or_else(|| Self::conflict("Option", *option_id))?;

				option.name = name.clone();
				option.display_order = *display_order;
				self.mutations += 1;
			},
			SyncOp::DeleteOption { option_id } => {
				self.state.options.remove(option_id).ok_or_else(|| Self::conflict("Option", *option_id))?;

				let before = self.state.radio_selections.len();

				self.state.radio_selections.retain(|(_, selected)| selected != option_id);
				self.mutations += 1 + before - self.state.radio_selections.len();
			},
			SyncOp::CreateTag { field, tag_uuid, name, display_order } => {
				let field_id = self.resolve(*field)?;
				let id = self.state.next_id();

				self.state.tags.insert(id, Tag {
					id,
					field_id,
					tag_uuid: *tag_uuid,
					name: name.clone(),
					display_order: *display_order,
				});
				self.mutations += 1;
			},
			SyncOp::UpdateTag { tag_id, name, display_order } => {
				let tag =
					self.state.tags.get_mut(tag_id).ok_or_else(|| Self::conflict("Tag", *tag_id))?;

				tag.name = name.clone();
				tag.display_order = *display_order;
				self.mutations += 1;
			},
			SyncOp::DeleteTag { tag_id } => {
				let tag =
					self.state.tags.remove(tag_id).ok_or_else(|| Self::conflict("Tag", *tag_id))?;
				let selections = self.state.tag_selections.len();
				let edges = self.state.tag_edges.len();

				self.state.tag_selections.retain(|(_, selected)| selected != tag_id);
				self.state.tag_edges.retain(|_, edge| {
					edge.field_id != tag.field_id
						|| (edge.parent_uuid != tag.tag_uuid && edge.child_uuid != tag.tag_uuid)
				});
				self.mutations += 1 + selections - self.state.tag_selections.len() + edges
					- self.state.tag_edges.len();
			},
			SyncOp::CreateTagEdge { field, parent_uuid, child_uuid } => {
				let field_id = self.resolve(*field)?;
				let id = self.state.next_id();

				self.state.tag_edges.insert(id, TagEdge {
					id,
					field_id,
					parent_uuid: *parent_uuid,
					child_uuid: *child_uuid,
				});
				self.mutations += 1;
			},
			SyncOp::DeleteTagEdge { edge_id } => {
				self.state
					.tag_edges
					.remove(edge_id)
					.ok_or_else(|| Self::conflict("Tag edge", *edge_id))?;
				self.mutations += 1;
			},
			SyncOp::CreateTheme { id, schema, kind, parent_theme, source_theme } => {
				let theme = Theme {
					id: self.state.next_id(),
					schema_id: self.resolve(*schema)?,
					parent_theme_id: self.resolve_opt(*parent_theme)?,
					source_theme_id: self.resolve_opt(*source_theme)?,
					kind: *kind,
				};
				let real = theme.id;

				self.state.themes.insert(real, theme);
				self.assign(*id, real);
			},
			SyncOp::CreateLayoutGroup { id, theme, display_order } => {
				let theme_id = self.resolve(*theme)?;
				let real = self.state.next_id();

				self.state
					.layout_groups
					.insert(real, LayoutGroup { id: real, theme_id, display_order: *display_order });
				self.assign(*id, real);
			},
			SyncOp::CreateLayoutSlot { group, display_order, target } => {
				let target = match target {
					PlannedSlot::Field { field } => SlotTarget::Field { field_id: self.resolve(*field)? },
					PlannedSlot::Schema { schema, child_theme } => SlotTarget::Schema {
						schema_id: self.resolve(*schema)?,
						child_theme_id: self.resolve(*child_theme)?,
					},
				};
				let group_id = self.resolve(*group)?;
				let id = self.state.next_id();

				self.state
					.layout_slots
					.insert(id, LayoutSlot { id, group_id, display_order: *display_order, target });
				self.mutations += 1;
			},
			SyncOp::CopyThemeLayout { from, to } => {
				let (from, to) = (self.resolve(*from)?, self.resolve(*to)?);

				self.mutations += self.state.copy_theme_layout(from, to);
			},
			SyncOp::CopyGroupPermissions { schema, grandparent } => {
				let (schema_id, grandparent_id) = (self.resolve(*schema)?, self.resolve(*grandparent)?);

				self.mutations += self.state.copy_group_permissions(schema_id, grandparent_id);
			},
			SyncOp::CreateDefaultGroups { schema } => {
				let schema_id = self.resolve(*schema)?;

				self.mutations += self.state.create_default_groups(schema_id, Some(self.user_id));
			},
			SyncOp::GrantFieldPermissions { field, grandparent } => {
				let (field_id, grandparent_id) = (self.resolve(*field)?, self.resolve(*grandparent)?);

				self.mutations += self.state.grant_field_permissions(field_id, grandparent_id);
			},
			SyncOp::MarkOperational { schema } => {
				let schema_id = self.resolve(*schema)?;

				if let Some(schema) = self.state.schemas.get_mut(&schema_id) {
					schema.setup_step = SetupStep::Operational;
					self.mutations += 1;
				}
			},
		}

		Ok(())
	}
}

impl MemoryState {
	/// Returns the number of rows written.
	pub(crate) fn copy_theme_layout(&mut self, from: ThemeId, to: ThemeId) -> usize {
		let mut groups = self
			.layout_groups
			.values()
			.filter(|group| group.theme_id == from)
			.cloned()
			.collect::<Vec<_>>();
		let mut written = 0;

		groups.sort_by_key(|group| (group.display_order, group.id));

		for source in groups {
			let group_id = self.next_id();
			let slots = self
				.layout_slots
				.values()
				.filter(|slot| slot.group_id == source.id)
				.cloned()
				.collect::<Vec<_>>();

			self.layout_groups.insert(group_id, LayoutGroup {
				id: group_id,
				theme_id: to,
				display_order: source.display_order,
			});

			for slot in &slots {
				let id = self.next_id();

				self.layout_slots.insert(id, LayoutSlot { id, group_id, ..slot.clone() });
			}

			written += 1 + slots.len();
		}

		written
	}

	pub(crate) fn copy_group_permissions(&mut self, schema_id: SchemaId, grandparent_id: SchemaId) -> usize {
		let copies = self
			.schema_rights
			.iter()
			.filter(|(group_id, target, _)| {
				*target == grandparent_id
					&& self
						.permission_groups
						.get(group_id)
						.is_some_and(|group| group.schema_id == grandparent_id)
			})
			.map(|(group_id, _, rights)| (*group_id, schema_id, *rights))
			.collect::<Vec<_>>();
		let written = copies.len();

		self.schema_rights.extend(copies);

		written
	}

	/// Default groups with their rights on `schema_id`; `admin` joins the admin group.
	pub(crate) fn create_default_groups(&mut self, schema_id: SchemaId, admin: Option<UserId>) -> usize {
		let mut written = 0;

		for purpose in GroupPurpose::DEFAULTS {
			let group_id = self.next_id();

			self.permission_groups.insert(group_id, PermissionGroup { id: group_id, schema_id, purpose });
			self.schema_rights.push((group_id, schema_id, SchemaRights::for_purpose(purpose)));

			written += 2;

			if purpose == GroupPurpose::Admin
				&& let Some(user_id) = admin
			{
				self.memberships.insert((user_id, group_id));

				written += 1;
			}
		}

		written
	}

	pub(crate) fn grant_field_permissions(&mut self, field_id: FieldId, grandparent_id: SchemaId) -> usize {
		let grants = self
			.groups_of(grandparent_id)
			.into_iter()
			.map(|group| (group.id, field_id, FieldRights::for_purpose(group.purpose)))
			.collect::<Vec<_>>();
		let written = grants.len();

		self.field_rights.extend(grants);

		written
	}
}

/// [`EntityStore`] over a [`MemoryState`]. Plans apply to a copy that replaces the state
/// only when every operation succeeds.
#[derive(Debug, Default)]
pub struct MemoryStore {
	state: Mutex<MemoryState>,
	evaluations: AtomicUsize,
}
impl MemoryStore {
	pub fn new(state: MemoryState) -> Self {
		Self { state: Mutex::new(state), evaluations: AtomicUsize::new(0) }
	}

	pub fn read<R>(&self, f: impl FnOnce(&MemoryState) -> R) -> R {
		f(&self.state.lock().unwrap_or_else(|err| err.into_inner()))
	}

	pub fn update<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
		f(&mut self.state.lock().unwrap_or_else(|err| err.into_inner()))
	}

	/// Predicates evaluated against the store, cache hits excluded.
	pub fn evaluations(&self) -> usize {
		self.evaluations.load(Ordering::Relaxed)
	}

	fn apply(&self, plan: &SyncPlan, user_id: UserId) -> Result<AppliedPlan> {
		let mut guard = self.state.lock().unwrap_or_else(|err| err.into_inner());
		let mut staged = guard.clone();
		let mut applier = Applier { state: &mut staged, user_id, ids: BTreeMap::new(), mutations: 0 };

		for op in &plan.ops {
			applier.apply(op)?;
		}

		let applied = AppliedPlan { ids: applier.ids, mutations: applier.mutations };

		*guard = staged;

		Ok(applied)
	}
}
impl EntityStore for MemoryStore {
	fn load_schema<'a>(&'a self, schema_id: SchemaId) -> BoxFuture<'a, Result<Schema>> {
		let result = self.read(|state| state.schema(schema_id).cloned());

		Box::pin(async move { result })
	}

	fn load_structure_rows<'a>(&'a self, root_id: SchemaId) -> BoxFuture<'a, Result<StructureRows>> {
		let result = self.read(|state| state.structure_rows(root_id));

		Box::pin(async move { result })
	}

	fn hydrate<'a>(&'a self, request: &'a HydrationRequest) -> BoxFuture<'a, Result<HydratedPools>> {
		let pools = self.read(|state| state.hydrate(request));

		Box::pin(async move { Ok(pools) })
	}

	fn apply_plan<'a>(
		&'a self,
		plan: &'a SyncPlan,
		user_id: UserId,
	) -> BoxFuture<'a, Result<AppliedPlan>> {
		let result = self.apply(plan, user_id);

		Box::pin(async move { result })
	}

	fn load_search_structure<'a>(
		&'a self,
		top_schema_id: SchemaId,
	) -> BoxFuture<'a, Result<SearchStructure>> {
		let result = self.read(|state| state.search_structure(top_schema_id));

		Box::pin(async move { result })
	}

	fn list_records<'a>(&'a self, schema_id: SchemaId) -> BoxFuture<'a, Result<Vec<RecordRow>>> {
		let rows = self.read(|state| state.list_records(schema_id));

		Box::pin(async move { Ok(rows) })
	}

	fn evaluate_predicate<'a>(
		&'a self,
		predicate: &'a Predicate,
	) -> BoxFuture<'a, Result<BTreeSet<RecordId>>> {
		self.evaluations.fetch_add(1, Ordering::Relaxed);

		let result = self.read(|state| state.evaluate(predicate));

		Box::pin(async move { result })
	}

	fn load_permissions<'a>(
		&'a self,
		user_id: Option<UserId>,
	) -> BoxFuture<'a, Result<UserPermissions>> {
		let result = self.read(|state| state.permissions(user_id));

		Box::pin(async move { result })
	}

	fn load_invalidation_context<'a>(
		&'a self,
		schema_id: SchemaId,
	) -> BoxFuture<'a, Result<InvalidationContext>> {
		let result = self.read(|state| state.invalidation_context(schema_id));

		Box::pin(async move { result })
	}
}
