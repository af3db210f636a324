//! Builders for hermetic [`MemoryState`] fixtures.
//!
//! Every builder writes the same companion rows the application would: master themes with a
//! layout group, default permission groups on top-level schemas, and field rights for the
//! groups of the owning top-level schema.

use std::collections::{BTreeMap, VecDeque};

use time::{Duration, macros::datetime};
use uuid::Uuid;

use odr_domain::{
	model::{
		Field, FieldId, FieldType, GroupPurpose, LayoutGroup, LayoutSlot, NOT_PUBLIC_DATE,
		OptionId, RadioOption, Record, RecordId, Schema, SchemaEdge, SchemaId, SetupStep,
		SlotTarget, Tag, TagEdge, TagId, Theme, ThemeId, ThemeKind, UserId,
	},
	permissions::SchemaRights,
};

use crate::memory::{MemoryState, StoredValue, ValueRow};

impl MemoryState {
	pub fn add_user(&mut self, super_admin: bool) -> UserId {
		let id = self.next_id();

		self.users.insert(id, super_admin);

		id
	}

	/// A top-level template schema.
	pub fn add_top_schema(&mut self, name: &str, is_public: bool) -> SchemaId {
		let id = self.next_id();

		self.schemas.insert(id, Schema {
			id,
			unique_id: Uuid::new_v4(),
			master_template_id: None,
			template_uuid: None,
			parent_id: id,
			grandparent_id: id,
			metadata_for_id: None,
			is_master_type: true,
			setup_step: SetupStep::Operational,
			is_public,
			name: name.to_string(),
			description: String::new(),
		});
		self.add_master_theme(id, None);
		self.create_default_groups(id, None);

		id
	}

	/// A child of a template schema, contained by `parent_id`.
	pub fn add_child_schema(&mut self, parent_id: SchemaId, name: &str) -> SchemaId {
		let parent = self.schemas[&parent_id].clone();
		let id = self.next_id();

		self.schemas.insert(id, Schema {
			id,
			unique_id: Uuid::new_v4(),
			master_template_id: None,
			template_uuid: None,
			parent_id,
			grandparent_id: parent.grandparent_id,
			name: name.to_string(),
			..parent
		});
		self.edges.push(SchemaEdge {
			ancestor_id: parent_id,
			descendant_id: id,
			is_link: false,
			multiple_allowed: true,
		});

		let parent_theme = self.master_theme_id(parent_id);
		let theme_id = self.add_master_theme(id, parent_theme);

		self.add_slot(parent_id, SlotTarget::Schema { schema_id: id, child_theme_id: theme_id });
		self.copy_group_permissions(id, parent.grandparent_id);

		id
	}

	/// Links `descendant_id` under `ancestor_id` through a link-copy of its master theme.
	pub fn link_schema(&mut self, ancestor_id: SchemaId, descendant_id: SchemaId) {
		self.edges.push(SchemaEdge {
			ancestor_id,
			descendant_id,
			is_link: true,
			multiple_allowed: true,
		});

		let source = self.master_theme_id(descendant_id);
		let theme_id = self.next_id();

		self.themes.insert(theme_id, Theme {
			id: theme_id,
			schema_id: descendant_id,
			parent_theme_id: self.master_theme_id(ancestor_id),
			source_theme_id: source,
			kind: ThemeKind::LinkCopy,
		});

		if let Some(source) = source {
			self.copy_theme_layout(source, theme_id);
		}

		self.add_slot(
			ancestor_id,
			SlotTarget::Schema { schema_id: descendant_id, child_theme_id: theme_id },
		);
	}

	/// A searchable, public field placed in the schema's first layout group.
	pub fn add_field(&mut self, schema_id: SchemaId, name: &str, field_type: FieldType) -> FieldId {
		let id = self.next_id();
		let grandparent_id = self.schemas[&schema_id].grandparent_id;

		self.fields.insert(id, Field {
			id,
			schema_id,
			field_uuid: Uuid::new_v4(),
			master_field_id: None,
			template_field_uuid: None,
			field_type,
			name: name.to_string(),
			description: String::new(),
			required: false,
			searchable: true,
			is_public: true,
		});
		self.add_slot(schema_id, SlotTarget::Field { field_id: id });
		self.grant_field_permissions(id, grandparent_id);

		id
	}

	pub fn add_option(&mut self, field_id: FieldId, name: &str) -> OptionId {
		let id = self.next_id();
		let display_order =
			self.options.values().filter(|option| option.field_id == field_id).count() as i32;

		self.options.insert(id, RadioOption {
			id,
			field_id,
			option_uuid: Uuid::new_v4(),
			name: name.to_string(),
			display_order,
		});

		id
	}

	pub fn add_tag(&mut self, field_id: FieldId, name: &str, parent: Option<TagId>) -> TagId {
		let id = self.next_id();
		let display_order = self.tags.values().filter(|tag| tag.field_id == field_id).count() as i32;
		let tag_uuid = Uuid::new_v4();

		self.tags.insert(id, Tag { id, field_id, tag_uuid, name: name.to_string(), display_order });

		if let Some(parent_uuid) =
			parent.and_then(|parent| self.tags.get(&parent)).map(|tag| tag.tag_uuid)
		{
			let edge_id = self.next_id();

			self.tag_edges.insert(edge_id, TagEdge {
				id: edge_id,
				field_id,
				parent_uuid,
				child_uuid: tag_uuid,
			});
		}

		id
	}

	/// Clones the containment family of `template_id` into a new top-level derived schema
	/// that matches its template exactly. Linked descendants are left out.
	pub fn derive_from(&mut self, template_id: SchemaId, name: &str) -> SchemaId {
		let mut schema_map = BTreeMap::new();
		let mut theme_map = BTreeMap::new();
		let mut field_map = BTreeMap::new();
		let mut queue = VecDeque::from([template_id]);

		while let Some(source_id) = queue.pop_front() {
			let source = self.schemas[&source_id].clone();
			let id = self.next_id();
			let (parent_id, grandparent_id) = if source_id == template_id {
				(id, id)
			} else {
				(schema_map[&source.parent_id], schema_map[&template_id])
			};
			let parent_theme = (parent_id != id)
				.then(|| theme_map.get(&source.parent_id).map(|(_, theme_id)| *theme_id))
				.flatten();

			schema_map.insert(source_id, id);
			self.schemas.insert(id, Schema {
				id,
				unique_id: Uuid::new_v4(),
				master_template_id: Some(source_id),
				template_uuid: Some(source.unique_id),
				parent_id,
				grandparent_id,
				is_master_type: false,
				name: if source_id == template_id { name.to_string() } else { source.name.clone() },
				..source
			});

			if source_id == template_id {
				self.create_default_groups(id, None);
			} else {
				self.edges.push(SchemaEdge {
					ancestor_id: parent_id,
					descendant_id: id,
					is_link: false,
					multiple_allowed: true,
				});
				self.copy_group_permissions(id, grandparent_id);
			}

			if let Some(source_theme) = self.master_theme_id(source_id) {
				let theme_id = self.next_id();

				self.themes.insert(theme_id, Theme {
					id: theme_id,
					schema_id: id,
					parent_theme_id: parent_theme,
					source_theme_id: None,
					kind: ThemeKind::Master,
				});
				theme_map.insert(source_id, (source_theme, theme_id));
			}

			let fields = self
				.fields
				.values()
				.filter(|field| field.schema_id == source_id)
				.cloned()
				.collect::<Vec<_>>();

			for source_field in fields {
				let field_id = self.next_id();

				field_map.insert(source_field.id, field_id);
				self.fields.insert(field_id, Field {
					id: field_id,
					schema_id: id,
					field_uuid: Uuid::new_v4(),
					master_field_id: Some(source_field.id),
					template_field_uuid: Some(source_field.field_uuid),
					..source_field.clone()
				});
				self.grant_field_permissions(field_id, grandparent_id);
				self.clone_choices(source_field.id, field_id);
			}

			for edge in self.edges.clone() {
				if edge.ancestor_id == source_id && !edge.is_link {
					queue.push_back(edge.descendant_id);
				}
			}
		}

		for (source_theme, theme_id) in theme_map.values() {
			self.clone_layout(*source_theme, *theme_id, &schema_map, &theme_map, &field_map);
		}

		schema_map[&template_id]
	}

	pub fn add_to_group(&mut self, user_id: UserId, schema_id: SchemaId, purpose: GroupPurpose) {
		if let Some(group) =
			self.groups_of(schema_id).into_iter().find(|group| group.purpose == purpose)
		{
			self.memberships.insert((user_id, group.id));
		}
	}

	/// Grants `rights` on `schema_id` to the group of `purpose` owned by its top-level schema.
	pub fn grant_schema_rights(
		&mut self,
		schema_id: SchemaId,
		purpose: GroupPurpose,
		rights: SchemaRights,
	) {
		let grandparent_id = self.schemas[&schema_id].grandparent_id;

		if let Some(group) =
			self.groups_of(grandparent_id).into_iter().find(|group| group.purpose == purpose)
		{
			self.schema_rights.push((group.id, schema_id, rights));
		}
	}

	/// Records are created one hour apart in id order, starting 2024-01-01.
	pub fn add_record(
		&mut self,
		schema_id: SchemaId,
		parent: Option<RecordId>,
		public: bool,
	) -> RecordId {
		let id = self.next_id();
		let (parent_id, grandparent_id) = match parent.and_then(|parent| self.records.get(&parent)) {
			Some(parent) => (parent.id, parent.grandparent_id),
			None => (id, id),
		};
		let created_at = datetime!(2024-01-01 0:00 UTC) + Duration::hours(id);

		self.records.insert(id, Record {
			id,
			schema_id,
			parent_id,
			grandparent_id,
			created_at,
			updated_at: created_at,
			created_by: None,
			updated_by: None,
			public_date: if public { datetime!(2024-01-01 0:00 UTC) } else { NOT_PUBLIC_DATE },
		});

		id
	}

	pub fn link_records(&mut self, ancestor_id: RecordId, descendant_id: RecordId) {
		self.linked_records.insert((ancestor_id, descendant_id));
	}

	pub fn set_text(&mut self, record_id: RecordId, field_id: FieldId, text: &str) {
		self.set_value(record_id, field_id, StoredValue::Text(text.to_string()));
	}

	pub fn set_value(&mut self, record_id: RecordId, field_id: FieldId, value: StoredValue) {
		self.values.retain(|row| row.record_id != record_id || row.field_id != field_id);
		self.values.push(ValueRow { record_id, field_id, value });
	}

	pub fn select_option(&mut self, record_id: RecordId, option_id: OptionId) {
		self.radio_selections.insert((record_id, option_id));
	}

	pub fn select_tag(&mut self, record_id: RecordId, tag_id: TagId) {
		self.tag_selections.insert((record_id, tag_id));
	}

	fn master_theme_id(&self, schema_id: SchemaId) -> Option<ThemeId> {
		self.master_theme(schema_id).map(|theme| theme.id)
	}

	fn add_master_theme(
		&mut self,
		schema_id: SchemaId,
		parent_theme_id: Option<ThemeId>,
	) -> ThemeId {
		let theme_id = self.next_id();
		let group_id = self.next_id();

		self.themes.insert(theme_id, Theme {
			id: theme_id,
			schema_id,
			parent_theme_id,
			source_theme_id: None,
			kind: ThemeKind::Master,
		});
		self.layout_groups.insert(group_id, LayoutGroup { id: group_id, theme_id, display_order: 0 });

		theme_id
	}

	fn add_slot(&mut self, schema_id: SchemaId, target: SlotTarget) {
		let Some(theme_id) = self.master_theme_id(schema_id) else {
			return;
		};
		let Some(group_id) = self
			.layout_groups
			.values()
			.filter(|group| group.theme_id == theme_id)
			.min_by_key(|group| (group.display_order, group.id))
			.map(|group| group.id)
		else {
			return;
		};
		let display_order =
			self.layout_slots.values().filter(|slot| slot.group_id == group_id).count() as i32;
		let id = self.next_id();

		self.layout_slots.insert(id, LayoutSlot { id, group_id, display_order, target });
	}

	fn clone_choices(&mut self, source_field: FieldId, field_id: FieldId) {
		let options = self
			.options
			.values()
			.filter(|option| option.field_id == source_field)
			.cloned()
			.collect::<Vec<_>>();
		let tags =
			self.tags.values().filter(|tag| tag.field_id == source_field).cloned().collect::<Vec<_>>();
		let edges = self
			.tag_edges
			.values()
			.filter(|edge| edge.field_id == source_field)
			.cloned()
			.collect::<Vec<_>>();

		for option in options {
			let id = self.next_id();

			self.options.insert(id, RadioOption { id, field_id, ..option });
		}
		for tag in tags {
			let id = self.next_id();

			self.tags.insert(id, Tag { id, field_id, ..tag });
		}
		for edge in edges {
			let id = self.next_id();

			self.tag_edges.insert(id, TagEdge { id, field_id, ..edge });
		}
	}

	fn clone_layout(
		&mut self,
		source_theme: ThemeId,
		theme_id: ThemeId,
		schema_map: &BTreeMap<SchemaId, SchemaId>,
		theme_map: &BTreeMap<SchemaId, (ThemeId, ThemeId)>,
		field_map: &BTreeMap<FieldId, FieldId>,
	) {
		let groups = self
			.layout_groups
			.values()
			.filter(|group| group.theme_id == source_theme)
			.cloned()
			.collect::<Vec<_>>();

		for source_group in groups {
			let group_id = self.next_id();
			let slots = self
				.layout_slots
				.values()
				.filter(|slot| slot.group_id == source_group.id)
				.cloned()
				.collect::<Vec<_>>();

			self.layout_groups.insert(group_id, LayoutGroup {
				id: group_id,
				theme_id,
				display_order: source_group.display_order,
			});

			for slot in slots {
				let target = match slot.target {
					SlotTarget::Field { field_id } => match field_map.get(&field_id) {
						Some(field_id) => SlotTarget::Field { field_id: *field_id },
						None => continue,
					},
					SlotTarget::Schema { schema_id, .. } =>
						match (schema_map.get(&schema_id), theme_map.get(&schema_id)) {
							(Some(schema_id), Some((_, child_theme_id))) => SlotTarget::Schema {
								schema_id: *schema_id,
								child_theme_id: *child_theme_id,
							},
							_ => continue,
						},
				};
				let id = self.next_id();

				self.layout_slots.insert(id, LayoutSlot {
					id,
					group_id,
					display_order: slot.display_order,
					target,
				});
			}
		}
	}
}
