use time::OffsetDateTime;
use uuid::Uuid;

use odr_domain::{
	model::{
		Field, FieldType, GroupPurpose, LayoutGroup, LayoutSlot, PermissionGroup, RadioOption,
		Schema, SchemaEdge, SetupStep, SlotTarget, Tag, TagEdge, Theme, ThemeKind,
	},
	search_tree::RecordRow,
};

use crate::{Error, Result};

pub const SCHEMA_COLUMNS: &str = "id, unique_id, master_template_id, template_uuid, parent_id, \
	grandparent_id, metadata_for_id, is_master_type, setup_step, is_public, name, description";
pub const FIELD_COLUMNS: &str = "id, schema_id, field_uuid, master_field_id, template_field_uuid, \
	field_type, name, description, required, searchable, is_public";

#[derive(Debug, sqlx::FromRow)]
pub struct SchemaRecord {
	pub id: i64,
	pub unique_id: Uuid,
	pub master_template_id: Option<i64>,
	pub template_uuid: Option<Uuid>,
	pub parent_id: i64,
	pub grandparent_id: i64,
	pub metadata_for_id: Option<i64>,
	pub is_master_type: bool,
	pub setup_step: String,
	pub is_public: bool,
	pub name: String,
	pub description: String,
}
impl SchemaRecord {
	pub fn into_schema(self) -> Result<Schema> {
		let setup_step = SetupStep::parse(&self.setup_step).ok_or_else(|| {
			Error::InvalidArgument(format!(
				"Schema {} has unknown setup step {:?}.",
				self.id, self.setup_step
			))
		})?;

		Ok(Schema {
			id: self.id,
			unique_id: self.unique_id,
			master_template_id: self.master_template_id,
			template_uuid: self.template_uuid,
			parent_id: self.parent_id,
			grandparent_id: self.grandparent_id,
			metadata_for_id: self.metadata_for_id,
			is_master_type: self.is_master_type,
			setup_step,
			is_public: self.is_public,
			name: self.name,
			description: self.description,
		})
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct SchemaEdgeRecord {
	pub ancestor_id: i64,
	pub descendant_id: i64,
	pub is_link: bool,
	pub multiple_allowed: bool,
}
impl From<SchemaEdgeRecord> for SchemaEdge {
	fn from(row: SchemaEdgeRecord) -> Self {
		Self {
			ancestor_id: row.ancestor_id,
			descendant_id: row.descendant_id,
			is_link: row.is_link,
			multiple_allowed: row.multiple_allowed,
		}
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct FieldRecord {
	pub id: i64,
	pub schema_id: i64,
	pub field_uuid: Uuid,
	pub master_field_id: Option<i64>,
	pub template_field_uuid: Option<Uuid>,
	pub field_type: String,
	pub name: String,
	pub description: String,
	pub required: bool,
	pub searchable: bool,
	pub is_public: bool,
}
impl FieldRecord {
	pub fn into_field(self) -> Result<Field> {
		Ok(Field {
			id: self.id,
			schema_id: self.schema_id,
			field_uuid: self.field_uuid,
			master_field_id: self.master_field_id,
			template_field_uuid: self.template_field_uuid,
			field_type: FieldType::parse(&self.field_type)?,
			name: self.name,
			description: self.description,
			required: self.required,
			searchable: self.searchable,
			is_public: self.is_public,
		})
	}
}

/// Option or tag row; both tables share this shape.
#[derive(Debug, sqlx::FromRow)]
pub struct EntryRecord {
	pub id: i64,
	pub field_id: i64,
	pub uuid: Uuid,
	pub name: String,
	pub display_order: i32,
}
impl EntryRecord {
	pub fn into_option(self) -> RadioOption {
		RadioOption {
			id: self.id,
			field_id: self.field_id,
			option_uuid: self.uuid,
			name: self.name,
			display_order: self.display_order,
		}
	}

	pub fn into_tag(self) -> Tag {
		Tag {
			id: self.id,
			field_id: self.field_id,
			tag_uuid: self.uuid,
			name: self.name,
			display_order: self.display_order,
		}
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct TagEdgeRecord {
	pub id: i64,
	pub field_id: i64,
	pub parent_uuid: Uuid,
	pub child_uuid: Uuid,
}
impl From<TagEdgeRecord> for TagEdge {
	fn from(row: TagEdgeRecord) -> Self {
		Self {
			id: row.id,
			field_id: row.field_id,
			parent_uuid: row.parent_uuid,
			child_uuid: row.child_uuid,
		}
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct ThemeRecord {
	pub id: i64,
	pub schema_id: i64,
	pub parent_theme_id: Option<i64>,
	pub source_theme_id: Option<i64>,
	pub kind: String,
}
impl ThemeRecord {
	pub fn into_theme(self) -> Result<Theme> {
		let kind = ThemeKind::parse(&self.kind).ok_or_else(|| {
			Error::InvalidArgument(format!("Theme {} has unknown kind {:?}.", self.id, self.kind))
		})?;

		Ok(Theme {
			id: self.id,
			schema_id: self.schema_id,
			parent_theme_id: self.parent_theme_id,
			source_theme_id: self.source_theme_id,
			kind,
		})
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct LayoutGroupRecord {
	pub id: i64,
	pub theme_id: i64,
	pub display_order: i32,
}
impl From<LayoutGroupRecord> for LayoutGroup {
	fn from(row: LayoutGroupRecord) -> Self {
		Self { id: row.id, theme_id: row.theme_id, display_order: row.display_order }
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct LayoutSlotRecord {
	pub id: i64,
	pub group_id: i64,
	pub display_order: i32,
	pub field_id: Option<i64>,
	pub child_schema_id: Option<i64>,
	pub child_theme_id: Option<i64>,
}
impl LayoutSlotRecord {
	pub fn into_slot(self) -> Result<LayoutSlot> {
		let target = match (self.field_id, self.child_schema_id, self.child_theme_id) {
			(Some(field_id), None, _) => SlotTarget::Field { field_id },
			(None, Some(schema_id), Some(child_theme_id)) =>
				SlotTarget::Schema { schema_id, child_theme_id },
			_ =>
				return Err(Error::InvalidArgument(format!(
					"Layout slot {} has no valid target.",
					self.id
				))),
		};

		Ok(LayoutSlot {
			id: self.id,
			group_id: self.group_id,
			display_order: self.display_order,
			target,
		})
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct PermissionGroupRecord {
	pub id: i64,
	pub schema_id: i64,
	pub purpose: String,
}
impl PermissionGroupRecord {
	pub fn into_group(self) -> Result<PermissionGroup> {
		let purpose = GroupPurpose::parse(&self.purpose).ok_or_else(|| {
			Error::InvalidArgument(format!(
				"Permission group {} has unknown purpose {:?}.",
				self.id, self.purpose
			))
		})?;

		Ok(PermissionGroup { id: self.id, schema_id: self.schema_id, purpose })
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct RecordListRow {
	pub id: i64,
	pub schema_id: i64,
	pub parent_id: i64,
	pub linked_from: Vec<i64>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub created_by: Option<i64>,
	pub updated_by: Option<i64>,
	pub is_public: bool,
}
impl From<RecordListRow> for RecordRow {
	fn from(row: RecordListRow) -> Self {
		Self {
			id: row.id,
			schema_id: row.schema_id,
			parent_id: row.parent_id,
			linked_from: row.linked_from,
			created_at: row.created_at,
			updated_at: row.updated_at,
			created_by: row.created_by,
			updated_by: row.updated_by,
			is_public: row.is_public,
		}
	}
}
