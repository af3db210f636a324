use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, macros::datetime};
use uuid::Uuid;

use crate::{Error, Result};

pub type SchemaId = i64;
pub type FieldId = i64;
pub type OptionId = i64;
pub type TagId = i64;
pub type RecordId = i64;
pub type UserId = i64;
pub type ThemeId = i64;
pub type LayoutGroupId = i64;
pub type PermissionGroupId = i64;

/// Public date stored on records that must never become public.
pub const NOT_PUBLIC_DATE: OffsetDateTime = datetime!(2200-01-01 0:00 UTC);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStep {
	Initial,
	Operational,
}
impl SetupStep {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Initial => "initial",
			Self::Operational => "operational",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"initial" => Some(Self::Initial),
			"operational" => Some(Self::Operational),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
	Boolean,
	File,
	Image,
	IntegerValue,
	DecimalValue,
	LongText,
	LongVarchar,
	MediumVarchar,
	ShortVarchar,
	DatetimeValue,
	SingleRadio,
	MultipleRadio,
	SingleSelect,
	MultipleSelect,
	Tags,
	Markdown,
}
impl FieldType {
	pub const ALL: [Self; 16] = [
		Self::Boolean,
		Self::File,
		Self::Image,
		Self::IntegerValue,
		Self::DecimalValue,
		Self::LongText,
		Self::LongVarchar,
		Self::MediumVarchar,
		Self::ShortVarchar,
		Self::DatetimeValue,
		Self::SingleRadio,
		Self::MultipleRadio,
		Self::SingleSelect,
		Self::MultipleSelect,
		Self::Tags,
		Self::Markdown,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Boolean => "Boolean",
			Self::File => "File",
			Self::Image => "Image",
			Self::IntegerValue => "IntegerValue",
			Self::DecimalValue => "DecimalValue",
			Self::LongText => "LongText",
			Self::LongVarchar => "LongVarchar",
			Self::MediumVarchar => "MediumVarchar",
			Self::ShortVarchar => "ShortVarchar",
			Self::DatetimeValue => "DatetimeValue",
			Self::SingleRadio => "SingleRadio",
			Self::MultipleRadio => "MultipleRadio",
			Self::SingleSelect => "SingleSelect",
			Self::MultipleSelect => "MultipleSelect",
			Self::Tags => "Tags",
			Self::Markdown => "Markdown",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		Self::ALL
			.into_iter()
			.find(|field_type| field_type.as_str() == raw)
			.ok_or_else(|| Error::UnknownFieldType { value: raw.to_string() })
	}

	/// Table holding stored values for this type class, if it stores any.
	pub fn value_table(self) -> Option<&'static str> {
		match self {
			Self::Boolean => Some("boolean_values"),
			Self::File => Some("file_entries"),
			Self::Image => Some("image_entries"),
			Self::IntegerValue => Some("integer_values"),
			Self::DecimalValue => Some("decimal_values"),
			Self::LongText => Some("long_text_values"),
			Self::LongVarchar => Some("long_varchar_values"),
			Self::MediumVarchar => Some("medium_varchar_values"),
			Self::ShortVarchar => Some("short_varchar_values"),
			Self::DatetimeValue => Some("datetime_values"),
			Self::SingleRadio | Self::MultipleRadio | Self::SingleSelect | Self::MultipleSelect =>
				Some("radio_selections"),
			Self::Tags => Some("tag_selections"),
			Self::Markdown => None,
		}
	}

	pub fn search_kind(self) -> SearchKind {
		match self {
			Self::LongText | Self::LongVarchar | Self::MediumVarchar | Self::ShortVarchar =>
				SearchKind::Text,
			Self::IntegerValue | Self::DecimalValue => SearchKind::Number,
			Self::DatetimeValue => SearchKind::Date,
			Self::Boolean => SearchKind::Boolean,
			Self::File => SearchKind::File,
			Self::Image => SearchKind::Image,
			Self::SingleRadio | Self::MultipleRadio | Self::SingleSelect | Self::MultipleSelect =>
				SearchKind::Radio,
			Self::Tags => SearchKind::Tag,
			Self::Markdown => SearchKind::Unsearchable,
		}
	}

	pub fn has_options(self) -> bool {
		self.search_kind() == SearchKind::Radio
	}

	pub fn has_tags(self) -> bool {
		self == Self::Tags
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
	Text,
	Number,
	Date,
	Boolean,
	File,
	Image,
	Radio,
	Tag,
	Unsearchable,
}
impl SearchKind {
	/// Kinds the general text query runs against.
	pub fn is_general_searchable(self) -> bool {
		matches!(self, Self::Text | Self::Number)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
	pub id: SchemaId,
	pub unique_id: Uuid,
	pub master_template_id: Option<SchemaId>,
	pub template_uuid: Option<Uuid>,
	pub parent_id: SchemaId,
	pub grandparent_id: SchemaId,
	pub metadata_for_id: Option<SchemaId>,
	pub is_master_type: bool,
	pub setup_step: SetupStep,
	pub is_public: bool,
	pub name: String,
	pub description: String,
}
impl Schema {
	pub fn is_top_level(&self) -> bool {
		self.parent_id == self.id && self.grandparent_id == self.id
	}

	pub fn is_metadata(&self) -> bool {
		self.metadata_for_id.is_some()
	}

	pub fn is_template(&self) -> bool {
		self.master_template_id.is_none()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaEdge {
	pub ancestor_id: SchemaId,
	pub descendant_id: SchemaId,
	pub is_link: bool,
	pub multiple_allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
	pub id: FieldId,
	pub schema_id: SchemaId,
	pub field_uuid: Uuid,
	pub master_field_id: Option<FieldId>,
	pub template_field_uuid: Option<Uuid>,
	pub field_type: FieldType,
	pub name: String,
	pub description: String,
	pub required: bool,
	pub searchable: bool,
	pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioOption {
	pub id: OptionId,
	pub field_id: FieldId,
	pub option_uuid: Uuid,
	pub name: String,
	pub display_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
	pub id: TagId,
	pub field_id: FieldId,
	pub tag_uuid: Uuid,
	pub name: String,
	pub display_order: i32,
}

/// A parent/child link between two tags of the same field. Identity is the uuid pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEdge {
	pub id: i64,
	pub field_id: FieldId,
	pub parent_uuid: Uuid,
	pub child_uuid: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThemeKind {
	Master,
	LinkCopy,
}
impl ThemeKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Master => "master",
			Self::LinkCopy => "link_copy",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"master" => Some(Self::Master),
			"link_copy" => Some(Self::LinkCopy),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
	pub id: ThemeId,
	pub schema_id: SchemaId,
	pub parent_theme_id: Option<ThemeId>,
	pub source_theme_id: Option<ThemeId>,
	pub kind: ThemeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutGroup {
	pub id: LayoutGroupId,
	pub theme_id: ThemeId,
	pub display_order: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotTarget {
	Field { field_id: FieldId },
	Schema { schema_id: SchemaId, child_theme_id: ThemeId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSlot {
	pub id: i64,
	pub group_id: LayoutGroupId,
	pub display_order: i32,
	pub target: SlotTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLayout {
	pub group: LayoutGroup,
	pub slots: Vec<LayoutSlot>,
}

/// A schema's master theme with its groups and slots in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeLayout {
	pub theme: Theme,
	pub groups: Vec<GroupLayout>,
}
impl ThemeLayout {
	pub fn next_group_order(&self) -> i32 {
		self.groups.iter().map(|group| group.group.display_order + 1).max().unwrap_or(0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPurpose {
	Admin,
	EditAll,
	ViewAll,
	ViewOnly,
	Custom,
}
impl GroupPurpose {
	pub const DEFAULTS: [Self; 4] = [Self::Admin, Self::EditAll, Self::ViewAll, Self::ViewOnly];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Admin => "admin",
			Self::EditAll => "edit_all",
			Self::ViewAll => "view_all",
			Self::ViewOnly => "view_only",
			Self::Custom => "custom",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"admin" => Some(Self::Admin),
			"edit_all" => Some(Self::EditAll),
			"view_all" => Some(Self::ViewAll),
			"view_only" => Some(Self::ViewOnly),
			"custom" => Some(Self::Custom),
			_ => None,
		}
	}

	/// Whether members may see non-public records of schemas this group covers by default.
	pub fn views_non_public(self) -> bool {
		matches!(self, Self::Admin | Self::EditAll | Self::ViewAll)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroup {
	pub id: PermissionGroupId,
	pub schema_id: SchemaId,
	pub purpose: GroupPurpose,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
	pub id: RecordId,
	pub schema_id: SchemaId,
	pub parent_id: RecordId,
	pub grandparent_id: RecordId,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub created_by: Option<UserId>,
	pub updated_by: Option<UserId>,
	pub public_date: OffsetDateTime,
}
impl Record {
	pub fn is_public(&self) -> bool {
		self.public_date < NOT_PUBLIC_DATE
	}

	pub fn is_top_level(&self) -> bool {
		self.parent_id == self.id
	}
}
