//! Per-user view and admin rights.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Field, FieldId, GroupPurpose, Schema, SchemaId, UserId};

/// Boolean oracle consulted by sync and search.
pub trait PermissionOracle {
	fn can_view_schema(&self, schema: &Schema) -> bool;

	fn can_view_field(&self, field: &Field) -> bool;

	fn can_view_non_public(&self, schema_id: SchemaId) -> bool;

	fn is_schema_admin(&self, schema_id: SchemaId) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRights {
	pub view: bool,
	pub view_non_public: bool,
	pub edit: bool,
	pub admin: bool,
}
impl SchemaRights {
	/// Rights a default group of this purpose grants on its schemas.
	pub fn for_purpose(purpose: GroupPurpose) -> Self {
		match purpose {
			GroupPurpose::Admin => Self { view: true, view_non_public: true, edit: true, admin: true },
			GroupPurpose::EditAll =>
				Self { view: true, view_non_public: true, edit: true, admin: false },
			GroupPurpose::ViewAll => Self { view: true, view_non_public: true, ..Self::default() },
			GroupPurpose::ViewOnly => Self { view: true, ..Self::default() },
			GroupPurpose::Custom => Self::default(),
		}
	}

	fn union(self, other: Self) -> Self {
		Self {
			view: self.view || other.view,
			view_non_public: self.view_non_public || other.view_non_public,
			edit: self.edit || other.edit,
			admin: self.admin || other.admin,
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRights {
	pub view: bool,
	pub edit: bool,
}
impl FieldRights {
	pub fn for_purpose(purpose: GroupPurpose) -> Self {
		match purpose {
			GroupPurpose::Admin | GroupPurpose::EditAll => Self { view: true, edit: true },
			GroupPurpose::ViewAll | GroupPurpose::ViewOnly => Self { view: true, edit: false },
			GroupPurpose::Custom => Self::default(),
		}
	}
}

/// Rights merged over every group a user belongs to. `user_id` is `None` for anonymous
/// visitors, who only see public schemas and fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermissions {
	pub user_id: Option<UserId>,
	pub super_admin: bool,
	pub schemas: BTreeMap<SchemaId, SchemaRights>,
	pub fields: BTreeMap<FieldId, FieldRights>,
}
impl UserPermissions {
	pub fn anonymous() -> Self {
		Self::default()
	}

	pub fn for_user(user_id: UserId) -> Self {
		Self { user_id: Some(user_id), ..Self::default() }
	}

	pub fn super_admin(user_id: UserId) -> Self {
		Self { user_id: Some(user_id), super_admin: true, ..Self::default() }
	}

	pub fn is_anonymous(&self) -> bool {
		self.user_id.is_none()
	}

	/// Adds one group's rights on a schema; rights from several groups accumulate.
	pub fn grant_schema(&mut self, schema_id: SchemaId, rights: SchemaRights) {
		let entry = self.schemas.entry(schema_id).or_default();

		*entry = entry.union(rights);
	}

	pub fn grant_field(&mut self, field_id: FieldId, rights: FieldRights) {
		let entry = self.fields.entry(field_id).or_default();

		entry.view |= rights.view;
		entry.edit |= rights.edit;
	}

	fn schema_rights(&self, schema_id: SchemaId) -> SchemaRights {
		if self.is_anonymous() {
			return SchemaRights::default();
		}

		self.schemas.get(&schema_id).copied().unwrap_or_default()
	}
}
impl PermissionOracle for UserPermissions {
	fn can_view_schema(&self, schema: &Schema) -> bool {
		self.super_admin || schema.is_public || self.schema_rights(schema.id).view
	}

	fn can_view_field(&self, field: &Field) -> bool {
		if self.super_admin || field.is_public {
			return true;
		}
		if self.is_anonymous() {
			return false;
		}

		self.fields.get(&field.id).is_some_and(|rights| rights.view)
	}

	fn can_view_non_public(&self, schema_id: SchemaId) -> bool {
		self.super_admin || self.schema_rights(schema_id).view_non_public
	}

	fn is_schema_admin(&self, schema_id: SchemaId) -> bool {
		self.super_admin || self.schema_rights(schema_id).admin
	}
}

#[cfg(test)]
mod tests {
	use uuid::Uuid;

	use super::*;
	use crate::model::{FieldType, SetupStep};

	fn schema(id: SchemaId, is_public: bool) -> Schema {
		Schema {
			id,
			unique_id: Uuid::nil(),
			master_template_id: None,
			template_uuid: None,
			parent_id: id,
			grandparent_id: id,
			metadata_for_id: None,
			is_master_type: false,
			setup_step: SetupStep::Operational,
			is_public,
			name: "Samples".to_string(),
			description: String::new(),
		}
	}

	fn field(id: FieldId, is_public: bool) -> Field {
		Field {
			id,
			schema_id: 1,
			field_uuid: Uuid::nil(),
			master_field_id: None,
			template_field_uuid: None,
			field_type: FieldType::ShortVarchar,
			name: "Name".to_string(),
			description: String::new(),
			required: false,
			searchable: true,
			is_public,
		}
	}

	#[test]
	fn anonymous_sees_only_public_structure() {
		let mut perms = UserPermissions::anonymous();

		// Grants without a user never apply.
		perms.grant_schema(2, SchemaRights::for_purpose(GroupPurpose::Admin));

		assert!(perms.can_view_schema(&schema(1, true)));
		assert!(!perms.can_view_schema(&schema(2, false)));
		assert!(!perms.can_view_field(&field(5, false)));
		assert!(!perms.can_view_non_public(2));
		assert!(!perms.is_schema_admin(2));
	}

	#[test]
	fn group_rights_accumulate() {
		let mut perms = UserPermissions::for_user(7);

		perms.grant_schema(2, SchemaRights::for_purpose(GroupPurpose::ViewOnly));

		assert!(perms.can_view_schema(&schema(2, false)));
		assert!(!perms.can_view_non_public(2));

		perms.grant_schema(2, SchemaRights::for_purpose(GroupPurpose::ViewAll));
		perms.grant_field(5, FieldRights::for_purpose(GroupPurpose::ViewOnly));

		assert!(perms.can_view_non_public(2));
		assert!(!perms.is_schema_admin(2));
		assert!(perms.can_view_field(&field(5, false)));
		assert!(!perms.can_view_field(&field(6, false)));
	}

	#[test]
	fn super_admin_passes_every_check() {
		let perms = UserPermissions::super_admin(1);

		assert!(perms.can_view_schema(&schema(3, false)));
		assert!(perms.can_view_field(&field(9, false)));
		assert!(perms.can_view_non_public(3));
		assert!(perms.is_schema_admin(3));
	}
}
