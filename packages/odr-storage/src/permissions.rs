use sqlx::PgPool;

use odr_domain::{
	model::UserId,
	permissions::{FieldRights, SchemaRights, UserPermissions},
};

use crate::{Error, Result};

#[derive(Debug, sqlx::FromRow)]
struct SchemaRightsRow {
	schema_id: i64,
	can_view: bool,
	can_view_non_public: bool,
	can_edit: bool,
	is_admin: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct FieldRightsRow {
	field_id: i64,
	can_view: bool,
	can_edit: bool,
}

/// Rights merged over the user's live groups. `None` loads the anonymous visitor.
pub async fn load_user_permissions(
	pool: &PgPool,
	user_id: Option<UserId>,
) -> Result<UserPermissions> {
	let Some(user_id) = user_id else {
		return Ok(UserPermissions::anonymous());
	};
	let super_admin = sqlx::query_scalar::<_, bool>(
		"SELECT is_super_admin FROM users WHERE id = $1 AND deleted_at IS NULL",
	)
	.bind(user_id)
	.fetch_optional(pool)
	.await?
	.ok_or_else(|| Error::NotFound(format!("User {user_id} does not exist.")))?;
	let mut perms = if super_admin {
		UserPermissions::super_admin(user_id)
	} else {
		UserPermissions::for_user(user_id)
	};
	let schema_rows = sqlx::query_as::<_, SchemaRightsRow>(
		"\
SELECT p.schema_id, p.can_view, p.can_view_non_public, p.can_edit, p.is_admin
FROM user_groups ug
JOIN permission_groups g ON g.id = ug.group_id AND g.deleted_at IS NULL
JOIN group_schema_permissions p ON p.group_id = g.id AND p.deleted_at IS NULL
WHERE ug.user_id = $1
	AND ug.deleted_at IS NULL",
	)
	.bind(user_id)
	.fetch_all(pool)
	.await?;

	for row in schema_rows {
		perms.grant_schema(row.schema_id, SchemaRights {
			view: row.can_view,
			view_non_public: row.can_view_non_public,
			edit: row.can_edit,
			admin: row.is_admin,
		});
	}

	let field_rows = sqlx::query_as::<_, FieldRightsRow>(
		"\
SELECT p.field_id, p.can_view, p.can_edit
FROM user_groups ug
JOIN permission_groups g ON g.id = ug.group_id AND g.deleted_at IS NULL
JOIN group_field_permissions p ON p.group_id = g.id AND p.deleted_at IS NULL
WHERE ug.user_id = $1
	AND ug.deleted_at IS NULL",
	)
	.bind(user_id)
	.fetch_all(pool)
	.await?;

	for row in field_rows {
		perms.grant_field(row.field_id, FieldRights { view: row.can_view, edit: row.can_edit });
	}

	Ok(perms)
}
