//! Applies a sync plan inside one transaction.
//!
//! Every operation either succeeds or the whole plan rolls back. Deletions are soft.

use std::collections::BTreeMap;

use sqlx::{PgConnection, PgPool};

use odr_domain::{
	model::{GroupPurpose, SetupStep, UserId},
	permissions::{FieldRights, SchemaRights},
	sync_plan::{AppliedPlan, EntityRef, NewId, PlannedSlot, SyncOp, SyncPlan},
};

use crate::{Error, Result, models::PermissionGroupRecord};

struct Applier {
	user_id: UserId,
	ids: BTreeMap<NewId, i64>,
	mutations: usize,
}
impl Applier {
	fn resolve(&self, entity: EntityRef) -> Result<i64> {
		match entity {
			EntityRef::Existing(id) => Ok(id),
			EntityRef::New(id) => self.ids.get(&id).copied().ok_or_else(|| {
				Error::InvalidArgument(format!("Arena id {} is used before it is created.", id.0))
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

	fn count(&mut self, rows: u64) {
		self.mutations += rows as usize;
	}

	async fn apply(&mut self, conn: &mut PgConnection, op: &SyncOp) -> Result<()> {
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
				let real: i64 =
					sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('schemas', 'id'))")
						.fetch_one(&mut *conn)
						.await?;
				let parent_id = self.resolve_opt(*parent)?.unwrap_or(real);
				let grandparent_id = self.resolve_opt(*grandparent)?.unwrap_or(real);
				let inserted = sqlx::query(
					"\
INSERT INTO schemas (
	id,
	unique_id,
	master_template_id,
	template_uuid,
	parent_id,
	grandparent_id,
	is_master_type,
	setup_step,
	is_public,
	name,
	description,
	created_by
)
SELECT $1, $2, t.id, $3, $4, $5, false, $6, t.is_public, $7, $8, $9
FROM schemas t
WHERE t.id = $10
	AND t.deleted_at IS NULL",
				)
				.bind(real)
				.bind(unique_id)
				.bind(template_uuid)
				.bind(parent_id)
				.bind(grandparent_id)
				.bind(SetupStep::Initial.as_str())
				.bind(name)
				.bind(description)
				.bind(self.user_id)
				.bind(template_id)
				.execute(&mut *conn)
				.await?;

				if inserted.rows_affected() == 0 {
					return Err(Error::Conflict(format!(
						"Template schema {template_id} disappeared during sync."
					)));
				}

				self.assign(*id, real);
			},
			SyncOp::CreateSchemaEdge { ancestor, descendant, is_link, multiple_allowed } => {
				let result = sqlx::query(
					"\
INSERT INTO schema_edges (ancestor_id, descendant_id, is_link, multiple_allowed)
VALUES ($1, $2, $3, $4)",
				)
				.bind(self.resolve(*ancestor)?)
				.bind(self.resolve(*descendant)?)
				.bind(is_link)
				.bind(multiple_allowed)
				.execute(&mut *conn)
				.await?;

				self.count(result.rows_affected());
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
				let real: i64 = sqlx::query_scalar(
					"\
INSERT INTO fields (
	schema_id,
	field_uuid,
	master_field_id,
	template_field_uuid,
	field_type,
	name,
	description,
	required,
	searchable,
	is_public
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
RETURNING id",
				)
				.bind(self.resolve(*schema)?)
				.bind(field_uuid)
				.bind(master_field_id)
				.bind(template_field_uuid)
				.bind(field_type.as_str())
				.bind(name)
				.bind(description)
				.bind(required)
				.bind(searchable)
				.bind(is_public)
				.fetch_one(&mut *conn)
				.await?;

				self.assign(*id, real);
			},
			SyncOp::CreateOption { field, option_uuid, name, display_order } => {
				let result = sqlx::query(
					"\
INSERT INTO radio_options (field_id, option_uuid, name, display_order)
VALUES ($1, $2, $3, $4)",
				)
				.bind(self.resolve(*field)?)
				.bind(option_uuid)
				.bind(name)
				.bind(display_order)
				.execute(&mut *conn)
				.await?;

				self.count(result.rows_affected());
			},
			SyncOp::UpdateOption { option_id, name, display_order } => {
				let result = sqlx::query(
					"\
UPDATE radio_options
SET name = $1, display_order = $2
WHERE id = $3
	AND deleted_at IS NULL",
				)
				.bind(name)
				.bind(display_order)
				.bind(option_id)
				.execute(&mut *conn)
				.await?;

				self.expect_row(result.rows_affected(), "Option", *option_id)?;
			},
			SyncOp::DeleteOption { option_id } => {
				let result = sqlx::query(
					"UPDATE radio_options SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
				)
				.bind(option_id)
				.execute(&mut *conn)
				.await?;

				self.expect_row(result.rows_affected(), "Option", *option_id)?;

				let cascaded = sqlx::query(
					"\
UPDATE radio_selections
SET deleted_at = now()
WHERE option_id = $1
	AND deleted_at IS NULL",
				)
				.bind(option_id)
				.execute(&mut *conn)
				.await?;

				self.count(cascaded.rows_affected());
			},
			SyncOp::CreateTag { field, tag_uuid, name, display_order } => {
				let result = sqlx::query(
					"\
INSERT INTO tags (field_id, tag_uuid, name, display_order)
VALUES ($1, $2, $3, $4)",
				)
				.bind(self.resolve(*field)?)
				.bind(tag_uuid)
				.bind(name)
				.bind(display_order)
				.execute(&mut *conn)
				.await?;

				self.count(result.rows_affected());
			},
			SyncOp::UpdateTag { tag_id, name, display_order } => {
				let result = sqlx::query(
					"\
UPDATE tags
SET name = $1, display_order = $2
WHERE id = $3
	AND deleted_at IS NULL",
				)
				.bind(name)
				.bind(display_order)
				.bind(tag_id)
				.execute(&mut *conn)
				.await?;

				self.expect_row(result.rows_affected(), "Tag", *tag_id)?;
			},
			SyncOp::DeleteTag { tag_id } => {
				let result = sqlx::query(
					"UPDATE tags SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
				)
				.bind(tag_id)
				.execute(&mut *conn)
				.await?;

				self.expect_row(result.rows_affected(), "Tag", *tag_id)?;

				let selections = sqlx::query(
					"\
UPDATE tag_selections
SET deleted_at = now()
WHERE tag_id = $1
	AND deleted_at IS NULL",
				)
				.bind(tag_id)
				.execute(&mut *conn)
				.await?;
				let edges = sqlx::query(
					"\
UPDATE tag_edges e
SET deleted_at = now()
FROM tags t
WHERE t.id = $1
	AND e.field_id = t.field_id
	AND (e.parent_uuid = t.tag_uuid OR e.child_uuid = t.tag_uuid)
	AND e.deleted_at IS NULL",
				)
				.bind(tag_id)
				.execute(&mut *conn)
				.await?;

				self.count(selections.rows_affected() + edges.rows_affected());
			},
			SyncOp::CreateTagEdge { field, parent_uuid, child_uuid } => {
				let result = sqlx::query(
					"\
INSERT INTO tag_edges (field_id, parent_uuid, child_uuid)
VALUES ($1, $2, $3)",
				)
				.bind(self.resolve(*field)?)
				.bind(parent_uuid)
				.bind(child_uuid)
				.execute(&mut *conn)
				.await?;

				self.count(result.rows_affected());
			},
			SyncOp::DeleteTagEdge { edge_id } => {
				let result = sqlx::query(
					"UPDATE tag_edges SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
				)
				.bind(edge_id)
				.execute(&mut *conn)
				.await?;

				self.expect_row(result.rows_affected(), "Tag edge", *edge_id)?;
			},
			SyncOp::CreateTheme { id, schema, kind, parent_theme, source_theme } => {
				let real: i64 = sqlx::query_scalar(
					"\
INSERT INTO themes (schema_id, parent_theme_id, source_theme_id, kind)
VALUES ($1, $2, $3, $4)
RETURNING id",
				)
				.bind(self.resolve(*schema)?)
				.bind(self.resolve_opt(*parent_theme)?)
				.bind(self.resolve_opt(*source_theme)?)
				.bind(kind.as_str())
				.fetch_one(&mut *conn)
				.await?;

				self.assign(*id, real);
			},
			SyncOp::CreateLayoutGroup { id, theme, display_order } => {
				let real: i64 = sqlx::query_scalar(
					"INSERT INTO layout_groups (theme_id, display_order) VALUES ($1, $2) RETURNING id",
				)
				.bind(self.resolve(*theme)?)
				.bind(display_order)
				.fetch_one(&mut *conn)
				.await?;

				self.assign(*id, real);
			},
			SyncOp::CreateLayoutSlot { group, display_order, target } => {
				let (field_id, child_schema_id, child_theme_id) = match target {
					PlannedSlot::Field { field } => (Some(self.resolve(*field)?), None, None),
					PlannedSlot::Schema { schema, child_theme } =>
						(None, Some(self.resolve(*schema)?), Some(self.resolve(*child_theme)?)),
				};
				let result = sqlx::query(
					"\
INSERT INTO layout_slots (group_id, display_order, field_id, child_schema_id, child_theme_id)
VALUES ($1, $2, $3, $4, $5)",
				)
				.bind(self.resolve(*group)?)
				.bind(display_order)
				.bind(field_id)
				.bind(child_schema_id)
				.bind(child_theme_id)
				.execute(&mut *conn)
				.await?;

				self.count(result.rows_affected());
			},
			SyncOp::CopyThemeLayout { from, to } => {
				let (from, to) = (self.resolve(*from)?, self.resolve(*to)?);

				self.copy_theme_layout(conn, from, to).await?;
			},
			SyncOp::CopyGroupPermissions { schema, grandparent } => {
				let result = sqlx::query(
					"\
INSERT INTO group_schema_permissions (
	group_id,
	schema_id,
	can_view,
	can_view_non_public,
	can_edit,
	is_admin
)
SELECT p.group_id, $1, p.can_view, p.can_view_non_public, p.can_edit, p.is_admin
FROM group_schema_permissions p
JOIN permission_groups g ON g.id = p.group_id AND g.deleted_at IS NULL
WHERE g.schema_id = $2
	AND p.schema_id = $2
	AND p.deleted_at IS NULL",
				)
				.bind(self.resolve(*schema)?)
				.bind(self.resolve(*grandparent)?)
				.execute(&mut *conn)
				.await?;

				self.count(result.rows_affected());
			},
			SyncOp::CreateDefaultGroups { schema } => {
				let schema_id = self.resolve(*schema)?;

				self.create_default_groups(conn, schema_id).await?;
			},
			SyncOp::GrantFieldPermissions { field, grandparent } => {
				let field_id = self.resolve(*field)?;
				let groups = load_groups(conn, self.resolve(*grandparent)?).await?;

				for (group_id, purpose) in groups {
					let rights = FieldRights::for_purpose(purpose);
					let result = sqlx::query(
						"\
INSERT INTO group_field_permissions (group_id, field_id, can_view, can_edit)
VALUES ($1, $2, $3, $4)",
					)
					.bind(group_id)
					.bind(field_id)
					.bind(rights.view)
					.bind(rights.edit)
					.execute(&mut *conn)
					.await?;

					self.count(result.rows_affected());
				}
			},
			SyncOp::MarkOperational { schema } => {
				let result = sqlx::query(
					"UPDATE schemas SET setup_step = $1, updated_at = now() WHERE id = $2",
				)
				.bind(SetupStep::Operational.as_str())
				.bind(self.resolve(*schema)?)
				.execute(&mut *conn)
				.await?;

				self.count(result.rows_affected());
			},
		}

		Ok(())
	}

	fn expect_row(&mut self, rows: u64, entity: &str, id: i64) -> Result<()> {
		if rows == 0 {
			return Err(Error::Conflict(format!("{entity} {id} changed during sync.")));
		}

		self.count(rows);

		Ok(())
	}

	async fn copy_theme_layout(&mut self, conn: &mut PgConnection, from: i64, to: i64) -> Result<()> {
		let groups: Vec<(i64, i32)> = sqlx::query_as(
			"\
SELECT id, display_order
FROM layout_groups
WHERE theme_id = $1
	AND deleted_at IS NULL
ORDER BY display_order, id",
		)
		.bind(from)
		.fetch_all(&mut *conn)
		.await?;

		for (source_group, display_order) in groups {
			let group_id: i64 = sqlx::query_scalar(
				"INSERT INTO layout_groups (theme_id, display_order) VALUES ($1, $2) RETURNING id",
			)
			.bind(to)
			.bind(display_order)
			.fetch_one(&mut *conn)
			.await?;
			let slots = sqlx::query(
				"\
INSERT INTO layout_slots (group_id, display_order, field_id, child_schema_id, child_theme_id)
SELECT $1, display_order, field_id, child_schema_id, child_theme_id
FROM layout_slots
WHERE group_id = $2
	AND deleted_at IS NULL",
			)
			.bind(group_id)
			.bind(source_group)
			.execute(&mut *conn)
			.await?;

			self.count(1 + slots.rows_affected());
		}

		Ok(())
	}

	async fn create_default_groups(&mut self, conn: &mut PgConnection, schema_id: i64) -> Result<()> {
		for purpose in GroupPurpose::DEFAULTS {
			let group_id: i64 = sqlx::query_scalar(
				"INSERT INTO permission_groups (schema_id, purpose) VALUES ($1, $2) RETURNING id",
			)
			.bind(schema_id)
			.bind(purpose.as_str())
			.fetch_one(&mut *conn)
			.await?;
			let rights = SchemaRights::for_purpose(purpose);

			sqlx::query(
				"\
INSERT INTO group_schema_permissions (
	group_id,
	schema_id,
	can_view,
	can_view_non_public,
	can_edit,
	is_admin
)
VALUES ($1, $2, $3, $4, $5, $6)",
			)
			.bind(group_id)
			.bind(schema_id)
			.bind(rights.view)
			.bind(rights.view_non_public)
			.bind(rights.edit)
			.bind(rights.admin)
			.execute(&mut *conn)
			.await?;

			self.count(2);

			// The syncing user administers what the sync created.
			if purpose == GroupPurpose::Admin {
				sqlx::query("INSERT INTO user_groups (user_id, group_id) VALUES ($1, $2)")
					.bind(self.user_id)
					.bind(group_id)
					.execute(&mut *conn)
					.await?;

				self.count(1);
			}
		}

		Ok(())
	}
}

async fn load_groups(conn: &mut PgConnection, schema_id: i64) -> Result<Vec<(i64, GroupPurpose)>> {
	let rows = sqlx::query_as::<_, PermissionGroupRecord>(
		"\
SELECT id, schema_id, purpose
FROM permission_groups
WHERE schema_id = $1
	AND deleted_at IS NULL
ORDER BY id",
	)
	.bind(schema_id)
	.fetch_all(&mut *conn)
	.await?;

	rows.into_iter()
		.map(|row| row.into_group().map(|group| (group.id, group.purpose)))
		.collect()
}

/// Runs every operation of `plan` in order inside one transaction.
pub async fn apply_plan(pool: &PgPool, plan: &SyncPlan, user_id: UserId) -> Result<AppliedPlan> {
	let mut applier = Applier { user_id, ids: BTreeMap::new(), mutations: 0 };
	let mut tx = pool.begin().await?;

	for op in &plan.ops {
		applier.apply(&mut tx, op).await?;
	}

	sqlx::query("UPDATE schemas SET updated_at = now() WHERE id = ANY($1)")
		.bind(plan.touched.iter().copied().collect::<Vec<_>>())
		.execute(&mut *tx)
		.await?;
	tx.commit().await?;

	tracing::info!(
		derived_root_id = plan.derived_root_id,
		ops = plan.ops.len(),
		mutations = applier.mutations,
		"Sync plan applied."
	);

	Ok(AppliedPlan { ids: applier.ids, mutations: applier.mutations })
}
