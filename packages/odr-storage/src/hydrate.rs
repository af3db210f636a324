//! Batch loads of the full entities a sync plan needs.

use std::collections::BTreeMap;

use sqlx::PgPool;

use odr_domain::{
	hydrate::{EntityRefs, HydratedPools, HydrationRequest, SidePool},
	model::{GroupLayout, LayoutGroup, SchemaId, TagEdge, ThemeKind, ThemeLayout},
};

use crate::{
	Result,
	models::{
		FIELD_COLUMNS, FieldRecord, LayoutGroupRecord, LayoutSlotRecord, PermissionGroupRecord,
		ThemeRecord,
	},
	structure,
};

pub async fn hydrate(pool: &PgPool, request: &HydrationRequest) -> Result<HydratedPools> {
	let template = load_side(pool, &request.template).await?;
	let derived = load_side(pool, &request.derived).await?;
	let template_layouts =
		load_master_layouts(pool, &request.template_layouts.iter().copied().collect::<Vec<_>>())
			.await?;
	let derived_themes =
		load_master_layouts(pool, &request.derived_themes.iter().copied().collect::<Vec<_>>())
			.await?;
	let derived_groups = sqlx::query_as::<_, PermissionGroupRecord>(
		"\
SELECT id, schema_id, purpose
FROM permission_groups
WHERE schema_id = $1
	AND deleted_at IS NULL
ORDER BY id",
	)
	.bind(request.derived_root_id)
	.fetch_all(pool)
	.await?
	.into_iter()
	.map(PermissionGroupRecord::into_group)
	.collect::<Result<Vec<_>>>()?;

	tracing::debug!(
		template_schemas = template.schemas.len(),
		derived_schemas = derived.schemas.len(),
		template_layouts = template_layouts.len(),
		"Hydrated sync pools."
	);

	Ok(HydratedPools { template, derived, template_layouts, derived_themes, derived_groups })
}

async fn load_side(pool: &PgPool, refs: &EntityRefs) -> Result<SidePool> {
	let mut side = SidePool::default();
	let schema_ids = refs.schema_ids.iter().copied().collect::<Vec<_>>();

	for schema in structure::load_schemas(pool, &schema_ids).await? {
		side.schemas.insert(schema.id, schema);
	}

	let field_ids = refs.field_ids.iter().copied().collect::<Vec<_>>();
	let sql = format!(
		"SELECT {FIELD_COLUMNS} FROM fields WHERE id = ANY($1) AND deleted_at IS NULL ORDER BY id"
	);

	for row in sqlx::query_as::<_, FieldRecord>(&sql).bind(&field_ids).fetch_all(pool).await? {
		let field = row.into_field()?;

		side.fields.insert(field.id, field);
	}

	let option_fields = refs.option_field_ids().into_iter().collect::<Vec<_>>();

	for row in structure::load_options(pool, &option_fields).await? {
		if refs.option_keys.contains(&(row.field_id, row.uuid)) {
			side.insert_option(row.into_option());
		}
	}

	let tag_fields = refs.tag_field_ids().into_iter().collect::<Vec<_>>();

	for row in structure::load_tags(pool, &tag_fields).await? {
		if refs.tag_keys.contains(&(row.field_id, row.uuid)) {
			side.insert_tag(row.into_tag());
		}
	}

	let edge_fields = refs.tag_edge_field_ids().into_iter().collect::<Vec<_>>();

	for row in structure::load_tag_edges(pool, &edge_fields).await? {
		if refs.tag_edge_keys.contains(&(row.field_id, row.parent_uuid, row.child_uuid)) {
			side.insert_tag_edge(TagEdge::from(row));
		}
	}

	Ok(side)
}

/// Master theme of each schema with its groups and slots in display order. Schemas without a
/// master theme are absent from the map.
pub async fn load_master_layouts(
	pool: &PgPool,
	schema_ids: &[SchemaId],
) -> Result<BTreeMap<SchemaId, ThemeLayout>> {
	if schema_ids.is_empty() {
		return Ok(BTreeMap::new());
	}

	let themes = sqlx::query_as::<_, ThemeRecord>(
		"\
SELECT DISTINCT ON (schema_id) id, schema_id, parent_theme_id, source_theme_id, kind
FROM themes
WHERE schema_id = ANY($1)
	AND kind = $2
	AND deleted_at IS NULL
ORDER BY schema_id, id",
	)
	.bind(schema_ids)
	.bind(ThemeKind::Master.as_str())
	.fetch_all(pool)
	.await?;
	let theme_ids = themes.iter().map(|theme| theme.id).collect::<Vec<_>>();
	let groups = sqlx::query_as::<_, LayoutGroupRecord>(
		"\
SELECT id, theme_id, display_order
FROM layout_groups
WHERE theme_id = ANY($1)
	AND deleted_at IS NULL
ORDER BY display_order, id",
	)
	.bind(&theme_ids)
	.fetch_all(pool)
	.await?;
	let group_ids = groups.iter().map(|group| group.id).collect::<Vec<_>>();
	let slots = sqlx::query_as::<_, LayoutSlotRecord>(
		"\
SELECT id, group_id, display_order, field_id, child_schema_id, child_theme_id
FROM layout_slots
WHERE group_id = ANY($1)
	AND deleted_at IS NULL
ORDER BY display_order, id",
	)
	.bind(&group_ids)
	.fetch_all(pool)
	.await?;
	let mut slots_by_group = BTreeMap::<i64, Vec<_>>::new();

	for slot in slots {
		let slot = slot.into_slot()?;

		slots_by_group.entry(slot.group_id).or_default().push(slot);
	}

	let mut groups_by_theme = BTreeMap::<i64, Vec<GroupLayout>>::new();

	for group in groups {
		let group = LayoutGroup::from(group);
		let slots = slots_by_group.remove(&group.id).unwrap_or_default();

		groups_by_theme.entry(group.theme_id).or_default().push(GroupLayout { group, slots });
	}

	let mut out = BTreeMap::new();

	for theme in themes {
		let theme = theme.into_theme()?;
		let groups = groups_by_theme.remove(&theme.id).unwrap_or_default();

		out.insert(theme.schema_id, ThemeLayout { theme, groups });
	}

	Ok(out)
}
