//! Structural loads: family walks, stacking rows, search structures.

use std::collections::BTreeMap;

use sqlx::PgPool;

use odr_domain::{
	cache_keys::InvalidationContext,
	model::{FieldType, Schema, SchemaEdge, SchemaId},
	predicate::SearchStructure,
	stack::{EntryRow, FieldRow, SchemaRow, StructureRows, TagEdgeRow},
};

use crate::{
	Error, Result,
	models::{
		EntryRecord, FIELD_COLUMNS, FieldRecord, SCHEMA_COLUMNS, SchemaEdgeRecord, SchemaRecord,
		TagEdgeRecord,
	},
};

/// Every schema reachable from `root_id` through containment or link edges, root included.
pub async fn load_family_ids(pool: &PgPool, root_id: SchemaId) -> Result<Vec<SchemaId>> {
	let ids = sqlx::query_scalar::<_, i64>(
		"\
WITH RECURSIVE family(id) AS (
	SELECT $1::bigint
	UNION
	SELECT e.descendant_id
	FROM family f
	JOIN schema_edges e ON e.ancestor_id = f.id AND e.deleted_at IS NULL
	JOIN schemas s ON s.id = e.descendant_id AND s.deleted_at IS NULL
)
SELECT id FROM family ORDER BY id",
	)
	.bind(root_id)
	.fetch_all(pool)
	.await?;

	Ok(ids)
}

pub async fn load_schema(pool: &PgPool, schema_id: SchemaId) -> Result<Schema> {
	let sql = format!("SELECT {SCHEMA_COLUMNS} FROM schemas WHERE id = $1 AND deleted_at IS NULL");
	let row = sqlx::query_as::<_, SchemaRecord>(&sql)
		.bind(schema_id)
		.fetch_optional(pool)
		.await?
		.ok_or_else(|| Error::NotFound(format!("Schema {schema_id} does not exist.")))?;

	row.into_schema()
}

pub async fn load_schemas(pool: &PgPool, ids: &[SchemaId]) -> Result<Vec<Schema>> {
	let sql = format!(
		"SELECT {SCHEMA_COLUMNS} FROM schemas WHERE id = ANY($1) AND deleted_at IS NULL ORDER BY id"
	);
	let rows = sqlx::query_as::<_, SchemaRecord>(&sql).bind(ids).fetch_all(pool).await?;

	rows.into_iter().map(SchemaRecord::into_schema).collect()
}

async fn load_edges(pool: &PgPool, ids: &[SchemaId]) -> Result<Vec<SchemaEdge>> {
	let rows = sqlx::query_as::<_, SchemaEdgeRecord>(
		"\
SELECT ancestor_id, descendant_id, is_link, multiple_allowed
FROM schema_edges
WHERE ancestor_id = ANY($1)
	AND descendant_id = ANY($1)
	AND deleted_at IS NULL
ORDER BY id",
	)
	.bind(ids)
	.fetch_all(pool)
	.await?;

	Ok(rows.into_iter().map(SchemaEdge::from).collect())
}

pub(crate) async fn load_fields(pool: &PgPool, schema_ids: &[SchemaId]) -> Result<Vec<FieldRecord>> {
	let sql = format!(
		"SELECT {FIELD_COLUMNS} FROM fields WHERE schema_id = ANY($1) AND deleted_at IS NULL ORDER BY id"
	);
	let rows = sqlx::query_as::<_, FieldRecord>(&sql).bind(schema_ids).fetch_all(pool).await?;

	Ok(rows)
}

pub(crate) async fn load_options(pool: &PgPool, field_ids: &[i64]) -> Result<Vec<EntryRecord>> {
	let rows = sqlx::query_as::<_, EntryRecord>(
		"\
SELECT id, field_id, option_uuid AS uuid, name, display_order
FROM radio_options
WHERE field_id = ANY($1)
	AND deleted_at IS NULL
ORDER BY id",
	)
	.bind(field_ids)
	.fetch_all(pool)
	.await?;

	Ok(rows)
}

pub(crate) async fn load_tags(pool: &PgPool, field_ids: &[i64]) -> Result<Vec<EntryRecord>> {
	let rows = sqlx::query_as::<_, EntryRecord>(
		"\
SELECT id, field_id, tag_uuid AS uuid, name, display_order
FROM tags
WHERE field_id = ANY($1)
	AND deleted_at IS NULL
ORDER BY id",
	)
	.bind(field_ids)
	.fetch_all(pool)
	.await?;

	Ok(rows)
}

pub(crate) async fn load_tag_edges(pool: &PgPool, field_ids: &[i64]) -> Result<Vec<TagEdgeRecord>> {
	let rows = sqlx::query_as::<_, TagEdgeRecord>(
		"\
SELECT id, field_id, parent_uuid, child_uuid
FROM tag_edges
WHERE field_id = ANY($1)
	AND deleted_at IS NULL
ORDER BY id",
	)
	.bind(field_ids)
	.fetch_all(pool)
	.await?;

	Ok(rows)
}

/// Slim rows for stacking the family rooted at `root_id`.
pub async fn load_structure_rows(pool: &PgPool, root_id: SchemaId) -> Result<StructureRows> {
	let ids = load_family_ids(pool, root_id).await?;
	let schemas = load_schemas(pool, &ids).await?;

	if !schemas.iter().any(|schema| schema.id == root_id) {
		return Err(Error::NotFound(format!("Schema {root_id} does not exist.")));
	}

	let edges = load_edges(pool, &ids).await?;
	let fields = load_fields(pool, &ids).await?;
	let field_ids = fields.iter().map(|field| field.id).collect::<Vec<_>>();
	let options = load_options(pool, &field_ids).await?;
	let tags = load_tags(pool, &field_ids).await?;
	let tag_edges = load_tag_edges(pool, &field_ids).await?;
	let entry = |row: EntryRecord| EntryRow {
		field_id: row.field_id,
		uuid: row.uuid,
		name: row.name,
		display_order: row.display_order,
	};

	Ok(StructureRows {
		schemas: schemas
			.into_iter()
			.map(|schema| SchemaRow {
				id: schema.id,
				master_template_id: schema.master_template_id,
				parent_id: schema.parent_id,
				grandparent_id: schema.grandparent_id,
				metadata_for_id: schema.metadata_for_id,
			})
			.collect(),
		edges,
		fields: fields
			.into_iter()
			.map(|field| -> Result<FieldRow> {
				Ok(FieldRow {
					id: field.id,
					schema_id: field.schema_id,
					field_uuid: field.field_uuid,
					master_field_id: field.master_field_id,
					field_type: FieldType::parse(&field.field_type)?,
				})
			})
			.collect::<Result<_>>()?,
		options: options.into_iter().map(entry).collect(),
		tags: tags.into_iter().map(entry).collect(),
		tag_edges: tag_edges
			.into_iter()
			.map(|row| TagEdgeRow {
				field_id: row.field_id,
				parent_uuid: row.parent_uuid,
				child_uuid: row.child_uuid,
			})
			.collect(),
	})
}

/// Full schemas, fields and choice ownership of a search family. Not permission filtered.
pub async fn load_search_structure(
	pool: &PgPool,
	top_schema_id: SchemaId,
) -> Result<SearchStructure> {
	let ids = load_family_ids(pool, top_schema_id).await?;
	let schemas = load_schemas(pool, &ids)
		.await?
		.into_iter()
		.map(|schema| (schema.id, schema))
		.collect::<BTreeMap<_, _>>();

	if !schemas.contains_key(&top_schema_id) {
		return Err(Error::NotFound(format!("Schema {top_schema_id} does not exist.")));
	}

	let edges = load_edges(pool, &ids).await?;
	let fields = load_fields(pool, &ids)
		.await?
		.into_iter()
		.map(|row| row.into_field().map(|field| (field.id, field)))
		.collect::<Result<BTreeMap<_, _>>>()?;
	let field_ids = fields.keys().copied().collect::<Vec<_>>();
	let options = load_options(pool, &field_ids).await?;
	let tags = load_tags(pool, &field_ids).await?;

	Ok(SearchStructure {
		top_schema_id,
		schemas,
		edges,
		fields,
		options: options.into_iter().map(|row| (row.id, row.field_id)).collect(),
		tags: tags.into_iter().map(|row| (row.id, row.field_id)).collect(),
	})
}

pub async fn load_invalidation_context(
	pool: &PgPool,
	schema_id: SchemaId,
) -> Result<InvalidationContext> {
	let schema = load_schema(pool, schema_id).await?;
	let fields = load_fields(pool, &[schema_id]).await?;
	let field_ids = fields.iter().map(|field| field.id).collect::<Vec<_>>();
	let option_ids = load_options(pool, &field_ids)
		.await?
		.into_iter()
		.map(|row| row.id)
		.collect();

	Ok(InvalidationContext {
		schema_id,
		grandparent_id: schema.grandparent_id,
		template_uuid: schema.template_uuid,
		template_field_uuids: fields.iter().filter_map(|field| field.template_field_uuid).collect(),
		field_ids,
		option_ids,
	})
}
