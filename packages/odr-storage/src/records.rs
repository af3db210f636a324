use sqlx::PgPool;

use odr_domain::{
	model::{NOT_PUBLIC_DATE, SchemaId},
	search_tree::RecordRow,
};

use crate::{Result, models::RecordListRow};

/// Live records of one schema with the records linking to each, ascending by id.
pub async fn list_records(pool: &PgPool, schema_id: SchemaId) -> Result<Vec<RecordRow>> {
	let rows = sqlx::query_as::<_, RecordListRow>(
		"\
SELECT
	r.id,
	r.schema_id,
	r.parent_id,
	ARRAY(
		SELECT l.ancestor_id
		FROM linked_records l
		JOIN records a ON a.id = l.ancestor_id AND a.deleted_at IS NULL
		WHERE l.descendant_id = r.id
			AND l.deleted_at IS NULL
		ORDER BY l.ancestor_id
	) AS linked_from,
	r.created_at,
	r.updated_at,
	r.created_by,
	r.updated_by,
	r.public_date < $2 AS is_public
FROM records r
WHERE r.schema_id = $1
	AND r.deleted_at IS NULL
ORDER BY r.id",
	)
	.bind(schema_id)
	.bind(NOT_PUBLIC_DATE)
	.fetch_all(pool)
	.await?;

	Ok(rows.into_iter().map(RecordRow::from).collect())
}
