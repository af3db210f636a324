//! SQL evaluation of single search predicates.
//!
//! Every predicate yields live record ids of its own schema. Text-like predicates whose query
//! accepts an empty value also yield records that store no value for the field.

use std::collections::BTreeSet;

use sqlx::{PgPool, Postgres, QueryBuilder};
use time::{Date, OffsetDateTime};

use odr_domain::{
	grammar::{ParsedQuery, Term, TermKind},
	model::{FieldId, FieldType, NOT_PUBLIC_DATE, RecordId, SchemaId},
	predicate::Predicate,
};

use crate::{Error, Result};

const NUMERIC_PATTERN: &str = r"^\s*[-+]?([0-9]+(\.[0-9]*)?|\.[0-9]+)\s*$";
const ISO_DATE_PATTERN: &str = r"^[0-9]{4}-[0-9]{2}-[0-9]{2}";

pub async fn evaluate(pool: &PgPool, predicate: &Predicate) -> Result<BTreeSet<RecordId>> {
	let Some(mut builder) = build(predicate)? else {
		return Ok(BTreeSet::new());
	};
	let ids = builder.build_query_scalar::<i64>().fetch_all(pool).await?;

	Ok(ids.into_iter().collect())
}

/// Builds the id query, or `None` when the predicate can match nothing.
fn build(predicate: &Predicate) -> Result<Option<QueryBuilder<'static, Postgres>>> {
	let builder = match predicate {
		Predicate::FieldText { schema_id, field_id, field_type, query } => {
			let table = value_table(*field_type)?;

			if query.is_empty() {
				return Ok(None);
			}

			text_query(*schema_id, *field_id, table, "v.value::text", query)
		},
		Predicate::FieldBoolean { schema_id, field_id, value } => {
			let mut builder = records_of(*schema_id);

			builder.push(if *value { " AND EXISTS (" } else { " AND NOT EXISTS (" });
			builder.push("SELECT 1 FROM boolean_values v WHERE v.record_id = r.id AND v.field_id = ");
			builder.push_bind(*field_id);
			builder.push(" AND v.value AND v.deleted_at IS NULL)");

			builder
		},
		Predicate::FieldFile { schema_id, field_id, field_type, filename, has_file } => {
			let table = value_table(*field_type)?;
			let mut builder = records_of(*schema_id);

			if let Some(has_file) = has_file {
				builder.push(if *has_file { " AND EXISTS (" } else { " AND NOT EXISTS (" });
				push_value_exists(&mut builder, table, *field_id);
				builder.push(")");
			}
			if let Some(query) = filename {
				if query.is_empty() {
					return Ok(None);
				}

				builder.push(" AND (EXISTS (");
				push_value_exists(&mut builder, table, *field_id);
				builder.push(" AND (");
				push_query(&mut builder, "v.original_filename", query);
				builder.push("))");

				if query.matches_empty() {
					builder.push(" OR NOT EXISTS (");
					push_value_exists(&mut builder, table, *field_id);
					builder.push(")");
				}

				builder.push(")");
			}

			builder
		},
		Predicate::FieldDate { schema_id, field_id, after, before } => {
			let mut builder = records_of(*schema_id);

			builder.push(" AND EXISTS (");
			push_value_exists(&mut builder, "datetime_values", *field_id);
			push_range(&mut builder, "v.value", *after, *before);
			builder.push(")");

			builder
		},
		Predicate::OptionSelected { schema_id, option_id, .. } => {
			let mut builder = records_of(*schema_id);

			builder.push(
				" AND EXISTS (SELECT 1 FROM radio_selections s WHERE s.record_id = r.id AND s.option_id = ",
			);
			builder.push_bind(*option_id);
			builder.push(" AND s.deleted_at IS NULL)");

			builder
		},
		Predicate::TagSelected { schema_id, tag_id, .. } => {
			let mut builder = records_of(*schema_id);

			builder.push(
				" AND EXISTS (SELECT 1 FROM tag_selections s WHERE s.record_id = r.id AND s.tag_id = ",
			);
			builder.push_bind(*tag_id);
			builder.push(" AND s.deleted_at IS NULL)");

			builder
		},
		Predicate::CreatedDate { schema_id, after, before } => {
			let mut builder = records_of(*schema_id);

			push_range(&mut builder, "r.created_at", *after, *before);

			builder
		},
		Predicate::ModifiedDate { schema_id, after, before } => {
			let mut builder = records_of(*schema_id);

			push_range(&mut builder, "r.updated_at", *after, *before);

			builder
		},
		Predicate::CreatedBy { schema_id, user_id } => {
			let mut builder = records_of(*schema_id);

			builder.push(" AND r.created_by = ");
			builder.push_bind(*user_id);

			builder
		},
		Predicate::ModifiedBy { schema_id, user_id } => {
			let mut builder = records_of(*schema_id);

			builder.push(" AND r.updated_by = ");
			builder.push_bind(*user_id);

			builder
		},
		Predicate::PublicStatus { schema_id, public } => {
			let mut builder = records_of(*schema_id);

			builder.push(if *public { " AND r.public_date < " } else { " AND r.public_date >= " });
			builder.push_bind(NOT_PUBLIC_DATE);

			builder
		},
	};

	Ok(Some(builder))
}

fn value_table(field_type: FieldType) -> Result<&'static str> {
	field_type.value_table().ok_or_else(|| {
		Error::InvalidArgument(format!("Field type {} stores no values.", field_type.as_str()))
	})
}

fn records_of(schema_id: SchemaId) -> QueryBuilder<'static, Postgres> {
	let mut builder = QueryBuilder::new("SELECT r.id FROM records r WHERE r.schema_id = ");

	builder.push_bind(schema_id);
	builder.push(" AND r.deleted_at IS NULL");

	builder
}

fn push_value_exists(builder: &mut QueryBuilder<'static, Postgres>, table: &str, field_id: FieldId) {
	builder.push("SELECT 1 FROM ");
	builder.push(table);
	builder.push(" v WHERE v.record_id = r.id AND v.field_id = ");
	builder.push_bind(field_id);
	builder.push(" AND v.deleted_at IS NULL");
}

fn text_query(
	schema_id: SchemaId,
	field_id: FieldId,
	table: &str,
	column: &str,
	query: &ParsedQuery,
) -> QueryBuilder<'static, Postgres> {
	let mut builder = records_of(schema_id);

	builder.push(" AND (EXISTS (");
	push_value_exists(&mut builder, table, field_id);
	builder.push(" AND (");
	push_query(&mut builder, column, query);
	builder.push("))");

	if query.matches_empty() {
		builder.push(" OR NOT EXISTS (");
		push_value_exists(&mut builder, table, field_id);
		builder.push(")");
	}

	builder.push(")");

	builder
}

fn push_query(builder: &mut QueryBuilder<'static, Postgres>, column: &str, query: &ParsedQuery) {
	let expr = format!("COALESCE({column}, '')");

	for (group_idx, group) in query.groups.iter().enumerate() {
		if group_idx > 0 {
			builder.push(" OR ");
		}

		builder.push("(");

		for (term_idx, term) in group.iter().enumerate() {
			if term_idx > 0 {
				builder.push(" AND ");
			}

			push_term(builder, &expr, term);
		}

		builder.push(")");
	}
}

fn push_term(builder: &mut QueryBuilder<'static, Postgres>, expr: &str, term: &Term) {
	if term.negated {
		builder.push("NOT ");
	}

	builder.push("(");

	match &term.kind {
		TermKind::Fuzzy { text } => {
			builder.push(expr);
			builder.push(" ILIKE ");
			builder.push_bind(format!("%{}%", escape_like(text)));
		},
		TermKind::Exact { text } => {
			builder.push("lower(");
			builder.push(expr);
			builder.push(") = lower(");
			builder.push_bind(text.clone());
			builder.push(")");
		},
		TermKind::Compare { op, text } => {
			let comparand = text.trim();

			if let Ok(number) = comparand.parse::<f64>() {
				builder.push("CASE WHEN ");
				builder.push(expr);
				builder.push(format!(" ~ '{NUMERIC_PATTERN}' THEN trim("));
				builder.push(expr);
				builder.push(format!(")::double precision {} ", op.as_sql()));
				builder.push_bind(number);
				builder.push(" ELSE false END");
			} else if is_iso_date(comparand) {
				builder.push("CASE WHEN ");
				builder.push(expr);
				builder.push(format!(" ~ '{ISO_DATE_PATTERN}' THEN trim("));
				builder.push(expr);
				builder.push(format!(") COLLATE \"C\" {} ", op.as_sql()));
				builder.push_bind(comparand.to_string());
				builder.push(" ELSE false END");
			} else {
				builder.push("false");
			}
		},
	}

	builder.push(")");
}

fn push_range(
	builder: &mut QueryBuilder<'static, Postgres>,
	column: &str,
	after: Option<Date>,
	before: Option<Date>,
) {
	if let Some(after) = after {
		builder.push(format!(" AND {column} >= "));
		builder.push_bind(start_of(after));
	}
	// Inclusive of the whole `before` day.
	if let Some(end) = before.and_then(Date::next_day) {
		builder.push(format!(" AND {column} < "));
		builder.push_bind(start_of(end));
	}
}

fn start_of(date: Date) -> OffsetDateTime {
	date.midnight().assume_utc()
}

fn is_iso_date(raw: &str) -> bool {
	let bytes = raw.as_bytes();

	bytes.len() >= 10
		&& bytes[..10].iter().enumerate().all(|(idx, byte)| match idx {
			4 | 7 => *byte == b'-',
			_ => byte.is_ascii_digit(),
		})
}

fn escape_like(raw: &str) -> String {
	raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
