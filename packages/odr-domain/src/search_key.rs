//! JSON search keys and their validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{Date, macros::format_description};
use uuid::Uuid;

use crate::{
	Error, Result,
	model::{FieldId, OptionId, SchemaId, TagId, UserId},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
	#[default]
	RecordId,
	Created,
	Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combine {
	#[default]
	Or,
	And,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicStatus {
	Public,
	NonPublic,
}

/// Inclusive day range written as `YYYY-MM-DD`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub after: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub before: Option<String>,
}
impl DateRange {
	pub fn bounds(&self) -> Result<(Option<Date>, Option<Date>)> {
		let after = self.after.as_deref().map(parse_day).transpose()?;
		let before = self.before.as_deref().map(parse_day).transpose()?;

		if after.is_none() && before.is_none() {
			return Err(Error::invalid_key("Date range needs at least one bound."));
		}
		if let (Some(after), Some(before)) = (after, before)
			&& after > before
		{
			return Err(Error::invalid_key(format!("Date range {after} is after {before}.")));
		}

		Ok((after, before))
	}
}

fn parse_day(raw: &str) -> Result<Date> {
	Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))
		.map_err(|_| Error::invalid_key(format!("Date {raw:?} must be formatted as YYYY-MM-DD.")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldCriterion {
	Text {
		value: String,
	},
	Boolean {
		value: bool,
	},
	Radio {
		#[serde(default)]
		selected: Vec<OptionId>,
		#[serde(default)]
		unselected: Vec<OptionId>,
		#[serde(default)]
		combine: Combine,
	},
	Tag {
		#[serde(default)]
		selected: Vec<TagId>,
		#[serde(default)]
		unselected: Vec<TagId>,
		#[serde(default)]
		combine: Combine,
	},
	File {
		#[serde(default)]
		filename: Option<String>,
		#[serde(default)]
		has_file: Option<bool>,
	},
	DateRange {
		#[serde(flatten)]
		range: DateRange,
	},
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCriteria {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created: Option<DateRange>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub modified: Option<DateRange>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_by: Option<UserId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub modified_by: Option<UserId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub public_status: Option<PublicStatus>,
}
impl SchemaCriteria {
	pub fn is_empty(&self) -> bool {
		self.created.is_none()
			&& self.modified.is_none()
			&& self.created_by.is_none()
			&& self.modified_by.is_none()
			&& self.public_status.is_none()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchKey {
	pub schema_id: SchemaId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub general: Option<String>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub fields: BTreeMap<FieldId, FieldCriterion>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub schemas: BTreeMap<SchemaId, SchemaCriteria>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub template_fields: BTreeMap<Uuid, String>,
	#[serde(default)]
	pub sort: SortOrder,
}
impl SearchKey {
	pub fn new(schema_id: SchemaId) -> Self {
		Self {
			schema_id,
			general: None,
			fields: BTreeMap::new(),
			schemas: BTreeMap::new(),
			template_fields: BTreeMap::new(),
			sort: SortOrder::default(),
		}
	}

	/// Decodes and validates a JSON search key.
	pub fn from_json(raw: &str, max_query_chars: usize) -> Result<Self> {
		let key: Self = serde_json::from_str(raw)
			.map_err(|err| Error::invalid_key(format!("Search key is not valid JSON: {err}.")))?;

		key.validate(max_query_chars)?;

		Ok(key)
	}

	pub fn validate(&self, max_query_chars: usize) -> Result<()> {
		if let Some(general) = &self.general {
			check_text("general", general, max_query_chars)?;
		}

		for (field_id, criterion) in &self.fields {
			let name = format!("fields.{field_id}");

			match criterion {
				FieldCriterion::Text { value } => check_text(&name, value, max_query_chars)?,
				FieldCriterion::Boolean { .. } => {},
				FieldCriterion::Radio { selected, unselected, .. } =>
					if selected.is_empty() && unselected.is_empty() {
						return Err(Error::invalid_key(format!("{name} selects nothing.")));
					},
				FieldCriterion::Tag { selected, unselected, .. } =>
					if selected.is_empty() && unselected.is_empty() {
						return Err(Error::invalid_key(format!("{name} selects nothing.")));
					},
				FieldCriterion::File { filename, has_file } => {
					if filename.is_none() && has_file.is_none() {
						return Err(Error::invalid_key(format!("{name} has no file criteria.")));
					}
					if let Some(filename) = filename {
						check_text(&name, filename, max_query_chars)?;
					}
				},
				FieldCriterion::DateRange { range } => {
					range.bounds()?;
				},
			}
		}
		for (schema_id, criteria) in &self.schemas {
			if criteria.is_empty() {
				return Err(Error::invalid_key(format!("schemas.{schema_id} has no criteria.")));
			}
			if let Some(range) = &criteria.created {
				range.bounds()?;
			}
			if let Some(range) = &criteria.modified {
				range.bounds()?;
			}
		}
		for (uuid, value) in &self.template_fields {
			check_text(&format!("template_fields.{uuid}"), value, max_query_chars)?;
		}

		Ok(())
	}

	/// Whether any criterion beyond the general query is present.
	pub fn is_advanced(&self) -> bool {
		!self.fields.is_empty() || !self.schemas.is_empty() || !self.template_fields.is_empty()
	}
}

fn check_text(name: &str, value: &str, max_query_chars: usize) -> Result<()> {
	if value.trim().is_empty() {
		return Err(Error::invalid_key(format!("{name} must be non-empty.")));
	}
	if value.chars().count() > max_query_chars {
		return Err(Error::invalid_key(format!(
			"{name} must be at most {max_query_chars} characters."
		)));
	}

	Ok(())
}
