//! Parent, child and linked record trees for one search family.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::{RecordId, SchemaEdge, SchemaId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum RecordStatus {
	/// The user cannot see the record; never promoted.
	NotPublicExcluded = -2,
	UndecidedMustMatch = -1,
	NotSearched = 0,
	Matched = 1,
}
impl RecordStatus {
	pub fn value(self) -> i8 {
		self as i8
	}

	pub fn is_negative(self) -> bool {
		self.value() < 0
	}
}

pub type StatusMap = BTreeMap<RecordId, RecordStatus>;

/// Record listing row cached per schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRow {
	pub id: RecordId,
	pub schema_id: SchemaId,
	pub parent_id: RecordId,
	/// Records of any schema that link to this one.
	#[serde(default)]
	pub linked_from: Vec<RecordId>,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
	pub created_by: Option<UserId>,
	pub updated_by: Option<UserId>,
	pub is_public: bool,
}
impl RecordRow {
	pub fn is_top_level(&self) -> bool {
		self.parent_id == self.id
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSchema {
	pub schema_id: SchemaId,
	pub is_link: bool,
}

/// Schema-level shape of a family, reachable from the top schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTree {
	pub top_schema_id: SchemaId,
	pub children: BTreeMap<SchemaId, Vec<ChildSchema>>,
}
impl SchemaTree {
	pub fn from_edges(top_schema_id: SchemaId, edges: &[SchemaEdge]) -> Self {
		let mut children = BTreeMap::<SchemaId, Vec<ChildSchema>>::new();

		for edge in edges {
			children
				.entry(edge.ancestor_id)
				.or_default()
				.push(ChildSchema { schema_id: edge.descendant_id, is_link: edge.is_link });
		}

		Self { top_schema_id, children }
	}

	/// Every schema reachable from the top without revisiting a schema on the current path.
	pub fn schema_ids(&self) -> BTreeSet<SchemaId> {
		let mut out = BTreeSet::from([self.top_schema_id]);
		let mut path = Vec::new();

		self.visit(self.top_schema_id, &mut path, &mut |schema_id| {
			out.insert(schema_id);
		});

		out
	}

	/// Searched schemas plus every schema with a searched descendant.
	pub fn relevant(&self, searched: &BTreeSet<SchemaId>) -> BTreeSet<SchemaId> {
		let mut relevant = BTreeSet::new();
		let mut path = Vec::new();

		self.mark_relevant(self.top_schema_id, searched, &mut path, &mut relevant);

		relevant
	}

	fn mark_relevant(
		&self,
		schema_id: SchemaId,
		searched: &BTreeSet<SchemaId>,
		path: &mut Vec<SchemaId>,
		relevant: &mut BTreeSet<SchemaId>,
	) -> bool {
		path.push(schema_id);

		let mut any = searched.contains(&schema_id);

		for child in self.children.get(&schema_id).into_iter().flatten() {
			if path.contains(&child.schema_id) {
				continue;
			}

			any |= self.mark_relevant(child.schema_id, searched, path, relevant);
		}

		path.pop();

		if any {
			relevant.insert(schema_id);
		}

		any
	}

	fn visit(&self, schema_id: SchemaId, path: &mut Vec<SchemaId>, f: &mut impl FnMut(SchemaId)) {
		path.push(schema_id);

		for child in self.children.get(&schema_id).into_iter().flatten() {
			if path.contains(&child.schema_id) {
				continue;
			}

			f(child.schema_id);
			self.visit(child.schema_id, path, f);
		}

		path.pop();
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordNode {
	pub children: BTreeMap<SchemaId, RecordGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordGroup {
	pub schema_id: SchemaId,
	pub records: BTreeMap<RecordId, RecordNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTree {
	/// Synthetic level keyed by the top schema, holding its top-level records.
	pub root: RecordGroup,
	pub statuses: StatusMap,
	pub relevant: BTreeSet<SchemaId>,
}

struct RecordIndex {
	children: HashMap<(SchemaId, RecordId), Vec<RecordId>>,
	linked: HashMap<(SchemaId, RecordId), Vec<RecordId>>,
}
impl RecordIndex {
	fn new(records: &BTreeMap<SchemaId, Vec<RecordRow>>) -> Self {
		let mut children = HashMap::<_, Vec<_>>::new();
		let mut linked = HashMap::<_, Vec<_>>::new();

		for (schema_id, rows) in records {
			for row in rows {
				if !row.is_top_level() {
					children.entry((*schema_id, row.parent_id)).or_default().push(row.id);
				}

				for ancestor in &row.linked_from {
					linked.entry((*schema_id, *ancestor)).or_default().push(row.id);
				}
			}
		}

		Self { children, linked }
	}

	fn beneath(&self, child: ChildSchema, parent_record: RecordId) -> &[RecordId] {
		let map = if child.is_link { &self.linked } else { &self.children };

		map.get(&(child.schema_id, parent_record)).map(Vec::as_slice).unwrap_or_default()
	}
}

/// Builds the record tree and initial status map.
///
/// `searched` holds schemas carrying advanced criteria; `non_public_visible` holds schemas
/// whose non-public records the user may see.
pub fn build_tree(
	schemas: &SchemaTree,
	records: &BTreeMap<SchemaId, Vec<RecordRow>>,
	searched: &BTreeSet<SchemaId>,
	non_public_visible: &BTreeSet<SchemaId>,
) -> SearchTree {
	let mut statuses = StatusMap::new();

	for (schema_id, rows) in records {
		for row in rows {
			let status = if !row.is_public && !non_public_visible.contains(schema_id) {
				RecordStatus::NotPublicExcluded
			} else if searched.contains(schema_id) {
				RecordStatus::UndecidedMustMatch
			} else {
				RecordStatus::NotSearched
			};

			statuses.insert(row.id, status);
		}
	}

	let index = RecordIndex::new(records);
	let top_ids = records
		.get(&schemas.top_schema_id)
		.into_iter()
		.flatten()
		.filter(|row| row.is_top_level())
		.map(|row| row.id)
		.collect::<Vec<_>>();
	let mut path = vec![schemas.top_schema_id];
	let root = RecordGroup {
		schema_id: schemas.top_schema_id,
		records: top_ids
			.into_iter()
			.map(|id| (id, build_node(schemas, &index, schemas.top_schema_id, id, &mut path)))
			.collect(),
	};

	SearchTree { root, statuses, relevant: schemas.relevant(searched) }
}

fn build_node(
	schemas: &SchemaTree,
	index: &RecordIndex,
	schema_id: SchemaId,
	record_id: RecordId,
	path: &mut Vec<SchemaId>,
) -> RecordNode {
	let mut node = RecordNode::default();

	for child in schemas.children.get(&schema_id).into_iter().flatten() {
		if path.contains(&child.schema_id) {
			continue;
		}

		path.push(child.schema_id);

		let records = index
			.beneath(*child, record_id)
			.iter()
			.map(|id| (*id, build_node(schemas, index, child.schema_id, *id, path)))
			.collect();

		path.pop();
		node.children.insert(child.schema_id, RecordGroup { schema_id: child.schema_id, records });
	}

	node
}
