//! Bottom-up vote merge of per-facet results into a record tree.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
	model::{RecordId, SchemaId},
	search_tree::{RecordGroup, RecordNode, RecordStatus, SearchTree, StatusMap},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
	Matched,
	Unmatched,
	Excluded,
	Abstain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
	Exclude,
	Abstain,
	Include,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
	/// Matching top-level record ids, ascending.
	pub top_level: Vec<RecordId>,
	/// Every visible record beneath a matching top-level record, including it.
	pub complete: BTreeSet<RecordId>,
	pub statuses: StatusMap,
}

/// Merges the raw matched set into the tree.
///
/// `general` is the record set matching the general query, if one was given; a top-level
/// record then also needs a visible record in its subtree inside that set. When
/// `has_criteria` is false every visible top-level record matches.
pub fn merge(
	tree: &SearchTree,
	matched: &BTreeSet<RecordId>,
	general: Option<&BTreeSet<RecordId>>,
	has_criteria: bool,
) -> MergeResult {
	let mut statuses = tree.statuses.clone();

	for id in matched {
		if let Some(status) = statuses.get_mut(id)
			&& *status != RecordStatus::NotPublicExcluded
		{
			*status = RecordStatus::Matched;
		}
	}

	let mut top_level = Vec::new();

	for (record_id, node) in &tree.root.records {
		let (verdict, next) = fold_record(*record_id, node, statuses, &tree.relevant);

		statuses = next;

		let advanced_ok = match verdict {
			Verdict::Matched => true,
			Verdict::Abstain => !has_criteria,
			Verdict::Unmatched | Verdict::Excluded => false,
		};
		let general_ok = general.is_none_or(|general| {
			subtree_hits(*record_id, node, &statuses, general)
		});

		if advanced_ok && general_ok {
			statuses.insert(*record_id, RecordStatus::Matched);
			top_level.push(*record_id);
		}
	}

	let mut complete = BTreeSet::new();

	for record_id in &top_level {
		if let Some(node) = tree.root.records.get(record_id) {
			collect_visible(*record_id, node, &statuses, &mut complete);
		}
	}

	MergeResult { top_level, complete, statuses }
}

/// Folds one record's subtree, returning its verdict and the updated statuses.
pub fn fold_record(
	record_id: RecordId,
	node: &RecordNode,
	statuses: StatusMap,
	relevant: &BTreeSet<SchemaId>,
) -> (Verdict, StatusMap) {
	let status = statuses.get(&record_id).copied().unwrap_or(RecordStatus::NotSearched);

	if status == RecordStatus::NotPublicExcluded {
		return (Verdict::Excluded, statuses);
	}

	let mut statuses = statuses;
	let mut include = false;

	for group in node.children.values() {
		let (vote, next) = fold_group(group, statuses, relevant);

		statuses = next;

		match vote {
			Vote::Exclude => {
				statuses.insert(record_id, RecordStatus::UndecidedMustMatch);

				return (Verdict::Unmatched, statuses);
			},
			Vote::Include => include = true,
			Vote::Abstain => {},
		}
	}

	let verdict = match status {
		RecordStatus::Matched => Verdict::Matched,
		RecordStatus::UndecidedMustMatch => Verdict::Unmatched,
		RecordStatus::NotSearched if include => {
			statuses.insert(record_id, RecordStatus::Matched);

			Verdict::Matched
		},
		RecordStatus::NotSearched => Verdict::Abstain,
		RecordStatus::NotPublicExcluded => Verdict::Excluded,
	};

	(verdict, statuses)
}

/// A group includes when any record matches and excludes when it is searched-relevant and
/// nothing in it can match, which includes an empty group.
pub fn fold_group(
	group: &RecordGroup,
	statuses: StatusMap,
	relevant: &BTreeSet<SchemaId>,
) -> (Vote, StatusMap) {
	let mut statuses = statuses;
	let mut any_matched = false;
	let mut all_failed = true;

	for (record_id, node) in &group.records {
		let (verdict, next) = fold_record(*record_id, node, statuses, relevant);

		statuses = next;

		match verdict {
			Verdict::Matched => any_matched = true,
			Verdict::Abstain => all_failed = false,
			Verdict::Unmatched | Verdict::Excluded => {},
		}
	}

	let vote = if any_matched {
		Vote::Include
	} else if all_failed && relevant.contains(&group.schema_id) {
		Vote::Exclude
	} else {
		Vote::Abstain
	};

	(vote, statuses)
}

fn subtree_hits(
	record_id: RecordId,
	node: &RecordNode,
	statuses: &StatusMap,
	general: &BTreeSet<RecordId>,
) -> bool {
	if statuses.get(&record_id) == Some(&RecordStatus::NotPublicExcluded) {
		return false;
	}
	if general.contains(&record_id) {
		return true;
	}

	node.children.values().any(|group| {
		group.records.iter().any(|(child_id, child)| subtree_hits(*child_id, child, statuses, general))
	})
}

fn collect_visible(
	record_id: RecordId,
	node: &RecordNode,
	statuses: &StatusMap,
	out: &mut BTreeSet<RecordId>,
) {
	if statuses.get(&record_id).is_some_and(|status| status.is_negative()) {
		return;
	}

	out.insert(record_id);

	for group in node.children.values() {
		for (child_id, child) in &group.records {
			collect_visible(*child_id, child, statuses, out);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use time::OffsetDateTime;

	use super::*;
	use crate::{
		model::SchemaEdge,
		search_tree::{RecordRow, SchemaTree, build_tree},
	};

	const A: SchemaId = 1;
	const B: SchemaId = 2;

	fn row(id: RecordId, schema_id: SchemaId, parent_id: RecordId, is_public: bool) -> RecordRow {
		RecordRow {
			id,
			schema_id,
			parent_id,
			linked_from: Vec::new(),
			created_at: OffsetDateTime::UNIX_EPOCH,
			updated_at: OffsetDateTime::UNIX_EPOCH,
			created_by: None,
			updated_by: None,
			is_public,
		}
	}

	fn schemas() -> SchemaTree {
		SchemaTree::from_edges(A, &[SchemaEdge {
			ancestor_id: A,
			descendant_id: B,
			is_link: false,
			multiple_allowed: true,
		}])
	}

	// A1 owns B1 and B2, A2 owns B3, A3 owns nothing.
	fn records(b2_public: bool) -> BTreeMap<SchemaId, Vec<RecordRow>> {
		BTreeMap::from([
			(A, vec![row(101, A, 101, true), row(102, A, 102, true), row(103, A, 103, true)]),
			(B, vec![row(201, B, 101, true), row(202, B, 101, b2_public), row(203, B, 102, true)]),
		])
	}

	#[test]
	fn child_match_promotes_only_its_parent() {
		let tree = build_tree(&schemas(), &records(true), &BTreeSet::from([B]), &BTreeSet::new());
		let result = merge(&tree, &BTreeSet::from([201]), None, true);

		assert_eq!(result.top_level, vec![101]);
		assert_eq!(result.complete, BTreeSet::from([101, 201]));
		assert_eq!(result.statuses[&102], RecordStatus::UndecidedMustMatch);
		assert_eq!(result.statuses[&202], RecordStatus::UndecidedMustMatch);
	}

	#[test]
	fn non_public_record_never_includes() {
		let tree = build_tree(&schemas(), &records(false), &BTreeSet::from([B]), &BTreeSet::new());
		let result = merge(&tree, &BTreeSet::from([202]), None, true);

		assert!(result.top_level.is_empty());
		assert_eq!(result.statuses[&202], RecordStatus::NotPublicExcluded);
	}

	#[test]
	fn non_public_record_is_neutral_beside_a_match() {
		let tree = build_tree(&schemas(), &records(false), &BTreeSet::from([B]), &BTreeSet::new());
		let result = merge(&tree, &BTreeSet::from([201]), None, true);

		assert_eq!(result.top_level, vec![101]);
		assert!(!result.complete.contains(&202));
	}

	#[test]
	fn lone_non_public_record_forces_exclusion() {
		let records = BTreeMap::from([
			(A, vec![row(101, A, 101, true)]),
			(B, vec![row(201, B, 101, false)]),
		]);
		let tree = build_tree(&schemas(), &records, &BTreeSet::from([B]), &BTreeSet::new());
		let group = &tree.root.records[&101].children[&B];
		let (vote, _) = fold_group(group, tree.statuses.clone(), &tree.relevant);

		assert_eq!(vote, Vote::Exclude);
	}

	#[test]
	fn visible_non_public_records_take_part() {
		let tree = build_tree(&schemas(), &records(false), &BTreeSet::from([B]), &BTreeSet::from([B]));
		let result = merge(&tree, &BTreeSet::from([202]), None, true);

		assert_eq!(result.top_level, vec![101]);
	}

	#[test]
	fn no_criteria_matches_every_visible_top_level_record() {
		let mut records = records(true);

		if let Some(rows) = records.get_mut(&A) {
			rows[2].is_public = false;
		}

		let tree = build_tree(&schemas(), &records, &BTreeSet::new(), &BTreeSet::new());
		let result = merge(&tree, &BTreeSet::new(), None, false);

		assert_eq!(result.top_level, vec![101, 102]);
		assert_eq!(result.complete, BTreeSet::from([101, 102, 201, 202, 203]));
	}

	#[test]
	fn general_query_needs_a_visible_hit_in_the_subtree() {
		let tree = build_tree(&schemas(), &records(false), &BTreeSet::new(), &BTreeSet::new());
		let result = merge(&tree, &BTreeSet::new(), Some(&BTreeSet::from([202, 203])), false);

		assert_eq!(result.top_level, vec![102]);
	}
}
