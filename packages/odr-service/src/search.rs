mod cache;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Error, OdrService, Result};
use odr_domain::{
	merge,
	model::{RecordId, SchemaId, UserId},
	permissions::PermissionOracle,
	predicate::{self, Facet, FacetPlan},
	search_key::{SearchKey, SortOrder},
	search_tree::{self, RecordRow, SchemaTree},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchRequest {
	/// `None` searches as an anonymous visitor.
	pub user_id: Option<UserId>,
	pub key: SearchKey,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResponse {
	pub schema_id: SchemaId,
	/// Matching top-level records in the requested order.
	pub records: Vec<RecordId>,
	/// Every visible record beneath a matching top-level record, ascending.
	pub complete: Vec<RecordId>,
	/// Query fragments the grammar dropped.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub discarded: Vec<String>,
}

impl OdrService {
	pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse> {
		let key = req.key;
		let max_terms = self.cfg.search.max_terms as usize;

		key.validate(self.cfg.search.max_query_chars as usize)?;

		let permissions = self.store.load_permissions(req.user_id).await?;
		let mut structure = self.store.load_search_structure(key.schema_id).await?;
		let top = structure.schemas.get(&key.schema_id).ok_or_else(|| Error::NotFound {
			message: format!("Schema {} does not exist.", key.schema_id),
		})?;

		if !top.is_top_level() {
			return Err(Error::InvalidRequest {
				message: format!("Schema {} is not a top-level schema.", key.schema_id),
			});
		}
		if !permissions.can_view_schema(top) {
			return Err(Error::PermissionDenied {
				message: format!("Schema {} is not visible to this user.", key.schema_id),
			});
		}

		structure.retain(
			|schema| permissions.can_view_schema(schema),
			|field| permissions.can_view_field(field),
		);

		let plan = predicate::plan_facets(&key, &structure, max_terms)?;
		let schema_tree = SchemaTree::from_edges(key.schema_id, &structure.edges);
		let mut records = BTreeMap::new();

		for schema_id in schema_tree.schema_ids() {
			if structure.schemas.contains_key(&schema_id) {
				records.insert(schema_id, self.schema_records(schema_id).await?);
			}
		}

		let non_public_visible = records
			.keys()
			.copied()
			.filter(|schema_id| permissions.can_view_non_public(*schema_id))
			.collect::<BTreeSet<_>>();
		let tree = search_tree::build_tree(
			&schema_tree,
			&records,
			&plan.searched_schemas(),
			&non_public_visible,
		);
		let matched = self.evaluate_advanced(&plan, &records).await;
		let general = self.evaluate_general(&plan).await;
		let merged = merge::merge(&tree, &matched, general.as_ref(), !plan.by_schema.is_empty());
		let top_rows = records
			.get(&key.schema_id)
			.into_iter()
			.flatten()
			.map(|row| (row.id, row))
			.collect::<BTreeMap<_, _>>();
		let ordered = sort_records(merged.top_level, &top_rows, key.sort);

		tracing::info!(
			schema_id = key.schema_id,
			user_id = ?req.user_id,
			facets = plan.by_schema.values().map(Vec::len).sum::<usize>(),
			matched = ordered.len(),
			"Search completed."
		);

		Ok(SearchResponse {
			schema_id: key.schema_id,
			records: ordered,
			complete: merged.complete.into_iter().collect(),
			discarded: plan.discarded,
		})
	}

	/// Records matching every facet of their schema, unioned over schemas.
	async fn evaluate_advanced(
		&self,
		plan: &FacetPlan,
		records: &BTreeMap<SchemaId, Vec<RecordRow>>,
	) -> BTreeSet<RecordId> {
		let mut matched = BTreeSet::new();

		for (schema_id, facets) in &plan.by_schema {
			let schema_records = records
				.get(schema_id)
				.into_iter()
				.flatten()
				.map(|row| row.id)
				.collect::<BTreeSet<_>>();
			let mut sets = Vec::with_capacity(facets.len());

			for facet in facets {
				sets.push(match self.evaluate_facet(facet, &schema_records).await {
					Ok(ids) => ids,
					Err(err) => {
						tracing::warn!(
							schema_id,
							error = %err,
							"Facet evaluation failed; treating as no match."
						);

						BTreeSet::new()
					},
				});
			}

			matched.extend(predicate::intersect_all(sets));
		}

		matched
	}

	async fn evaluate_facet(
		&self,
		facet: &Facet,
		schema_records: &BTreeSet<RecordId>,
	) -> Result<BTreeSet<RecordId>> {
		let slot = facet.cache_slot().filter(|_| self.cfg.search.cache_enabled);

		if let Some(slot) = &slot
			&& let Some(ids) = self.read_ids(slot).await
		{
			return Ok(ids);
		}

		let generation = match &slot {
			Some(_) => self.search_generation().await,
			None => None,
		};
		let mut results = Vec::new();

		for predicate in facet.predicates() {
			results.push(self.evaluate_cached(predicate).await?);
		}

		let ids = facet.combine(results, schema_records);

		if let Some(slot) = &slot {
			self.write_ids(slot, &ids).await;
			self.discard_if_invalidated(&slot.key, &generation).await;
		}

		Ok(ids)
	}

	/// Union of every searchable field matching the general query.
	async fn evaluate_general(&self, plan: &FacetPlan) -> Option<BTreeSet<RecordId>> {
		let general = plan.general.as_ref()?;
		let mut ids = BTreeSet::new();

		for predicate in &general.predicates {
			match self.evaluate_cached(predicate).await {
				Ok(hits) => ids.extend(hits),
				Err(err) => tracing::warn!(
					schema_id = predicate.schema_id(),
					error = %err,
					"General search predicate failed; skipping it."
				),
			}
		}

		Some(ids)
	}
}

fn sort_records(
	mut ids: Vec<RecordId>,
	rows: &BTreeMap<RecordId, &RecordRow>,
	sort: SortOrder,
) -> Vec<RecordId> {
	match sort {
		SortOrder::RecordId => ids.sort_unstable(),
		SortOrder::Created =>
			ids.sort_by_key(|id| (rows.get(id).map(|row| row.created_at), *id)),
		SortOrder::Updated =>
			ids.sort_by_key(|id| (rows.get(id).map(|row| row.updated_at), *id)),
	}

	ids
}
