use std::{
	collections::BTreeSet,
	sync::{Arc, Mutex},
};

use odr_domain::{
	cache_keys::InvalidationContext,
	hydrate::{HydratedPools, HydrationRequest},
	model::{FieldId, FieldType, GroupPurpose, RecordId, Schema, SchemaId, UserId},
	permissions::UserPermissions,
	predicate::{Predicate, SearchStructure},
	search_key::{FieldCriterion, SearchKey, SortOrder},
	search_tree::RecordRow,
	stack::StructureRows,
	sync_plan::{AppliedPlan, SyncPlan},
};
use odr_service::{
	BoxFuture, CacheEvent, EntityStore, Error, MemoryCacheStore, MemoryLockService, OdrService,
	Result, SearchRequest,
};
use odr_testkit::{MemoryState, MemoryStore};

struct Fixture {
	store: Arc<MemoryStore>,
	service: OdrService,
	viewer: UserId,
	projects: SchemaId,
	title: FieldId,
	label: FieldId,
	// Project records, the last one non-public.
	p: [RecordId; 3],
	// Sample records: s[0] and s[1] under p[0], s[2] under p[1].
	s: [RecordId; 3],
}

fn fixture() -> Fixture {
	let mut state = MemoryState::default();
	let viewer = state.add_user(false);
	let projects = state.add_top_schema("Projects", true);
	let samples = state.add_child_schema(projects, "Samples");
	let title = state.add_field(projects, "Title", FieldType::ShortVarchar);
	let label = state.add_field(samples, "Label", FieldType::LongText);

	state.add_to_group(viewer, projects, GroupPurpose::ViewAll);

	let p = [
		state.add_record(projects, None, true),
		state.add_record(projects, None, true),
		state.add_record(projects, None, false),
	];
	let s = [
		state.add_record(samples, Some(p[0]), true),
		state.add_record(samples, Some(p[0]), true),
		state.add_record(samples, Some(p[1]), true),
	];

	state.set_text(p[0], title, "Alpha survey");
	state.set_text(p[2], title, "Gamma survey");
	state.set_text(s[0], label, "blue tube");
	state.set_text(s[1], label, "red tube");
	state.set_text(s[2], label, "red tube");

	let store = Arc::new(MemoryStore::new(state));
	let service = odr_testkit::memory_service(odr_testkit::test_config(), store.clone());

	Fixture { store, service, viewer, projects, title, label, p, s }
}

fn text(key: &mut SearchKey, field_id: FieldId, value: &str) {
	key.fields.insert(field_id, FieldCriterion::Text { value: value.to_string() });
}

#[tokio::test]
async fn no_criteria_lists_visible_top_level_records() {
	let fx = fixture();
	let anonymous = fx
		.service
		.search(SearchRequest { user_id: None, key: SearchKey::new(fx.projects) })
		.await
		.expect("Search failed.");
	let viewer = fx
		.service
		.search(SearchRequest { user_id: Some(fx.viewer), key: SearchKey::new(fx.projects) })
		.await
		.expect("Search failed.");

	assert_eq!(anonymous.records, vec![fx.p[0], fx.p[1]]);
	assert_eq!(viewer.records, fx.p.to_vec());
}

#[tokio::test]
async fn child_criteria_promote_only_matching_parents() {
	let fx = fixture();
	let mut key = SearchKey::new(fx.projects);

	text(&mut key, fx.label, "blue");

	let response = fx
		.service
		.search(SearchRequest { user_id: None, key })
		.await
		.expect("Search failed.");

	assert_eq!(response.records, vec![fx.p[0]]);
	assert!(response.complete.contains(&fx.p[0]));
	assert!(response.complete.contains(&fx.s[0]));
	assert!(!response.complete.contains(&fx.s[2]));
}

#[tokio::test]
async fn empty_exact_query_matches_missing_values() {
	let fx = fixture();
	let mut key = SearchKey::new(fx.projects);

	text(&mut key, fx.title, r#""""#);

	let response = fx
		.service
		.search(SearchRequest { user_id: Some(fx.viewer), key })
		.await
		.expect("Search failed.");

	assert_eq!(response.records, vec![fx.p[1]]);
}

#[tokio::test]
async fn non_public_matches_stay_hidden_from_anonymous() {
	let fx = fixture();
	let mut key = SearchKey::new(fx.projects);

	text(&mut key, fx.title, "survey");
	key.sort = SortOrder::Created;

	let anonymous = fx
		.service
		.search(SearchRequest { user_id: None, key: key.clone() })
		.await
		.expect("Search failed.");
	let viewer = fx
		.service
		.search(SearchRequest { user_id: Some(fx.viewer), key })
		.await
		.expect("Search failed.");

	assert_eq!(anonymous.records, vec![fx.p[0]]);
	assert_eq!(viewer.records, vec![fx.p[0], fx.p[2]]);
}

#[tokio::test]
async fn general_query_needs_a_hit_in_the_subtree() {
	let fx = fixture();
	let mut key = SearchKey::new(fx.projects);

	key.general = Some("red".to_string());

	let response = fx
		.service
		.search(SearchRequest { user_id: None, key })
		.await
		.expect("Search failed.");

	assert_eq!(response.records, vec![fx.p[0], fx.p[1]]);
}

#[tokio::test]
async fn private_schemas_reject_anonymous_search() {
	let mut state = MemoryState::default();
	let hidden = state.add_top_schema("Hidden", false);
	let store = Arc::new(MemoryStore::new(state));
	let service = odr_testkit::memory_service(odr_testkit::test_config(), store);
	let err = service
		.search(SearchRequest { user_id: None, key: SearchKey::new(hidden) })
		.await
		.expect_err("Search should fail.");

	assert!(matches!(err, Error::PermissionDenied { .. }));
}

#[tokio::test]
async fn repeated_search_is_served_from_cache_until_invalidated() {
	let fx = fixture();
	let mut key = SearchKey::new(fx.projects);

	text(&mut key, fx.title, "alpha");

	let request = SearchRequest { user_id: None, key };
	let first = fx.service.search(request.clone()).await.expect("Search failed.");
	let evaluated = fx.store.evaluations();
	let second = fx.service.search(request.clone()).await.expect("Search failed.");

	assert_eq!(first.records, second.records);
	assert_eq!(fx.store.evaluations(), evaluated);

	fx.store.update(|state| state.set_text(fx.p[1], fx.title, "Alpha two"));

	let report = fx
		.service
		.invalidate(CacheEvent::RecordModified { schema_id: fx.projects })
		.await
		.expect("Invalidation failed.");

	assert!(report.deleted > 0);

	let third = fx.service.search(request).await.expect("Search failed.");

	assert!(fx.store.evaluations() > evaluated);
	assert_eq!(third.records, vec![fx.p[0], fx.p[1]]);
}

#[tokio::test]
async fn unknown_fields_are_rejected() {
	let fx = fixture();
	let mut key = SearchKey::new(fx.projects);

	text(&mut key, 9_999, "x");

	let err = fx
		.service
		.search(SearchRequest { user_id: None, key })
		.await
		.expect_err("Search should fail.");

	assert!(matches!(err, Error::InvalidRequest { .. }));
}

/// Runs `edit` plus an invalidation from a second service after the next predicate evaluation
/// has read its result, before the searching service caches it.
struct InterleavedStore {
	inner: Arc<MemoryStore>,
	cache: Arc<MemoryCacheStore>,
	edit: Mutex<Option<(RecordId, FieldId, SchemaId)>>,
}
impl EntityStore for InterleavedStore {
	fn load_schema<'a>(&'a self, schema_id: SchemaId) -> BoxFuture<'a, Result<Schema>> {
		self.inner.load_schema(schema_id)
	}

	fn load_structure_rows<'a>(&'a self, root_id: SchemaId) -> BoxFuture<'a, Result<StructureRows>> {
		self.inner.load_structure_rows(root_id)
	}

	fn hydrate<'a>(&'a self, request: &'a HydrationRequest) -> BoxFuture<'a, Result<HydratedPools>> {
		self.inner.hydrate(request)
	}

	fn apply_plan<'a>(
		&'a self,
		plan: &'a SyncPlan,
		user_id: UserId,
	) -> BoxFuture<'a, Result<AppliedPlan>> {
		self.inner.apply_plan(plan, user_id)
	}

	fn load_search_structure<'a>(
		&'a self,
		top_schema_id: SchemaId,
	) -> BoxFuture<'a, Result<SearchStructure>> {
		self.inner.load_search_structure(top_schema_id)
	}

	fn list_records<'a>(&'a self, schema_id: SchemaId) -> BoxFuture<'a, Result<Vec<RecordRow>>> {
		self.inner.list_records(schema_id)
	}

	fn evaluate_predicate<'a>(
		&'a self,
		predicate: &'a Predicate,
	) -> BoxFuture<'a, Result<BTreeSet<RecordId>>> {
		Box::pin(async move {
			let ids = self.inner.evaluate_predicate(predicate).await?;
			let edit = self.edit.lock().unwrap_or_else(|err| err.into_inner()).take();

			if let Some((record_id, field_id, schema_id)) = edit {
				self.inner.update(|state| state.set_text(record_id, field_id, "Alpha two"));

				let writer = OdrService::new(
					odr_testkit::test_config(),
					self.inner.clone(),
					self.cache.clone(),
					Arc::new(MemoryLockService::default()),
				);

				writer.invalidate(CacheEvent::RecordModified { schema_id }).await?;
			}

			Ok(ids)
		})
	}

	fn load_permissions<'a>(
		&'a self,
		user_id: Option<UserId>,
	) -> BoxFuture<'a, Result<UserPermissions>> {
		self.inner.load_permissions(user_id)
	}

	fn load_invalidation_context<'a>(
		&'a self,
		schema_id: SchemaId,
	) -> BoxFuture<'a, Result<InvalidationContext>> {
		self.inner.load_invalidation_context(schema_id)
	}
}

#[tokio::test]
async fn invalidation_during_a_fill_keeps_the_stale_result_out_of_the_cache() {
	let fx = fixture();
	let cache = Arc::new(MemoryCacheStore::default());
	let store = Arc::new(InterleavedStore {
		inner: fx.store.clone(),
		cache: cache.clone(),
		edit: Mutex::new(Some((fx.p[1], fx.title, fx.projects))),
	});
	let service = OdrService::new(
		odr_testkit::test_config(),
		store,
		cache,
		Arc::new(MemoryLockService::default()),
	);
	let mut key = SearchKey::new(fx.projects);

	text(&mut key, fx.title, "alpha");

	let request = SearchRequest { user_id: None, key };
	let first = service.search(request.clone()).await.expect("Search failed.");

	// Computed before the edit landed.
	assert_eq!(first.records, vec![fx.p[0]]);

	let second = service.search(request).await.expect("Search failed.");

	assert_eq!(second.records, vec![fx.p[0], fx.p[1]]);
}

#[tokio::test]
async fn linked_matches_promote_every_linking_record() {
	let mut state = MemoryState::default();
	let projects = state.add_top_schema("Projects", true);
	let sites = state.add_top_schema("Sites", true);
	let name = state.add_field(sites, "Name", FieldType::ShortVarchar);

	state.link_schema(projects, sites);

	let a = [
		state.add_record(projects, None, true),
		state.add_record(projects, None, true),
		state.add_record(projects, None, true),
		state.add_record(projects, None, true),
	];
	let harbor = state.add_record(sites, None, true);
	let inland = state.add_record(sites, None, true);

	state.link_records(a[0], harbor);
	state.link_records(a[1], harbor);
	state.link_records(a[2], inland);
	state.set_text(harbor, name, "harbor");
	state.set_text(inland, name, "inland");

	let store = Arc::new(MemoryStore::new(state));
	let service = odr_testkit::memory_service(odr_testkit::test_config(), store);
	let mut key = SearchKey::new(projects);

	text(&mut key, name, "harbor");

	let response =
		service.search(SearchRequest { user_id: None, key }).await.expect("Search failed.");

	assert_eq!(response.records, vec![a[0], a[1]]);
}
