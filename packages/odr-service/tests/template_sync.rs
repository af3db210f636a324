use std::{sync::Arc, time::Duration};

use odr_domain::model::{
	FieldId, FieldType, GroupPurpose, SchemaId, SetupStep, SlotTarget, ThemeKind, UserId,
};
use odr_service::{
	Error, LockService, MemoryCacheStore, MemoryLockService, OdrService, SyncOutcome,
};
use odr_testkit::{MemoryState, MemoryStore};

struct Fixture {
	store: Arc<MemoryStore>,
	service: OdrService,
	admin: UserId,
	template: SchemaId,
	derived: SchemaId,
	color: FieldId,
}

// Template "Samples" with a radio field, and a faithful derived copy administered by `admin`.
fn fixture() -> Fixture {
	let mut state = MemoryState::default();
	let admin = state.add_user(false);
	let template = state.add_top_schema("Samples", true);
	let color = state.add_field(template, "Color", FieldType::SingleRadio);

	state.add_option(color, "Red");
	state.add_option(color, "Blue");

	let derived = state.derive_from(template, "Lab samples");

	state.add_to_group(admin, derived, GroupPurpose::Admin);

	let store = Arc::new(MemoryStore::new(state));
	let service = odr_testkit::memory_service(odr_testkit::test_config(), store.clone());

	Fixture { store, service, admin, template, derived, color }
}

fn derived_field(store: &MemoryStore, template_field: FieldId) -> Option<FieldId> {
	store.read(|state| {
		state
			.fields
			.values()
			.find(|field| field.master_field_id == Some(template_field))
			.map(|field| field.id)
	})
}

#[tokio::test]
async fn faithful_copy_is_up_to_date() {
	let fx = fixture();
	let report = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::UpToDate);
	assert_eq!(report.mutations, 0);
	assert!(
		!fx.service.can_sync_with_template(Some(fx.admin), fx.derived).await.expect("Check failed.")
	);
}

#[tokio::test]
async fn new_option_is_copied_once() {
	let fx = fixture();

	fx.store.update(|state| state.add_option(fx.color, "Green"));

	assert!(fx.service.can_sync_with_template(Some(fx.admin), fx.derived).await.expect("Check failed."));

	let report = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::Applied);
	assert_eq!(report.mutations, 1);
	assert_eq!(report.touched, vec![fx.derived]);

	let copy = derived_field(&fx.store, fx.color).expect("Derived field is missing.");
	let names = fx.store.read(|state| {
		let mut names = state
			.options
			.values()
			.filter(|option| option.field_id == copy)
			.map(|option| option.name.clone())
			.collect::<Vec<_>>();

		names.sort();

		names
	});

	assert_eq!(names, ["Blue", "Green", "Red"]);

	let again = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(again.outcome, SyncOutcome::UpToDate);
	assert_eq!(again.mutations, 0);
}

#[tokio::test]
async fn removed_option_drops_selections() {
	let fx = fixture();
	let copy = derived_field(&fx.store, fx.color).expect("Derived field is missing.");
	let blue_uuid = fx.store.update(|state| {
		let blue = state
			.options
			.values()
			.find(|option| option.field_id == fx.color && option.name == "Blue")
			.cloned()
			.expect("Blue option is missing.");
		let derived_blue = state
			.options
			.values()
			.find(|option| option.field_id == copy && option.option_uuid == blue.option_uuid)
			.map(|option| option.id)
			.expect("Derived blue option is missing.");
		let record = state.add_record(fx.derived, None, true);

		state.select_option(record, derived_blue);
		state.options.remove(&blue.id);

		blue.option_uuid
	});
	let report = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::Applied);
	// The option and the one selection of it.
	assert_eq!(report.mutations, 2);

	fx.store.read(|state| {
		assert!(!state.options.values().any(|option| option.option_uuid == blue_uuid));
		assert!(state.radio_selections.is_empty());
	});
}

#[tokio::test]
async fn new_field_gets_layout_and_rights() {
	let fx = fixture();
	let size = fx.store.update(|state| state.add_field(fx.template, "Size", FieldType::ShortVarchar));
	let report = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::Applied);

	let copy = derived_field(&fx.store, size).expect("Derived field is missing.");

	fx.store.read(|state| {
		assert_eq!(state.fields[&copy].schema_id, fx.derived);
		assert_eq!(state.fields[&copy].name, "Size");
		assert_eq!(state.field_rights.iter().filter(|(_, field, _)| *field == copy).count(), 4);

		let theme = state.master_theme(fx.derived).expect("Derived theme is missing.");
		let placed = state.layout_slots.values().any(|slot| {
			slot.target == SlotTarget::Field { field_id: copy }
				&& state.layout_groups[&slot.group_id].theme_id == theme.id
		});

		assert!(placed);
	});

	let again = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(again.outcome, SyncOutcome::UpToDate);
}

#[tokio::test]
async fn new_child_schema_is_created_under_the_derived_root() {
	let fx = fixture();
	let (aliquots, volume) = fx.store.update(|state| {
		let aliquots = state.add_child_schema(fx.template, "Aliquots");
		let volume = state.add_field(aliquots, "Volume", FieldType::DecimalValue);

		(aliquots, volume)
	});
	let report = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::Applied);
	assert_eq!(report.created.len(), 1);

	let created = report.created[0];

	fx.store.read(|state| {
		let schema = &state.schemas[&created];

		assert_eq!(schema.master_template_id, Some(aliquots));
		assert_eq!(schema.parent_id, fx.derived);
		assert_eq!(schema.grandparent_id, fx.derived);
		assert_eq!(schema.setup_step, SetupStep::Operational);
		assert!(state.edges.iter().any(|edge| {
			edge.ancestor_id == fx.derived && edge.descendant_id == created && !edge.is_link
		}));
		assert!(state.master_theme(created).is_some());
		assert!(
			state.schema_rights.iter().any(|(_, schema_id, rights)| *schema_id == created && rights.admin)
		);
	});

	let copy = derived_field(&fx.store, volume).expect("Derived field is missing.");

	assert_eq!(fx.store.read(|state| state.fields[&copy].schema_id), created);

	let again = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(again.outcome, SyncOutcome::UpToDate);
}

#[tokio::test]
async fn concurrent_syncs_apply_once() {
	let fx = fixture();

	fx.store.update(|state| state.add_option(fx.color, "Green"));

	let (first, second) = tokio::join!(
		fx.service.sync_with_template(fx.admin, fx.derived),
		fx.service.sync_with_template(fx.admin, fx.derived),
	);
	let reports = [first.expect("Sync failed."), second.expect("Sync failed.")];
	let applied = reports.iter().filter(|report| report.outcome == SyncOutcome::Applied).count();

	assert_eq!(applied, 1);
	assert_eq!(reports.iter().map(|report| report.mutations).sum::<usize>(), 1);
}

#[tokio::test]
async fn held_lock_yields_concurrent_sync() {
	let fx = fixture();
	let locks = Arc::new(MemoryLockService::default());
	let service = OdrService::new(
		odr_testkit::test_config(),
		fx.store.clone(),
		Arc::new(MemoryCacheStore::default()),
		locks.clone(),
	);

	fx.store.update(|state| state.add_option(fx.color, "Green"));

	let token = locks
		.acquire(&format!("template_sync_{}", fx.derived), Duration::from_secs(30))
		.await
		.expect("Acquire failed.")
		.expect("Lock should be free.");
	let releaser = {
		let locks = locks.clone();

		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(100)).await;
			locks.release(&token).await
		})
	};
	let report = service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::ConcurrentSync);
	assert_eq!(report.mutations, 0);
	assert!(releaser.await.expect("Releaser panicked.").expect("Release failed."));

	let report = service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::Applied);
	assert!(!locks.is_held(&format!("template_sync_{}", fx.derived)));
}

#[tokio::test]
async fn non_admins_cannot_sync() {
	let fx = fixture();
	let viewer = fx.store.update(|state| {
		let viewer = state.add_user(false);

		state.add_to_group(viewer, fx.derived, GroupPurpose::ViewOnly);

		viewer
	});

	fx.store.update(|state| state.add_option(fx.color, "Green"));

	let err = fx.service.sync_with_template(viewer, fx.derived).await.expect_err("Sync should fail.");

	assert!(matches!(err, Error::PermissionDenied { .. }));
	assert!(!fx.service.can_sync_with_template(Some(viewer), fx.derived).await.expect("Check failed."));
	assert!(!fx.service.can_sync_with_template(None, fx.derived).await.expect("Check failed."));
}

#[tokio::test]
async fn templates_have_nothing_to_diff_against() {
	let fx = fixture();
	let err = fx.service.diff_with_template(fx.template).await.expect_err("Diff should fail.");

	assert!(matches!(err, Error::InvalidRequest { .. }));
}

fn copies_of(store: &MemoryStore, template_schema: SchemaId) -> Vec<SchemaId> {
	store.read(|state| {
		state
			.schemas
			.values()
			.filter(|schema| schema.master_template_id == Some(template_schema))
			.map(|schema| schema.id)
			.collect()
	})
}

#[tokio::test]
async fn linked_schema_is_created_once_for_every_link() {
	let fx = fixture();
	let (locations, site) = fx.store.update(|state| {
		let locations = state.add_top_schema("Locations", true);
		let site = state.add_field(locations, "Site", FieldType::ShortVarchar);
		let aliquots = state.add_child_schema(fx.template, "Aliquots");

		state.link_schema(fx.template, locations);
		state.link_schema(aliquots, locations);

		(locations, site)
	});
	let report = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::Applied);
	assert_eq!(report.created.len(), 2);

	let copies = copies_of(&fx.store, locations);

	assert_eq!(copies.len(), 1);

	let copy = copies[0];

	assert!(report.created.contains(&copy));

	fx.store.read(|state| {
		let schema = &state.schemas[&copy];
		let aliquots_copy = report
			.created
			.iter()
			.copied()
			.find(|id| *id != copy)
			.expect("Derived child is missing.");

		assert!(schema.is_top_level());
		assert_eq!(state.fields.values().filter(|f| f.master_field_id == Some(site)).count(), 1);
		// One link from the derived root and one from the derived child.
		for ancestor in [fx.derived, aliquots_copy] {
			assert!(state.edges.iter().any(|edge| {
				edge.ancestor_id == ancestor && edge.descendant_id == copy && edge.is_link
			}));
		}
		assert_eq!(
			state
				.themes
				.values()
				.filter(|theme| theme.schema_id == copy && theme.kind == ThemeKind::LinkCopy)
				.count(),
			2
		);
		assert!(state.master_theme(copy).is_some());

		let admin_group = state
			.groups_of(copy)
			.into_iter()
			.find(|group| group.purpose == GroupPurpose::Admin)
			.expect("Admin group is missing.");

		assert!(state.memberships.contains(&(fx.admin, admin_group.id)));
	});

	let again = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(again.outcome, SyncOutcome::UpToDate);
	assert_eq!(again.mutations, 0);
}

// Template links "Locations"; the first sync creates its derived copy.
async fn linked_fixture() -> (Fixture, SchemaId, SchemaId) {
	let fx = fixture();
	let locations = fx.store.update(|state| {
		let locations = state.add_top_schema("Locations", true);

		state.add_field(locations, "Site", FieldType::ShortVarchar);
		state.link_schema(fx.template, locations);

		locations
	});
	let report = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::Applied);
	assert!(report.follow_ups.is_empty());

	let copy = copies_of(&fx.store, locations)[0];

	(fx, locations, copy)
}

#[tokio::test]
async fn linked_changes_get_a_follow_up_pass() {
	let (fx, locations, copy) = linked_fixture().await;
	let code = fx.store.update(|state| state.add_field(locations, "Code", FieldType::ShortVarchar));
	let report = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::Applied);
	assert_eq!(report.follow_ups.len(), 1);
	assert_eq!(report.follow_ups[0].schema_id, copy);
	assert_eq!(report.follow_ups[0].outcome, SyncOutcome::UpToDate);

	let code_copy = derived_field(&fx.store, code).expect("Derived field is missing.");

	assert_eq!(fx.store.read(|state| state.fields[&code_copy].schema_id), copy);
}

#[tokio::test]
async fn follow_up_pass_skips_linked_schemas_the_user_does_not_administer() {
	let (fx, locations, copy) = linked_fixture().await;

	fx.store.update(|state| {
		let groups = state.groups_of(copy).into_iter().map(|group| group.id).collect::<Vec<_>>();

		state.memberships.retain(|(user, group)| *user != fx.admin || !groups.contains(group));
		state.add_field(locations, "Code", FieldType::ShortVarchar);
	});

	let report = fx.service.sync_with_template(fx.admin, fx.derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::Applied);
	assert!(report.follow_ups.is_empty());
}

#[tokio::test]
async fn tag_tree_changes_follow_the_template() {
	let mut state = MemoryState::default();
	let admin = state.add_user(false);
	let template = state.add_top_schema("Specimens", true);
	let habitat = state.add_field(template, "Habitat", FieldType::Tags);
	let animal = state.add_tag(habitat, "Animal", None);
	let dog = state.add_tag(habitat, "Dog", Some(animal));
	let derived = state.derive_from(template, "Field specimens");

	state.add_to_group(admin, derived, GroupPurpose::Admin);

	let store = Arc::new(MemoryStore::new(state));
	let service = odr_testkit::memory_service(odr_testkit::test_config(), store.clone());
	let copy = derived_field(&store, habitat).expect("Derived field is missing.");
	let (animal_uuid, dog_uuid) =
		store.read(|state| (state.tags[&animal].tag_uuid, state.tags[&dog].tag_uuid));
	let cat_uuid = store.update(|state| {
		let cat = state.add_tag(habitat, "Cat", Some(animal));

		state.tags[&cat].tag_uuid
	});
	let report = service.sync_with_template(admin, derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::Applied);
	// The tag and its edge under "Animal".
	assert_eq!(report.mutations, 2);

	store.read(|state| {
		assert!(state.tags.values().any(|tag| tag.field_id == copy && tag.tag_uuid == cat_uuid));
		assert!(state.tag_edges.values().any(|edge| {
			edge.field_id == copy && edge.parent_uuid == animal_uuid && edge.child_uuid == cat_uuid
		}));
	});

	store.update(|state| {
		let derived_dog = state
			.tags
			.values()
			.find(|tag| tag.field_id == copy && tag.tag_uuid == dog_uuid)
			.map(|tag| tag.id)
			.expect("Derived dog tag is missing.");
		let record = state.add_record(derived, None, true);

		state.select_tag(record, derived_dog);
		state.tags.remove(&dog);
		state.tag_edges.retain(|_, edge| edge.field_id != habitat || edge.child_uuid != dog_uuid);
	});

	let report = service.sync_with_template(admin, derived).await.expect("Sync failed.");

	assert_eq!(report.outcome, SyncOutcome::Applied);

	store.read(|state| {
		assert!(!state.tags.values().any(|tag| tag.tag_uuid == dog_uuid));
		assert!(!state.tag_edges.values().any(|edge| edge.child_uuid == dog_uuid));
		assert!(state.tag_selections.is_empty());
		assert!(state.tags.values().any(|tag| tag.field_id == copy && tag.tag_uuid == cat_uuid));
	});

	let again = service.sync_with_template(admin, derived).await.expect("Sync failed.");

	assert_eq!(again.outcome, SyncOutcome::UpToDate);
}
