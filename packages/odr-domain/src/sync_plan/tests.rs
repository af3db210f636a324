use uuid::Uuid;

use crate::{
	Error,
	changelist::Changelist,
	diff::diff_families,
	hydrate::{HydratedPools, SidePool},
	model::{
		Field, FieldType, GroupLayout, GroupPurpose, LayoutGroup, LayoutSlot, PermissionGroup,
		RadioOption, Schema, SchemaEdge, SchemaId, SetupStep, SlotTarget, Theme, ThemeKind,
		ThemeLayout,
	},
	stack::{EntryRow, FieldRow, SchemaRow, StructureRows, stack_family},
	sync_plan::{EntityRef, PlannedSlot, SyncOp, plan_sync},
};

fn schema_row(id: SchemaId, master: Option<SchemaId>, parent: SchemaId, grandparent: SchemaId) -> SchemaRow {
	SchemaRow { id, master_template_id: master, parent_id: parent, grandparent_id: grandparent, metadata_for_id: None }
}

fn field_row(id: i64, schema_id: SchemaId, master: Option<i64>, field_type: FieldType) -> FieldRow {
	FieldRow { id, schema_id, field_uuid: Uuid::from_u128(id as u128), master_field_id: master, field_type }
}

fn edge(ancestor_id: SchemaId, descendant_id: SchemaId, is_link: bool) -> SchemaEdge {
	SchemaEdge { ancestor_id, descendant_id, is_link, multiple_allowed: true }
}

fn theme(schema_id: SchemaId, slots: Vec<Vec<SlotTarget>>) -> ThemeLayout {
	let theme_id = 1_000 + schema_id;
	let groups = slots
		.into_iter()
		.enumerate()
		.map(|(group_idx, targets)| {
			let group_id = theme_id * 10 + group_idx as i64;

			GroupLayout {
				group: LayoutGroup { id: group_id, theme_id, display_order: group_idx as i32 },
				slots: targets
					.into_iter()
					.enumerate()
					.map(|(slot_idx, target)| LayoutSlot {
						id: group_id * 10 + slot_idx as i64,
						group_id,
						display_order: slot_idx as i32,
						target,
					})
					.collect(),
			}
		})
		.collect();

	ThemeLayout {
		theme: Theme { id: theme_id, schema_id, parent_theme_id: None, source_theme_id: None, kind: ThemeKind::Master },
		groups,
	}
}

// Every row becomes a full entity on both sides; every schema gets an empty master theme.
fn pools(rows: &StructureRows) -> HydratedPools {
	let mut side = SidePool::default();

	for row in &rows.schemas {
		side.schemas.insert(row.id, Schema {
			id: row.id,
			unique_id: Uuid::from_u128(row.id as u128),
			master_template_id: row.master_template_id,
			template_uuid: None,
			parent_id: row.parent_id,
			grandparent_id: row.grandparent_id,
			metadata_for_id: row.metadata_for_id,
			is_master_type: row.master_template_id.is_none(),
			setup_step: SetupStep::Operational,
			is_public: true,
			name: format!("Schema {}", row.id),
			description: String::new(),
		});
	}
	for row in &rows.fields {
		side.fields.insert(row.id, Field {
			id: row.id,
			schema_id: row.schema_id,
			field_uuid: row.field_uuid,
			master_field_id: row.master_field_id,
			template_field_uuid: None,
			field_type: row.field_type,
			name: format!("Field {}", row.id),
			description: String::new(),
			required: false,
			searchable: true,
			is_public: true,
		});
	}
	for (idx, row) in rows.options.iter().enumerate() {
		side.insert_option(RadioOption {
			id: 500 + idx as i64,
			field_id: row.field_id,
			option_uuid: row.uuid,
			name: row.name.clone(),
			display_order: row.display_order,
		});
	}

	HydratedPools {
		template: side.clone(),
		derived: side,
		template_layouts: Default::default(),
		derived_themes: rows.schemas.iter().map(|row| (row.id, theme(row.id, vec![vec![]]))).collect(),
		derived_groups: vec![PermissionGroup { id: 1, schema_id: 2, purpose: GroupPurpose::Admin }],
	}
}

fn changelist(rows: &StructureRows) -> Changelist {
	let template = stack_family(rows, 1).expect("Template should stack.");
	let derived = stack_family(rows, 2).expect("Derived should stack.");

	diff_families(&template, &derived).expect("Diff should succeed.")
}

fn count(ops: &[SyncOp], pred: impl Fn(&SyncOp) -> bool) -> usize {
	ops.iter().filter(|op| pred(op)).count()
}

#[test]
fn synchronized_family_plans_nothing() {
	let rows = StructureRows {
		schemas: vec![schema_row(1, None, 1, 1), schema_row(2, Some(1), 2, 2)],
		fields: vec![field_row(10, 1, None, FieldType::ShortVarchar), field_row(20, 2, Some(10), FieldType::ShortVarchar)],
		..Default::default()
	};
	let plan = plan_sync(&changelist(&rows), &pools(&rows)).expect("Planning should succeed.");

	assert!(plan.is_empty());
	assert!(plan.touched.is_empty());
}

#[test]
fn option_changes_resolve_to_derived_ids() {
	let option = |field_id: i64, n: u128, name: &str| EntryRow {
		field_id,
		uuid: Uuid::from_u128(n),
		name: name.to_string(),
		display_order: n as i32,
	};
	let rows = StructureRows {
		schemas: vec![schema_row(1, None, 1, 1), schema_row(2, Some(1), 2, 2)],
		fields: vec![field_row(10, 1, None, FieldType::SingleRadio), field_row(20, 2, Some(10), FieldType::SingleRadio)],
		options: vec![option(10, 1, "New"), option(10, 2, "Renamed"), option(20, 2, "Old"), option(20, 3, "Gone")],
		..Default::default()
	};
	let pools = pools(&rows);
	let plan = plan_sync(&changelist(&rows), &pools).expect("Planning should succeed.");
	let gone = pools.derived.option(20, Uuid::from_u128(3)).expect("Option should be pooled.").id;

	assert!(plan.ops.contains(&SyncOp::CreateOption {
		field: EntityRef::Existing(20),
		option_uuid: Uuid::from_u128(1),
		name: "New".to_string(),
		display_order: 1,
	}));
	assert_eq!(count(&plan.ops, |op| matches!(op, SyncOp::UpdateOption { name, .. } if name == "Renamed")), 1);
	assert!(plan.ops.contains(&SyncOp::DeleteOption { option_id: gone }));
	assert_eq!(plan.touched.iter().copied().collect::<Vec<_>>(), vec![2]);
}

#[test]
fn pristine_derived_clones_template_groups() {
	let rows = StructureRows {
		schemas: vec![schema_row(1, None, 1, 1), schema_row(2, Some(1), 2, 2)],
		fields: vec![field_row(10, 1, None, FieldType::ShortVarchar), field_row(11, 1, None, FieldType::Boolean)],
		..Default::default()
	};
	let mut pools = pools(&rows);

	pools.template_layouts.insert(
		1,
		theme(1, vec![vec![SlotTarget::Field { field_id: 10 }], vec![SlotTarget::Field { field_id: 11 }]]),
	);

	let changelist = changelist(&rows);

	assert!(changelist.root.copy_theme_structure);

	let plan = plan_sync(&changelist, &pools).expect("Planning should succeed.");
	let group_orders = plan
		.ops
		.iter()
		.filter_map(|op| match op {
			SyncOp::CreateLayoutGroup { theme, display_order, .. } => Some((*theme, *display_order)),
			_ => None,
		})
		.collect::<Vec<_>>();

	assert_eq!(group_orders, vec![(EntityRef::Existing(1_002), 1), (EntityRef::Existing(1_002), 2)]);
	assert_eq!(count(&plan.ops, |op| matches!(op, SyncOp::CreateField { .. })), 2);
	assert_eq!(count(&plan.ops, |op| matches!(op, SyncOp::GrantFieldPermissions { .. })), 2);
}

#[test]
fn customized_derived_gets_one_trailing_group() {
	let rows = StructureRows {
		schemas: vec![schema_row(1, None, 1, 1), schema_row(2, Some(1), 2, 2)],
		fields: vec![
			field_row(10, 1, None, FieldType::ShortVarchar),
			field_row(11, 1, None, FieldType::Boolean),
			field_row(12, 1, None, FieldType::IntegerValue),
			field_row(20, 2, Some(10), FieldType::ShortVarchar),
		],
		..Default::default()
	};
	let mut pools = pools(&rows);

	pools.template_layouts.insert(1, theme(1, vec![vec![SlotTarget::Field { field_id: 10 }]]));

	let plan = plan_sync(&changelist(&rows), &pools).expect("Planning should succeed.");
	let groups = count(&plan.ops, |op| matches!(op, SyncOp::CreateLayoutGroup { display_order: 1, .. }));
	let slots = plan
		.ops
		.iter()
		.filter_map(|op| match op {
			SyncOp::CreateLayoutSlot { display_order, target: PlannedSlot::Field { .. }, .. } => Some(*display_order),
			_ => None,
		})
		.collect::<Vec<_>>();

	assert_eq!(groups, 1);
	assert_eq!(slots, vec![0, 1]);
}

#[test]
fn repeated_link_target_is_synced_once() {
	// Template 1 contains children 3 and 4, both linking top-level template 5.
	let rows = StructureRows {
		schemas: vec![
			schema_row(1, None, 1, 1),
			schema_row(2, Some(1), 2, 2),
			schema_row(3, None, 1, 1),
			schema_row(4, None, 1, 1),
			schema_row(5, None, 5, 5),
		],
		edges: vec![edge(1, 3, false), edge(1, 4, false), edge(3, 5, true), edge(4, 5, true)],
		fields: vec![field_row(50, 5, None, FieldType::ShortVarchar)],
		..Default::default()
	};
	let plan = plan_sync(&changelist(&rows), &pools(&rows)).expect("Planning should succeed.");
	let created_from = |template: SchemaId| {
		count(&plan.ops, |op| matches!(op, SyncOp::CreateSchema { template_id, .. } if *template_id == template))
	};

	assert_eq!(created_from(3), 1);
	assert_eq!(created_from(4), 1);
	assert_eq!(created_from(5), 1);
	assert_eq!(count(&plan.ops, |op| matches!(op, SyncOp::CreateField { master_field_id: 50, .. })), 1);
	assert_eq!(count(&plan.ops, |op| matches!(op, SyncOp::CreateSchemaEdge { is_link: true, .. })), 2);
	assert_eq!(
		count(&plan.ops, |op| matches!(op, SyncOp::CreateTheme { kind: ThemeKind::LinkCopy, .. })),
		2
	);
	assert_eq!(count(&plan.ops, |op| matches!(op, SyncOp::CreateDefaultGroups { .. })), 1);
	assert_eq!(count(&plan.ops, |op| matches!(op, SyncOp::MarkOperational { .. })), 3);
	assert_eq!(plan.created_schemas.len(), 3);
}

#[test]
fn missing_pool_entity_aborts_planning() {
	let rows = StructureRows {
		schemas: vec![schema_row(1, None, 1, 1), schema_row(2, Some(1), 2, 2)],
		fields: vec![field_row(10, 1, None, FieldType::ShortVarchar)],
		..Default::default()
	};
	let mut pools = pools(&rows);

	pools.template.fields.clear();

	let err = plan_sync(&changelist(&rows), &pools).expect_err("Expected failure.");

	assert!(matches!(err, Error::Structural { .. }));
}
