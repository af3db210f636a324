use std::collections::BTreeMap;

use crate::{
	model::{FieldId, SchemaId, SlotTarget, ThemeLayout},
	sync_plan::{EntityRef, NewId, PlannedSlot, SyncOp},
};

/// Template to derived identity map for one schema node, in template order.
#[derive(Debug, Clone, Default)]
pub struct IdRemap {
	fields: BTreeMap<FieldId, EntityRef>,
	schemas: BTreeMap<SchemaId, (EntityRef, EntityRef)>,
	order: Vec<PlannedSlot>,
}
impl IdRemap {
	pub fn insert_field(&mut self, template_field_id: FieldId, field: EntityRef) {
		self.fields.insert(template_field_id, field);
		self.order.push(PlannedSlot::Field { field });
	}

	pub fn insert_schema(&mut self, template_schema_id: SchemaId, schema: EntityRef, theme: EntityRef) {
		self.schemas.insert(template_schema_id, (schema, theme));
		self.order.push(PlannedSlot::Schema { schema, child_theme: theme });
	}

	pub fn is_empty(&self) -> bool {
		self.order.is_empty()
	}

	/// Derived slot for a template slot, if its target was created in this pass.
	pub fn map_slot(&self, target: &SlotTarget) -> Option<PlannedSlot> {
		match target {
			SlotTarget::Field { field_id } =>
				self.fields.get(field_id).map(|field| PlannedSlot::Field { field: *field }),
			SlotTarget::Schema { schema_id, .. } => self
				.schemas
				.get(schema_id)
				.map(|(schema, theme)| PlannedSlot::Schema { schema: *schema, child_theme: *theme }),
		}
	}
}

/// Recreates the template's groups on the derived theme, keeping only remapped slots.
///
/// Anything the template layout does not place lands in one trailing group.
pub(super) fn clone_template_groups(
	source: &ThemeLayout,
	remap: &IdRemap,
	theme: EntityRef,
	first_order: i32,
	alloc: &mut impl FnMut() -> NewId,
) -> Vec<SyncOp> {
	let mut ops = Vec::new();
	let mut placed = Vec::new();
	let mut order = first_order;

	for group in &source.groups {
		let slots = group
			.slots
			.iter()
			.filter_map(|slot| remap.map_slot(&slot.target).map(|mapped| (slot.display_order, mapped)))
			.collect::<Vec<_>>();

		if slots.is_empty() {
			continue;
		}

		placed.extend(slots.iter().map(|(_, mapped)| *mapped));
		push_group(&mut ops, theme, order, slots, alloc);

		order += 1;
	}

	let leftovers = remap
		.order
		.iter()
		.filter(|slot| !placed.contains(slot))
		.enumerate()
		.map(|(idx, slot)| (idx as i32, *slot))
		.collect::<Vec<_>>();

	if !leftovers.is_empty() {
		push_group(&mut ops, theme, order, leftovers, alloc);
	}

	ops
}

/// Puts every remapped slot into one new group after the existing ones.
pub(super) fn append_group(
	remap: &IdRemap,
	theme: EntityRef,
	order: i32,
	alloc: &mut impl FnMut() -> NewId,
) -> Vec<SyncOp> {
	let mut ops = Vec::new();
	let slots =
		remap.order.iter().enumerate().map(|(idx, slot)| (idx as i32, *slot)).collect::<Vec<_>>();

	if !slots.is_empty() {
		push_group(&mut ops, theme, order, slots, alloc);
	}

	ops
}

fn push_group(
	ops: &mut Vec<SyncOp>,
	theme: EntityRef,
	display_order: i32,
	slots: Vec<(i32, PlannedSlot)>,
	alloc: &mut impl FnMut() -> NewId,
) {
	let id = alloc();

	ops.push(SyncOp::CreateLayoutGroup { id, theme, display_order });

	for (slot_order, target) in slots {
		ops.push(SyncOp::CreateLayoutSlot {
			group: EntityRef::New(id),
			display_order: slot_order,
			target,
		});
	}
}
