use std::{collections::BTreeSet, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Error, LockToken, OdrService, Result};
use odr_domain::{
	changelist::{Changelist, FieldTypeChange},
	diff, hydrate,
	model::{SchemaId, UserId},
	permissions::PermissionOracle,
	stack, sync_plan,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
	/// Nothing to do; the derived instance already matches its template.
	UpToDate,
	Applied,
	/// Another writer held the lock; this caller waited for it and changed nothing.
	ConcurrentSync,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncReport {
	pub schema_id: SchemaId,
	pub outcome: SyncOutcome,
	pub mutations: usize,
	/// Existing derived schemas that received changes.
	pub touched: Vec<SchemaId>,
	/// Schemas created by this pass.
	pub created: Vec<SchemaId>,
	/// Field type divergences the sync reports but does not repair.
	pub field_type_changes: Vec<FieldTypeChange>,
	/// Downstream passes over linked schemas this pass changed.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub follow_ups: Vec<SyncReport>,
}
impl SyncReport {
	fn unchanged(schema_id: SchemaId, outcome: SyncOutcome) -> Self {
		Self {
			schema_id,
			outcome,
			mutations: 0,
			touched: Vec::new(),
			created: Vec::new(),
			field_type_changes: Vec::new(),
			follow_ups: Vec::new(),
		}
	}
}

fn lock_key(schema_id: SchemaId) -> String {
	format!("template_sync_{schema_id}")
}

impl OdrService {
	/// Diffs a derived top-level schema against the current state of its template.
	pub async fn diff_with_template(&self, derived_id: SchemaId) -> Result<Changelist> {
		let derived = self.store.load_schema(derived_id).await?;
		let Some(template_id) = derived.master_template_id else {
			return Err(Error::InvalidRequest {
				message: format!("Schema {derived_id} was not created from a template."),
			});
		};
		let template_rows = self.store.load_structure_rows(template_id).await?;
		let derived_rows = self.store.load_structure_rows(derived_id).await?;
		let template = stack::stack_family(&template_rows, template_id)?;
		let derived = stack::stack_family(&derived_rows, derived_id)?;

		Ok(diff::diff_families(&template, &derived)?)
	}

	/// Whether `user_id` may sync the schema and the sync would change something.
	pub async fn can_sync_with_template(
		&self,
		user_id: Option<UserId>,
		derived_id: SchemaId,
	) -> Result<bool> {
		let Some(user_id) = user_id else {
			return Ok(false);
		};
		let permissions = self.store.load_permissions(Some(user_id)).await?;

		if !permissions.is_schema_admin(derived_id) {
			return Ok(false);
		}

		Ok(!self.diff_with_template(derived_id).await?.is_empty())
	}

	/// Brings a derived top-level schema in line with its template.
	pub async fn sync_with_template(
		&self,
		user_id: UserId,
		derived_id: SchemaId,
	) -> Result<SyncReport> {
		let permissions = self.store.load_permissions(Some(user_id)).await?;

		if !permissions.is_schema_admin(derived_id) {
			return Err(Error::PermissionDenied {
				message: format!("User {user_id} does not administer schema {derived_id}."),
			});
		}

		let (mut report, linked_targets) = self.sync_once(user_id, derived_id).await?;

		if self.cfg.sync.follow_linked && report.outcome == SyncOutcome::Applied {
			for target in linked_targets {
				if !permissions.is_schema_admin(target) {
					tracing::warn!(
						schema_id = derived_id,
						linked_schema_id = target,
						user_id,
						"Skipping linked schema sync; user does not administer it."
					);

					continue;
				}

				match self.sync_once(user_id, target).await {
					Ok((follow_up, _)) => report.follow_ups.push(follow_up),
					Err(err) => tracing::warn!(
						schema_id = derived_id,
						linked_schema_id = target,
						error = %err,
						"Linked schema sync failed."
					),
				}
			}
		}

		Ok(report)
	}

	async fn sync_once(
		&self,
		user_id: UserId,
		derived_id: SchemaId,
	) -> Result<(SyncReport, BTreeSet<SchemaId>)> {
		let key = lock_key(derived_id);
		let ttl = Duration::from_secs(self.cfg.sync.lock_ttl_seconds);
		let Some(token) = self.locks.acquire(&key, ttl).await? else {
			tracing::warn!(schema_id = derived_id, "Template sync already running; waiting for it.");

			self.wait_for_running_sync(&key, ttl).await;

			return Ok((SyncReport::unchanged(derived_id, SyncOutcome::ConcurrentSync), BTreeSet::new()));
		};
		let result = self.sync_locked(user_id, derived_id).await;

		self.release_sync_lock(&token).await;

		result
	}

	async fn wait_for_running_sync(&self, key: &str, ttl: Duration) {
		let wait = Duration::from_secs(self.cfg.sync.lock_wait_seconds);

		match self.locks.acquire_blocking(key, ttl, wait).await {
			Ok(Some(token)) => self.release_sync_lock(&token).await,
			Ok(None) => tracing::warn!(key, "Gave up waiting for template sync lock."),
			Err(err) => tracing::warn!(key, error = %err, "Failed to wait for template sync lock."),
		}
	}

	async fn release_sync_lock(&self, token: &LockToken) {
		match self.locks.release(token).await {
			Ok(true) => {},
			Ok(false) => tracing::warn!(key = %token.key, "Template sync lock expired before release."),
			Err(err) =>
				tracing::warn!(key = %token.key, error = %err, "Failed to release template sync lock."),
		}
	}

	async fn sync_locked(
		&self,
		user_id: UserId,
		derived_id: SchemaId,
	) -> Result<(SyncReport, BTreeSet<SchemaId>)> {
		let changelist = self.diff_with_template(derived_id).await?;

		if changelist.is_empty() {
			tracing::info!(schema_id = derived_id, "Schema already matches its template.");

			let mut report = SyncReport::unchanged(derived_id, SyncOutcome::UpToDate);

			report.field_type_changes = changelist.field_type_changes;

			return Ok((report, BTreeSet::new()));
		}

		let request = hydrate::plan_hydration(&changelist);
		let pools = self.store.hydrate(&request).await?;
		let plan = sync_plan::plan_sync(&changelist, &pools)?;
		let applied = self.store.apply_plan(&plan, user_id).await?;
		let created = plan
			.created_schemas
			.iter()
			.filter_map(|id| applied.ids.get(id).copied())
			.collect::<Vec<_>>();
		let mut stale = plan.touched.clone();

		stale.extend(created.iter().copied());
		stale.insert(derived_id);

		self.clear_schema_caches(&stale).await;

		tracing::info!(
			schema_id = derived_id,
			entries = changelist.entry_count(),
			mutations = applied.mutations,
			created = created.len(),
			"Template sync applied."
		);

		let report = SyncReport {
			schema_id: derived_id,
			outcome: SyncOutcome::Applied,
			mutations: applied.mutations,
			touched: plan.touched.iter().copied().collect(),
			created,
			field_type_changes: changelist.field_type_changes,
			follow_ups: Vec::new(),
		};

		Ok((report, plan.linked_targets))
	}
}
