//! In-process cache and lock collaborators.

use std::{
	collections::HashMap,
	sync::Mutex,
	time::{Duration, Instant},
};

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{BoxFuture, CacheStore, LockService, LockToken, Result};

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
	entries: Mutex<HashMap<String, Value>>,
}
impl MemoryCacheStore {
	pub fn len(&self) -> usize {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
impl CacheStore for MemoryCacheStore {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
		let value = self.entries.lock().unwrap_or_else(|err| err.into_inner()).get(key).cloned();

		Box::pin(async move { Ok(value) })
	}

	fn put<'a>(&'a self, key: &'a str, value: &'a Value) -> BoxFuture<'a, Result<()>> {
		self.entries
			.lock()
			.unwrap_or_else(|err| err.into_inner())
			.insert(key.to_string(), value.clone());

		Box::pin(async move { Ok(()) })
	}

	fn get_entry<'a>(
		&'a self,
		key: &'a str,
		entry: &'a str,
	) -> BoxFuture<'a, Result<Option<Value>>> {
		let value = self
			.entries
			.lock()
			.unwrap_or_else(|err| err.into_inner())
			.get(key)
			.and_then(|map| map.get(entry))
			.cloned();

		Box::pin(async move { Ok(value) })
	}

	fn put_entry<'a>(
		&'a self,
		key: &'a str,
		entry: &'a str,
		value: &'a Value,
	) -> BoxFuture<'a, Result<()>> {
		let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
		let slot = entries.entry(key.to_string()).or_insert_with(|| Value::Object(Map::new()));

		if !slot.is_object() {
			*slot = Value::Object(Map::new());
		}
		if let Value::Object(map) = slot {
			map.insert(entry.to_string(), value.clone());
		}

		drop(entries);

		Box::pin(async move { Ok(()) })
	}

	fn delete_keys<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<u64>> {
		let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
		let deleted = keys.iter().filter(|key| entries.remove(key.as_str()).is_some()).count();

		drop(entries);

		Box::pin(async move { Ok(deleted as u64) })
	}
}

#[derive(Debug, Default)]
pub struct MemoryLockService {
	held: Mutex<HashMap<String, (Uuid, Instant)>>,
}
impl MemoryLockService {
	pub fn is_held(&self, key: &str) -> bool {
		self.held
			.lock()
			.unwrap_or_else(|err| err.into_inner())
			.get(key)
			.is_some_and(|(_, expires_at)| *expires_at > Instant::now())
	}
}
impl LockService for MemoryLockService {
	fn acquire<'a>(
		&'a self,
		key: &'a str,
		ttl: Duration,
	) -> BoxFuture<'a, Result<Option<LockToken>>> {
		let now = Instant::now();
		let mut held = self.held.lock().unwrap_or_else(|err| err.into_inner());
		let token = match held.get(key) {
			Some((_, expires_at)) if *expires_at > now => None,
			_ => {
				let holder = Uuid::new_v4();

				held.insert(key.to_string(), (holder, now + ttl));

				Some(LockToken { key: key.to_string(), holder })
			},
		};

		drop(held);

		Box::pin(async move { Ok(token) })
	}

	fn release<'a>(&'a self, token: &'a LockToken) -> BoxFuture<'a, Result<bool>> {
		let mut held = self.held.lock().unwrap_or_else(|err| err.into_inner());
		let released = match held.get(&token.key) {
			Some((holder, _)) if *holder == token.holder => {
				held.remove(&token.key);

				true
			},
			_ => false,
		};

		drop(held);

		Box::pin(async move { Ok(released) })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn hashed_entries_share_one_key() {
		let cache = MemoryCacheStore::default();

		cache.put_entry("k", "a", &Value::from(1)).await.expect("Put failed.");
		cache.put_entry("k", "b", &Value::from(2)).await.expect("Put failed.");

		assert_eq!(cache.len(), 1);
		assert_eq!(cache.get_entry("k", "b").await.expect("Get failed."), Some(Value::from(2)));
		assert_eq!(cache.delete_keys(&["k".to_string(), "x".to_string()]).await.ok(), Some(1));
		assert!(cache.is_empty());
	}

	#[tokio::test]
	async fn lock_is_exclusive_until_released_or_expired() {
		let locks = MemoryLockService::default();
		let ttl = Duration::from_secs(30);
		let first = locks.acquire("sync_1", ttl).await.expect("Acquire failed.");
		let token = first.expect("First acquire should win.");

		assert!(locks.acquire("sync_1", ttl).await.expect("Acquire failed.").is_none());

		let stale = LockToken { key: "sync_1".to_string(), holder: Uuid::new_v4() };

		assert!(!locks.release(&stale).await.expect("Release failed."));
		assert!(locks.release(&token).await.expect("Release failed."));
		assert!(locks.acquire("sync_1", Duration::ZERO).await.expect("Acquire failed.").is_some());
		// A zero TTL expires immediately, so the key is free again.
		assert!(locks.acquire("sync_1", ttl).await.expect("Acquire failed.").is_some());
	}
}
