use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub sync: TemplateSync,
	pub search: Search,
	pub cache: Cache,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSync {
	/// Seconds a template-sync lock stays valid before another writer may steal it.
	pub lock_ttl_seconds: u64,
	/// Upper bound on the blocking re-acquire performed by a writer that lost the race.
	pub lock_wait_seconds: u64,
	/// Run one downstream sync pass on every linked schema the primary pass touched.
	#[serde(default = "default_true")]
	pub follow_linked: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Search {
	#[serde(default = "default_true")]
	pub cache_enabled: bool,
	pub max_query_chars: u32,
	pub max_terms: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cache {
	pub backend: CacheBackend,
}

/// Where search results are cached. Sync locks always live in Postgres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
	Postgres,
	Memory,
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_true() -> bool {
	true
}
