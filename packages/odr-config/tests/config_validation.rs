use toml::Value;

use odr_config::{CacheBackend, Error};

const SAMPLE_CONFIG_TEMPLATE_TOML: &str = include_str!("fixtures/sample_config.template.toml");

fn sample_toml_with(section: &str, key: &str, value: Value) -> String {
	let mut root: Value =
		toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.");
	let mut table = root.as_table_mut().expect("Template config must be a table.");

	for part in section.split('.') {
		table = table
			.get_mut(part)
			.and_then(Value::as_table_mut)
			.unwrap_or_else(|| panic!("Template config must include [{section}]."));
	}

	table.insert(key.to_string(), value);

	toml::to_string(&root).expect("Failed to render template config.")
}

fn validation_message(raw: &str) -> String {
	match odr_config::parse(raw) {
		Err(Error::Validation { message }) => message,
		other => panic!("Expected validation error, got {other:?}."),
	}
}

#[test]
fn sample_config_is_valid() {
	let cfg = odr_config::parse(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Sample config must parse.");

	assert_eq!(cfg.cache.backend, CacheBackend::Postgres);
	assert_eq!(cfg.sync.lock_wait_seconds, 15);
	assert!(cfg.sync.follow_linked);
	assert!(cfg.search.cache_enabled);
}

#[test]
fn empty_log_level_normalizes_to_info() {
	let raw = sample_toml_with("service", "log_level", Value::String("  ".to_string()));
	let cfg = odr_config::parse(&raw).expect("Config must parse.");

	assert_eq!(cfg.service.log_level, "info");
}

#[test]
fn zero_lock_ttl_is_rejected() {
	let raw = sample_toml_with("sync", "lock_ttl_seconds", Value::Integer(0));

	assert_eq!(validation_message(&raw), "sync.lock_ttl_seconds must be greater than zero.");
}

#[test]
fn zero_lock_wait_is_rejected() {
	let raw = sample_toml_with("sync", "lock_wait_seconds", Value::Integer(0));

	assert_eq!(validation_message(&raw), "sync.lock_wait_seconds must be greater than zero.");
}

#[test]
fn zero_max_terms_is_rejected() {
	let raw = sample_toml_with("search", "max_terms", Value::Integer(0));

	assert_eq!(validation_message(&raw), "search.max_terms must be greater than zero.");
}

#[test]
fn empty_dsn_is_rejected() {
	let raw = sample_toml_with("storage.postgres", "dsn", Value::String(String::new()));

	assert_eq!(validation_message(&raw), "storage.postgres.dsn must be non-empty.");
}

#[test]
fn memory_cache_backend_parses() {
	let raw = sample_toml_with("cache", "backend", Value::String("memory".to_string()));
	let cfg = odr_config::parse(&raw).expect("Config must parse.");

	assert_eq!(cfg.cache.backend, CacheBackend::Memory);
}

#[test]
fn unknown_cache_backend_fails_to_parse() {
	let raw = sample_toml_with("cache", "backend", Value::String("redis".to_string()));

	assert!(matches!(odr_config::parse(&raw), Err(Error::ParseConfig { .. })));
}
