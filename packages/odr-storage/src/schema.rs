pub fn render_schema() -> String {
	expand_includes(include_str!("../../../sql/init.sql"))
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_schemas.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_schemas.sql")),
				"tables/002_schema_edges.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_schema_edges.sql")),
				"tables/003_fields.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_fields.sql")),
				"tables/004_radio_options.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_radio_options.sql")),
				"tables/005_tags.sql" => out.push_str(include_str!("../../../sql/tables/005_tags.sql")),
				"tables/006_tag_edges.sql" =>
					out.push_str(include_str!("../../../sql/tables/006_tag_edges.sql")),
				"tables/007_themes.sql" =>
					out.push_str(include_str!("../../../sql/tables/007_themes.sql")),
				"tables/008_layout_groups.sql" =>
					out.push_str(include_str!("../../../sql/tables/008_layout_groups.sql")),
				"tables/009_layout_slots.sql" =>
					out.push_str(include_str!("../../../sql/tables/009_layout_slots.sql")),
				"tables/010_permission_groups.sql" =>
					out.push_str(include_str!("../../../sql/tables/010_permission_groups.sql")),
				"tables/011_group_schema_permissions.sql" => out
					.push_str(include_str!("../../../sql/tables/011_group_schema_permissions.sql")),
				"tables/012_group_field_permissions.sql" => out
					.push_str(include_str!("../../../sql/tables/012_group_field_permissions.sql")),
				"tables/013_users.sql" =>
					out.push_str(include_str!("../../../sql/tables/013_users.sql")),
				"tables/014_user_groups.sql" =>
					out.push_str(include_str!("../../../sql/tables/014_user_groups.sql")),
				"tables/015_records.sql" =>
					out.push_str(include_str!("../../../sql/tables/015_records.sql")),
				"tables/016_linked_records.sql" =>
					out.push_str(include_str!("../../../sql/tables/016_linked_records.sql")),
				"tables/017_value_tables.sql" =>
					out.push_str(include_str!("../../../sql/tables/017_value_tables.sql")),
				"tables/018_radio_selections.sql" =>
					out.push_str(include_str!("../../../sql/tables/018_radio_selections.sql")),
				"tables/019_tag_selections.sql" =>
					out.push_str(include_str!("../../../sql/tables/019_tag_selections.sql")),
				"tables/020_file_entries.sql" =>
					out.push_str(include_str!("../../../sql/tables/020_file_entries.sql")),
				"tables/021_search_cache.sql" =>
					out.push_str(include_str!("../../../sql/tables/021_search_cache.sql")),
				"tables/022_sync_locks.sql" =>
					out.push_str(include_str!("../../../sql/tables/022_sync_locks.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
