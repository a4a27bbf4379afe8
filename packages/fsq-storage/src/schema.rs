pub fn render_schema() -> String {
	let init = include_str!("../../../sql/init.sql");

	expand_includes(init)
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_search_queue_items.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_search_queue_items.sql")),
				"tables/002_escalation_records.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_escalation_records.sql")),
				"tables/003_circuit_breaker_state.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_circuit_breaker_state.sql")),
				"tables/004_quota_windows.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_quota_windows.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
