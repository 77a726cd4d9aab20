// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub const CONFIG_PATTERN: &str = "config:*";
pub const FLAGS_PATTERN: &str = "flags:*";

pub fn config_change_channel(service_name: &str, environment: &str) -> String {
	format!("config:change:{service_name}:{environment}")
}

pub fn config_reload_channel(service_name: &str, environment: &str) -> String {
	format!("config:reload:{service_name}:{environment}")
}

pub fn flag_change_channel(flag_key: &str) -> String {
	format!("flags:change:{flag_key}")
}

/// Glob match with `*` (any run of characters) and `?` (one character).
pub fn matches_pattern(pattern: &str, channel: &str) -> bool {
	let pattern: Vec<char> = pattern.chars().collect();
	let channel: Vec<char> = channel.chars().collect();

	let (mut p, mut c) = (0, 0);
	let mut star: Option<(usize, usize)> = None;

	while c < channel.len() {
		if p < pattern.len() && pattern[p] == '*' {
			star = Some((p, c));
			p += 1;
		} else if p < pattern.len() && (pattern[p] == '?' || pattern[p] == channel[c]) {
			p += 1;
			c += 1;
		} else if let Some((star_p, star_c)) = star {
			p = star_p + 1;
			c = star_c + 1;
			star = Some((star_p, star_c + 1));
		} else {
			return false;
		}
	}

	pattern[p..].iter().all(|&ch| ch == '*')
}
