//! # Properties File Parsing
//!
//! Minimal reader for `key=value` properties files.
//!
//! Supported syntax:
//! - `key=value` and `key: value`, whitespace around the separator trimmed
//! - `#` and `!` comment lines, blank lines ignored
//! - a trailing backslash continues the value on the next line
//! - later duplicates win

use std::collections::BTreeMap;

/// Parse properties text into an ordered key/value map.
pub fn parse_properties(contents: &str) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    let mut lines = contents.lines();

    while let Some(line) = lines.next() {
        let mut logical = line.trim_start().to_string();
        if logical.is_empty() || logical.starts_with('#') || logical.starts_with('!') {
            continue;
        }

        while logical.ends_with('\\') {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start()),
                None => break
            }
        }

        let (key, value) = split_entry(&logical);
        if !key.is_empty() {
            properties.insert(key.to_string(), value.to_string());
        }
    }

    properties
}

fn split_entry(line: &str) -> (&str, &str) {
    match line.find(['=', ':']) {
        Some(idx) => (line[..idx].trim(), line[idx + 1..].trim()),
        None => (line.trim(), "")
    }
}
