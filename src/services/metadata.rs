use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

/// Filename → override value, as read from an optional metadata file.
pub type Overrides = HashMap<String, String>;

/// Load a flat JSON object of string overrides.
///
/// A missing path, unreadable file or malformed document yields an empty
/// mapping. Non-string values are skipped.
pub fn load_overrides(path: Option<&Path>) -> Overrides {
    let Some(path) = path else {
        return Overrides::new();
    };
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Metadata file not found, ignoring");
        return Overrides::new();
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Metadata file unreadable, ignoring");
            return Overrides::new();
        }
    };

    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some((key, s)),
                _ => None,
            })
            .collect(),
        Ok(_) => {
            tracing::warn!(path = %path.display(), "Metadata file is not a JSON object, ignoring");
            Overrides::new()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Metadata file is malformed, ignoring");
            Overrides::new()
        }
    }
}
