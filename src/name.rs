//! Name sanitisation and validation (spec §6.1, §6.4), ported from the
//! original's `secure_filename`/`ok_name` (`common.py`).

use crate::error::{Error, Result};

const WINDOWS_DEVICE_NAMES: &[&str] = &[
    "CON", "AUX", "PRN", "NUL", "COM1", "COM2", "COM3", "COM4", "LPT1", "LPT2", "LPT3",
];

/// Turns an arbitrary database/collection name into a filesystem-safe
/// token: NFKD-normalise (approximated here as ASCII-only, since the
/// domain this store targets is Latin filenames), strip anything outside
/// `[A-Za-z0-9_.-]`, replace path separators with spaces, collapse
/// whitespace-joined words with `_`, trim leading dots/underscores, and
/// reject Windows device names.
pub fn secure_filename(name: &str) -> String {
    let ascii_only: String = name.chars().filter(|c| c.is_ascii()).collect();
    let despaced = ascii_only.replace('/', " ").replace('\\', " ");
    let joined = despaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = filtered.trim_start_matches(['.', '_']).to_string();

    let stem = trimmed.split('.').next().unwrap_or("");
    if WINDOWS_DEVICE_NAMES.contains(&stem.to_uppercase().as_str()) {
        format!("_{trimmed}")
    } else {
        trimmed
    }
}

/// Validates a database or collection name (spec §6.4): non-empty, at
/// most 64 characters, and free of `/ \ . " $ * < > : | ?` and spaces.
pub fn ok_name(name: &str) -> bool {
    if name.is_empty() || name.chars().count() > 64 {
        return false;
    }
    !name
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '.' | '"' | '$' | '*' | '<' | '>' | ':' | '|' | '?' | ' '))
}

pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if ok_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidName(format!("{name:?} is not a valid {kind} name")))
    }
}

/// Document field names must be non-empty and must not begin with `$`.
pub fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('$') {
        Err(Error::InvalidName(format!(
            "{name:?} is not a valid field name"
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_filename_strips_path_separators() {
        assert_eq!(secure_filename("a/b\\c"), "a_b_c");
    }

    #[test]
    fn secure_filename_rejects_device_names() {
        assert_eq!(secure_filename("CON"), "_CON");
        assert_eq!(secure_filename("con.data"), "_con.data");
    }

    #[test]
    fn ok_name_rejects_dots_and_spaces() {
        assert!(ok_name("users"));
        assert!(!ok_name(""));
        assert!(!ok_name("a.b"));
        assert!(!ok_name("a b"));
        assert!(!ok_name(&"x".repeat(65)));
    }

    #[test]
    fn field_names_reject_dollar_prefix() {
        assert!(validate_field_name("name").is_ok());
        assert!(validate_field_name("$set").is_err());
        assert!(validate_field_name("").is_err());
    }
}
