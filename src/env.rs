//! # Environment access.
//!
//! [`EnvSource`] is the seam through which options and services read the
//! environment; [`ProcessEnv`] reads the real process environment and a
//! `HashMap<String, String>` can be used wherever a fixed environment is wanted.
//!
//! [`normalize_env_key`] turns arbitrary text (service names, namespaces,
//! prefixes) into a POSIX-safe variable name.

use std::collections::HashMap;
use std::fmt;

use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Read-only view of an environment.
pub trait EnvSource: fmt::Debug + Send + Sync + 'static {
    /// Returns the value of `key`, or `None` when it is not set.
    fn var(&self, key: &str) -> Option<String>;

    /// Every variable that is set, in no particular order.
    fn vars(&self) -> Vec<(String, String)>;
}

/// The process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn vars(&self) -> Vec<(String, String)> {
        // Non-UTF-8 entries are skipped rather than panicking like `std::env::vars`.
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }

    fn vars(&self) -> Vec<(String, String)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Normalizes `name` for use as an environment variable key.
///
/// - accented characters are folded to their base letter (`É` → `E`);
/// - letters are uppercased;
/// - every run of other characters becomes a single `_`;
/// - leading and trailing underscores are trimmed.
///
/// The result only contains `[A-Z0-9_]`.
///
/// # Example
/// ```
/// use svcvisor::normalize_env_key;
///
/// assert_eq!(normalize_env_key("my-Énv.key"), "MY_ENV_KEY");
/// assert_eq!(normalize_env_key("--"), "");
/// ```
pub fn normalize_env_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());

    for c in name.nfd() {
        if is_combining_mark(c) {
            continue;
        }
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    out.trim_matches('_').to_string()
}

/// Joins a normalized prefix and a key: `PREFIX_KEY`, or just `KEY` without a prefix.
pub(crate) fn prefixed_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        normalize_env_key(key)
    } else {
        normalize_env_key(&format!("{prefix}_{key}"))
    }
}
