use crate::errors::RunsiftError;
use crate::runtime::FileSystem;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;

pub type EnvMap = BTreeMap<String, String>;

pub const TOKEN_VAR: &str = "GITHUB_TOKEN";
pub const OWNER_VAR: &str = "OWNER";
pub const REPO_VAR: &str = "REPO";
pub const LOG_DIR_VAR: &str = "LOG_DIR";

pub fn env_to_map(env: &[(OsString, OsString)]) -> EnvMap {
    env.iter()
        .filter_map(|(key, value)| {
            Some((key.to_str()?.to_string(), value.to_str()?.to_string()))
        })
        .collect()
}

/// Parses `KEY=VALUE` lines. Blank lines and `#` comments are skipped and a
/// single pair of matching surrounding quotes is removed from the value.
pub fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Adds the `.env` file's values to `env`; variables already present win.
/// A missing file is not an error.
pub fn merge_env_file(
    env: &mut EnvMap,
    path: &Path,
    fs: &dyn FileSystem,
) -> Result<usize, RunsiftError> {
    if !fs.exists(path) {
        return Ok(0);
    }
    let contents = fs.read_to_string(path)?;
    let mut added = 0;
    for (key, value) in parse_env_file(&contents) {
        if !env.contains_key(&key) {
            env.insert(key, value);
            added += 1;
        }
    }
    Ok(added)
}

/// Non-empty value of `key`, if any.
pub fn lookup<'a>(env: &'a EnvMap, key: &str) -> Option<&'a str> {
    env.get(key)
        .map(String::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
