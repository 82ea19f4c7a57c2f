//! `.env` file loading for controller settings.
//!
//! Values from the file are a fallback layer: a variable set in the process
//! environment always wins over the same key in `.env`.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// Load variables from a single .env file.
///
/// Uses dotenvy for parsing (KEY=VALUE, `#` comments, single and double
/// quotes). Variable names are validated after loading.
pub fn load_env_file<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(Error::Config(format!("{} not found", path.display())));
    }

    let bad_file = |e: dotenvy::Error| Error::Config(format!("{}: {}", path.display(), e));

    let mut vars = HashMap::new();
    for item in dotenvy::from_path_iter(path).map_err(bad_file)? {
        let (key, value) = item.map_err(bad_file)?;
        validate_env_name(&key)?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// Load `<base_dir>/.env` if it exists; a missing file yields an empty map.
pub fn load_optional_env_file<P: AsRef<Path>>(base_dir: P) -> Result<HashMap<String, String>> {
    let path = base_dir.as_ref().join(".env");
    if !path.exists() {
        return Ok(HashMap::new());
    }
    tracing::debug!("Loading settings overrides from {}", path.display());
    load_env_file(path)
}

/// Check that `name` is usable as an environment variable.
///
/// Names must start with a letter or underscore and contain only ASCII
/// alphanumerics and underscores. Applied to `.env` keys and to service
/// `env_overrides` keys, which are passed to child processes verbatim.
pub fn validate_env_name(name: &str) -> Result<()> {
    let invalid = |why: String| -> Result<()> {
        Err(Error::Config(format!(
            "'{}' is not a valid variable name: {}",
            name, why
        )))
    };

    match name.chars().next() {
        None => return Err(Error::Config("variable name is empty".to_string())),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return invalid("it must begin with a letter or '_'".to_string());
        }
        Some(_) => {}
    }

    if let Some((pos, c)) = name
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return invalid(format!("'{}' at byte {} is not a letter, digit, or '_'", c, pos));
    }

    Ok(())
}
