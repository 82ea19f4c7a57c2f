//! `{PORT}` / `{HOST}` substitution for service commands and env overrides.
//!
//! Exactly two tokens are recognised. Anything else in braces passes through
//! untouched.

use crate::config::LOOPBACK_HOST;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;

pub const PORT_PLACEHOLDER: &str = "{PORT}";
pub const HOST_PLACEHOLDER: &str = "{HOST}";

/// Substitute the placeholders in `text`.
///
/// `{PORT}` is only replaced when a port is known; otherwise it is left in
/// place. `{HOST}` always becomes the loopback address.
pub fn render(text: &str, port: Option<u16>) -> String {
    let mut out = text.to_string();
    if let Some(port) = port {
        if out.contains(PORT_PLACEHOLDER) {
            out = out.replace(PORT_PLACEHOLDER, &port.to_string());
        }
    }
    if out.contains(HOST_PLACEHOLDER) {
        out = out.replace(HOST_PLACEHOLDER, LOOPBACK_HOST);
    }
    out
}

pub fn requires_port(text: &str) -> bool {
    text.contains(PORT_PLACEHOLDER)
}

/// Environment for a spawned command.
///
/// Starts from `inherited`, defaults `PORT` (when known) and `HOST`, then
/// applies the service's overrides with placeholders rendered. Overrides win.
///
/// Inherited names and values need not be UTF-8; they pass through as-is.
pub fn command_environment<I>(
    inherited: I,
    port: Option<u16>,
    overrides: &BTreeMap<String, String>,
) -> HashMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: HashMap<OsString, OsString> = inherited.into_iter().collect();
    if let Some(port) = port {
        env.entry(OsString::from("PORT"))
            .or_insert_with(|| OsString::from(port.to_string()));
    }
    env.entry(OsString::from("HOST"))
        .or_insert_with(|| OsString::from(LOOPBACK_HOST));

    for (key, value) in overrides {
        env.insert(OsString::from(key), OsString::from(render(value, port)));
    }
    env
}
