//! Capability namespacing for Switchyard.
//!
//! Qualifies tool and prompt names with their owning server using a double
//! underscore separator (e.g., `gh__list_repos`) and prepends `[via server]`
//! to descriptions so downstream clients can see where a capability lives.

use rmcp::model::{Prompt, Tool};

use crate::error::SwitchyardError;

/// Reserved separator between the server name and the local capability name.
pub const SEPARATOR: &str = "__";

/// Check that a server, capability or group name is non-empty, does not
/// contain the reserved separator and does not start or end with `_`.
///
/// An edge underscore would merge into the separator (`a_` + `b` is
/// `a___b`, which splits as `a` + `_b`), so two capabilities could share
/// one qualified name.
pub fn validate_name(name: &str) -> crate::Result<()> {
    if name.trim().is_empty() {
        return Err(SwitchyardError::InvalidName(
            name.to_string(),
            "name must not be empty".to_string(),
        ));
    }
    if name.contains(SEPARATOR) {
        return Err(SwitchyardError::InvalidName(
            name.to_string(),
            format!("name must not contain the reserved separator '{SEPARATOR}'"),
        ));
    }
    if name.starts_with('_') || name.ends_with('_') {
        return Err(SwitchyardError::InvalidName(
            name.to_string(),
            "name must not start or end with '_'".to_string(),
        ));
    }
    Ok(())
}

/// Build the qualified name for a capability.
/// E.g., server="gh", local="list_repos" -> "gh__list_repos"
pub fn compose(server: &str, local: &str) -> crate::Result<String> {
    validate_name(server)?;
    validate_name(local)?;
    Ok(format!("{server}{SEPARATOR}{local}"))
}

/// Split a qualified name into (server, local) on the first separator.
/// Returns None if the separator is absent.
pub fn decompose(qualified: &str) -> Option<(&str, &str)> {
    qualified.split_once(SEPARATOR)
}

/// Rewrite an upstream tool into its downstream form: qualified name and a
/// `[via server]` description prefix.
pub fn namespace_tool(server: &str, mut tool: Tool) -> Tool {
    tool.name = format!("{}{}{}", server, SEPARATOR, tool.name).into();
    if let Some(desc) = tool.description.as_mut() {
        let prefixed = format!("[via {}] {}", server, desc);
        *desc = prefixed.into();
    }
    tool
}

/// Prompt counterpart of [`namespace_tool`].
pub fn namespace_prompt(server: &str, mut prompt: Prompt) -> Prompt {
    prompt.name = format!("{}{}{}", server, SEPARATOR, prompt.name);
    if let Some(desc) = prompt.description.as_mut() {
        *desc = format!("[via {}] {}", server, desc);
    }
    prompt
}
