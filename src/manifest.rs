//! Application manifest (`RT_MANIFEST`) editing, including the requested execution level.
//!
//! See <https://learn.microsoft.com/en-us/windows/win32/sbscs/application-manifests> for more information.

use alloc::{
    borrow::ToOwned,
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::{fmt, str::FromStr};

use log::{debug, warn};

use crate::{constants::*, errors::*, resource::*};

const EXECUTION_LEVEL_ELEMENT: &str = "requestedExecutionLevel";
const LEVEL_ATTRIBUTE: &str = "level";

/// Execution level requested by an application manifest.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ExecutionLevel {
    AsInvoker,
    HighestAvailable,
    RequireAdministrator,
}
impl ExecutionLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ExecutionLevel::AsInvoker => EXECUTION_LEVEL_AS_INVOKER,
            ExecutionLevel::HighestAvailable => EXECUTION_LEVEL_HIGHEST_AVAILABLE,
            ExecutionLevel::RequireAdministrator => EXECUTION_LEVEL_REQUIRE_ADMINISTRATOR,
        }
    }
}
impl FromStr for ExecutionLevel {
    type Err = ValidationError;

    fn from_str(level: &str) -> Result<Self, Self::Err> {
        match level {
            EXECUTION_LEVEL_AS_INVOKER => Ok(ExecutionLevel::AsInvoker),
            EXECUTION_LEVEL_HIGHEST_AVAILABLE => Ok(ExecutionLevel::HighestAvailable),
            EXECUTION_LEVEL_REQUIRE_ADMINISTRATOR => Ok(ExecutionLevel::RequireAdministrator),
            _ => Err(ValidationError::InvalidExecutionLevel(level.to_string())),
        }
    }
}
impl fmt::Display for ExecutionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Returns a minimal manifest requesting the given execution level.
pub fn default_manifest(level: ExecutionLevel) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v1" manifestVersion="1.0">
{}</assembly>
"#,
        trust_info(level)
    )
}

fn trust_info(level: ExecutionLevel) -> String {
    format!(
        r#"  <trustInfo xmlns="urn:schemas-microsoft-com:asm.v3">
    <security>
      <requestedPrivileges>
        <requestedExecutionLevel level="{}" uiAccess="false"/>
      </requestedPrivileges>
    </security>
  </trustInfo>
"#,
        level
    )
}

fn is_name_char(c: char) -> bool { c.is_alphanumeric() || c == '_' || c == '-' || c == '.' }

/// Returns the attribute range of the `requestedExecutionLevel` start tag,
/// from the end of the element name to the closing `>`.
fn find_element(manifest: &str) -> Option<(usize, usize)> {
    let mut search = 0;
    while let Some(found) = manifest[search..].find(EXECUTION_LEVEL_ELEMENT) {
        let name_start = search + found;
        let name_end = name_start + EXECUTION_LEVEL_ELEMENT.len();
        search = name_end;
        // the name follows `<` directly or through a namespace prefix such as `<ms_asmv2:`
        let Some(tag_start) = manifest[..name_start].rfind('<') else {
            continue;
        };
        let prefix = &manifest[tag_start + 1..name_start];
        let prefix_ok = prefix.is_empty()
            || prefix
                .strip_suffix(':')
                .is_some_and(|prefix| !prefix.is_empty() && prefix.chars().all(is_name_char));
        let boundary =
            manifest[name_end..].starts_with(|c: char| c.is_whitespace() || c == '/' || c == '>');
        if prefix_ok && boundary {
            let tag_end = name_end + manifest[name_end..].find('>')?;
            return Some((name_end, tag_end));
        }
    }
    None
}

/// Returns the range of the `level` attribute value inside the given attribute range.
fn find_level_value(manifest: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let mut search = start;
    while let Some(found) = manifest[search..end].find(LEVEL_ATTRIBUTE) {
        let attribute_start = search + found;
        search = attribute_start + LEVEL_ATTRIBUTE.len();
        if !manifest[..attribute_start].ends_with(char::is_whitespace) {
            continue;
        }
        let Some(rest) = manifest[search..end].trim_start().strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        let quote = rest.chars().next().filter(|&c| c == '"' || c == '\'')?;
        let value_start = end - rest.len() + 1;
        let value_end = value_start + manifest[value_start..end].find(quote)?;
        return Some((value_start, value_end));
    }
    None
}

/// Replace or add the requested execution level in the given manifest text.
pub fn set_manifest_execution_level(manifest: &str, level: ExecutionLevel) -> String {
    if let Some((start, end)) = find_element(manifest) {
        if let Some((value_start, value_end)) = find_level_value(manifest, start, end) {
            debug!("replacing execution level {:?}", &manifest[value_start..value_end]);
            return format!("{}{}{}", &manifest[..value_start], level, &manifest[value_end..]);
        }
        debug!("adding level attribute to existing execution level element");
        return format!("{} level=\"{}\"{}", &manifest[..start], level, &manifest[start..]);
    }
    // insert before the closing tag of the root element, which may carry a namespace prefix
    let closing = manifest.rfind("assembly>").and_then(|end| manifest[..end].rfind("</"));
    match closing {
        Some(position) => {
            debug!("adding trust info to manifest");
            format!("{}{}{}", &manifest[..position], trust_info(level), &manifest[position..])
        }
        None => {
            warn!("manifest has no assembly element, replacing it");
            default_manifest(level)
        }
    }
}

/// Returns the requested execution level of the given manifest text.
pub fn manifest_execution_level(manifest: &str) -> Option<ExecutionLevel> {
    let (start, end) = find_element(manifest)?;
    let (value_start, value_end) = find_level_value(manifest, start, end)?;
    manifest[value_start..value_end].parse().ok()
}

impl ResourceDirectory {
    /// Returns the path of the first manifest resource.
    fn manifest_path(&self) -> Option<ResourcePath> {
        self.first_leaf(RT_MANIFEST).map(|(path, _)| path)
    }

    /// Get the application manifest.
    ///
    /// # Returns
    /// Returns `None` if there is no manifest resource.
    pub fn get_manifest(&self) -> Option<String> {
        let (_, data) = self.first_leaf(RT_MANIFEST)?;
        let manifest = String::from_utf8_lossy(data.data());
        Some(manifest.trim_start_matches('\u{feff}').to_owned())
    }

    /// Set the application manifest.
    /// See [`ResourceDirectory::set_manifest_data`].
    pub fn set_manifest(&mut self, manifest: &str) {
        self.set_manifest_data(manifest.as_bytes().to_vec())
    }

    /// Set the raw manifest data.
    ///
    /// The first existing manifest resource is replaced and all other manifest resources are removed.
    /// Without an existing manifest, a neutral language manifest with id 1 is added.
    pub fn set_manifest_data(&mut self, manifest: Vec<u8>) {
        let path = self
            .manifest_path()
            .unwrap_or_else(|| ResourcePath::new(RT_MANIFEST, 1u16, LANGUAGE_ID_NEUTRAL));
        let others = self
            .leaves(RT_MANIFEST)
            .into_iter()
            .skip(1)
            .map(|(path, _)| path)
            .collect::<Vec<_>>();
        for other in others {
            warn!("removing additional manifest {:?}", other);
            self.remove(&other);
        }
        match self.find_mut(&path) {
            Some(data) => data.set_data(manifest),
            None => {
                self.insert_or_replace(&path, ResourceData::new(manifest));
            }
        }
    }

    /// Returns the execution level requested by the manifest.
    pub fn execution_level(&self) -> Option<ExecutionLevel> {
        manifest_execution_level(&self.get_manifest()?)
    }

    /// Set the execution level requested by the manifest.
    /// A minimal manifest is added if there is none.
    pub fn set_execution_level(&mut self, level: ExecutionLevel) {
        let manifest = match self.get_manifest() {
            Some(manifest) => set_manifest_execution_level(&manifest, level),
            None => {
                debug!("adding manifest for execution level {}", level);
                default_manifest(level)
            }
        };
        self.set_manifest(&manifest);
    }
}
