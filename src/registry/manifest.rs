use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::actions::namespaced_id;
use crate::error::{RuaError, RuaResult};
use crate::permissions::{normalize_lexical, ExtensionHostInfo, ParsedPermission, ShellCommandRule};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const BACKGROUND_MODE: &str = "background";

const BIDI_CHARS: [char; 9] = [
    '\u{202A}', '\u{202B}', '\u{202C}', '\u{202D}', '\u{202E}', '\u{2066}', '\u{2067}', '\u{2068}',
    '\u{2069}',
];

/// Resolve a manifest entry (`rua.ui.entry`, a background `script`) inside the
/// extension directory `dir`. Any query string is dropped.
///
/// `None` for absolute entries and for entries whose `..` leaves `dir`.
pub fn entry_path(dir: &Path, entry: &str) -> Option<PathBuf> {
    let file = entry.split('?').next().unwrap_or(entry);
    if Path::new(file)
        .components()
        .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return None;
    }
    normalize_lexical(file).map(|relative| dir.join(relative))
}

/// One `allow` rule inside a detailed permission entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllowRule {
    Path { path: String },
    Command { cmd: ShellCommandRule },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedPermission {
    pub permission: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<AllowRule>,
}

/// A `permissions` entry: a bare flag or a flag with inline allow rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionEntry {
    Simple(String),
    Detailed(DetailedPermission),
}

impl PermissionEntry {
    pub fn name(&self) -> &str {
        match self {
            PermissionEntry::Simple(name) => name,
            PermissionEntry::Detailed(detailed) => &detailed.permission,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiEntry {
    pub entry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestAction {
    pub name: String,
    pub title: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    /// Entry script, required for `background` actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuaSection {
    #[serde(default)]
    pub engine_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiEntry>,
    #[serde(default)]
    pub actions: Vec<ManifestAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_permissions: Option<Vec<ParsedPermission>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub rua: RuaSection,
}

impl ExtensionManifest {
    pub fn from_json(json: &str) -> RuaResult<Self> {
        serde_json::from_str(json).map_err(|e| RuaError::InvalidManifest(e.to_string()))
    }

    /// Read `manifest.json` from an extension directory.
    pub fn load(dir: &Path) -> RuaResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            RuaError::InvalidManifest(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Every granted flag, in declaration order, without duplicates.
    pub fn simple_permissions(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.permissions
            .iter()
            .map(|entry| entry.name().to_string())
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    /// Inline `allow` rules and explicit `parsedPermissions`, merged per flag.
    pub fn parsed_permissions(&self) -> Option<Vec<ParsedPermission>> {
        let mut merged: Vec<ParsedPermission> = Vec::new();
        let mut add = |rule: ParsedPermission| match merged
            .iter_mut()
            .find(|existing| existing.permission == rule.permission)
        {
            Some(existing) => existing.merge(rule),
            None => merged.push(rule),
        };

        for entry in &self.permissions {
            let PermissionEntry::Detailed(detailed) = entry else {
                continue;
            };
            if detailed.allow.is_empty() {
                continue;
            }
            let mut rule = ParsedPermission::new(detailed.permission.clone());
            for allow in &detailed.allow {
                match allow {
                    AllowRule::Path { path } => {
                        rule.allow_paths.get_or_insert_with(Vec::new).push(path.clone());
                    }
                    AllowRule::Command { cmd } => {
                        rule.allow_commands.get_or_insert_with(Vec::new).push(cmd.clone());
                    }
                }
            }
            add(rule);
        }
        for rule in self.parsed_permissions.iter().flatten() {
            add(rule.clone());
        }

        if merged.is_empty() {
            None
        } else {
            Some(merged)
        }
    }

    pub fn host_info(&self) -> ExtensionHostInfo {
        ExtensionHostInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            permissions: self.simple_permissions(),
            parsed_permissions: self.parsed_permissions(),
        }
    }

    pub fn background_action(&self) -> Option<&ManifestAction> {
        self.rua.actions.iter().find(|a| a.mode == BACKGROUND_MODE)
    }

    pub fn background_entry(&self) -> Option<&str> {
        self.background_action().and_then(|a| a.script.as_deref())
    }

    pub fn ui_entry(&self) -> Option<&str> {
        self.rua.ui.as_ref().map(|ui| ui.entry.as_str())
    }

    pub fn action_id(&self, action: &ManifestAction) -> String {
        namespaced_id(&self.id, &action.name)
    }

    pub fn validate(&self) -> RuaResult<()> {
        self.validate_inner().map_err(RuaError::InvalidManifest)
    }

    fn validate_inner(&self) -> Result<(), String> {
        if self.id.is_empty() || self.id.len() > 100 {
            return Err("id must be 1-100 characters".into());
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        {
            return Err("id must contain only lowercase letters, digits, dots, underscores, and hyphens".into());
        }
        if self.id.contains("..") || self.id.starts_with('.') {
            return Err("id must not start with a dot or contain '..'".into());
        }
        if self.name.trim().is_empty() {
            return Err("name is required".into());
        }
        if self.version.trim().is_empty() {
            return Err("version is required".into());
        }
        if let Err(e) = semver::Version::parse(&self.version) {
            return Err(format!("version '{}' is not valid semver: {}", self.version, e));
        }

        let mut seen = HashSet::new();
        let mut background = 0;
        for action in &self.rua.actions {
            if action.name.is_empty() {
                return Err("action name must not be empty".into());
            }
            if !seen.insert(&action.name) {
                return Err(format!("duplicate action name: '{}'", action.name));
            }
            if action.mode == BACKGROUND_MODE {
                background += 1;
                if action.script.as_deref().map_or(true, str::is_empty) {
                    return Err(format!("background action '{}' must declare a script", action.name));
                }
            }
        }
        if background > 1 {
            return Err("at most one background action is allowed".into());
        }
        for entry in self.ui_entry().into_iter().chain(self.background_entry()) {
            if entry_path(Path::new(""), entry).is_none() {
                return Err(format!(
                    "entry '{}' must be a relative path inside the extension",
                    entry
                ));
            }
        }

        let granted = self.simple_permissions();
        for rule in self.parsed_permissions.iter().flatten() {
            if !granted.contains(&rule.permission) {
                return Err(format!(
                    "parsedPermissions entry '{}' is not listed in permissions",
                    rule.permission
                ));
            }
        }

        let mut display: Vec<&str> = vec![self.name.as_str(), self.description.as_str()];
        if let Some(author) = &self.author {
            display.push(author);
        }
        for action in &self.rua.actions {
            display.push(&action.title);
            if let Some(subtitle) = &action.subtitle {
                display.push(subtitle);
            }
        }
        if display
            .iter()
            .any(|field| field.chars().any(|c| BIDI_CHARS.contains(&c)))
        {
            return Err("display fields must not contain Unicode bidirectional override characters".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(value: serde_json::Value) -> ExtensionManifest {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "id": "weather",
            "name": "Weather",
            "version": "1.2.0",
            "description": "Forecasts",
            "permissions": [
                "storage",
                {"permission": "fs:read", "allow": [{"path": "$HOME/.weather/**"}]},
                {"permission": "shell", "allow": [{"cmd": {"program": "curl", "args": ["-s"]}}]}
            ],
            "rua": {
                "engineVersion": "^0.4.0",
                "ui": {"entry": "index.html", "width": 600},
                "actions": [
                    {"name": "show", "title": "Show weather", "mode": "view"},
                    {"name": "sync", "title": "Sync", "mode": "background", "script": "bg.js"}
                ]
            }
        })
    }

    #[test]
    fn normalizes_mixed_permissions() {
        let m = manifest(base());
        assert_eq!(m.simple_permissions(), vec!["storage", "fs:read", "shell"]);
        let info = m.host_info();
        let fs = info.parsed_permission("fs:read").unwrap();
        assert_eq!(fs.allow_paths.as_deref(), Some(&["$HOME/.weather/**".to_string()][..]));
        let shell = info.parsed_permission("shell").unwrap();
        assert_eq!(shell.allow_commands.as_ref().unwrap()[0].program, "curl");
        assert!(info.parsed_permission("storage").is_none());
        m.validate().unwrap();
    }

    #[test]
    fn explicit_parsed_permissions_merge() {
        let mut value = base();
        value["parsedPermissions"] = json!([
            {"permission": "fs:read", "allowPaths": ["/tmp/**"]}
        ]);
        let info = manifest(value).host_info();
        let fs = info.parsed_permission("fs:read").unwrap();
        assert_eq!(fs.allow_paths.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn entries() {
        let m = manifest(base());
        assert_eq!(m.background_entry(), Some("bg.js"));
        assert_eq!(m.ui_entry(), Some("index.html"));
        assert_eq!(m.action_id(&m.rua.actions[0]), "weather.show");
    }

    #[test]
    fn plain_string_list_still_parses() {
        let m = manifest(json!({"id": "a", "name": "A", "version": "0.1.0", "permissions": ["clipboard"]}));
        assert_eq!(m.host_info().permissions, vec!["clipboard"]);
        assert!(m.host_info().parsed_permissions.is_none());
        m.validate().unwrap();
    }

    #[test]
    fn validation_rules() {
        let reject = |patch: &dyn Fn(&mut serde_json::Value)| {
            let mut value = base();
            patch(&mut value);
            manifest(value).validate().unwrap_err().to_string()
        };

        assert!(reject(&|v| v["id"] = json!("Weather")).contains("lowercase"));
        assert!(reject(&|v| v["id"] = json!("../x")).contains("lowercase"));
        assert!(reject(&|v| v["id"] = json!("a..b")).contains(".."));
        assert!(reject(&|v| v["version"] = json!("one")).contains("semver"));
        assert!(reject(&|v| v["name"] = json!("Evil\u{202E}")).contains("bidirectional"));
        assert!(reject(&|v| {
            v["rua"]["actions"][0]["mode"] = json!("background");
            v["rua"]["actions"][0]["script"] = json!("other.js");
        })
        .contains("at most one"));
        assert!(reject(&|v| v["rua"]["actions"][1]["script"] = json!(null)).contains("script"));
        assert!(reject(&|v| v["rua"]["actions"][1]["name"] = json!("show")).contains("duplicate"));
        assert!(reject(&|v| v["parsedPermissions"] = json!([{"permission": "clipboard"}])).contains("not listed"));
        assert!(reject(&|v| v["rua"]["actions"][1]["script"] = json!("../../bin/sh")).contains("inside the extension"));
        assert!(reject(&|v| v["rua"]["ui"]["entry"] = json!("/etc/index.html")).contains("inside the extension"));
    }

    #[test]
    fn entry_paths_stay_inside_the_extension() {
        let dir = Path::new("/ext/weather");
        assert_eq!(entry_path(dir, "./bg.js"), Some(dir.join("bg.js")));
        assert_eq!(entry_path(dir, "dist/../index.html?mode=compact"), Some(dir.join("index.html")));
        assert_eq!(entry_path(dir, "../../some/binary"), None);
        assert_eq!(entry_path(dir, "lib/../../x"), None);
        assert_eq!(entry_path(dir, "/usr/bin/env"), None);
    }

    #[test]
    fn from_json_reports_invalid_manifest() {
        let err = ExtensionManifest::from_json("{\"id\": 3}").unwrap_err();
        assert!(matches!(err, RuaError::InvalidManifest(_)));
    }
}
