use serde::{Deserialize, Serialize};

/// Capability flags the host knows how to enforce, plus any other flag an
/// extension declares.
///
/// Matching is always by exact string (see `checker::has_simple_permission`);
/// the enum only gives the enforced flags a name inside the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Permission {
    Clipboard,
    Notification,
    Storage,
    FsRead,
    FsWrite,
    Shell,
    /// Any flag the host does not enforce itself, kept verbatim.
    Other(String),
}

/// All enforced permission string values.
pub const KNOWN_PERMISSIONS: &[&str] = &[
    "clipboard",
    "notification",
    "storage",
    "fs:read",
    "fs:write",
    "shell",
];

impl Permission {
    /// The serialized string form of this permission.
    pub fn as_str(&self) -> &str {
        match self {
            Permission::Clipboard => "clipboard",
            Permission::Notification => "notification",
            Permission::Storage => "storage",
            Permission::FsRead => "fs:read",
            Permission::FsWrite => "fs:write",
            Permission::Shell => "shell",
            Permission::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "clipboard" => Permission::Clipboard,
            "notification" => Permission::Notification,
            "storage" => Permission::Storage,
            "fs:read" => Permission::FsRead,
            "fs:write" => Permission::FsWrite,
            "shell" => Permission::Shell,
            other => Permission::Other(other.to_string()),
        }
    }

    pub fn risk_level(&self) -> &'static str {
        match self {
            Permission::Clipboard => "medium",
            Permission::Notification => "low",
            Permission::Storage => "low",
            Permission::FsRead => "medium",
            Permission::FsWrite => "high",
            Permission::Shell => "critical",
            Permission::Other(_) => "medium",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Permission::Clipboard => "Read and write the clipboard",
            Permission::Notification => "Show desktop notifications",
            Permission::Storage => "Persist data in extension storage",
            Permission::FsRead => "Read files and directories",
            Permission::FsWrite => "Write files",
            Permission::Shell => "Execute programs on the host system",
            Permission::Other(s) => s.as_str(),
        }
    }

    /// Whether the flag can be refined by `allowPaths` rules.
    pub fn is_path_scoped(&self) -> bool {
        matches!(self, Permission::FsRead | Permission::FsWrite)
    }
}

impl Serialize for Permission {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Permission::parse(&s))
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One allowed program, optionally with positional argument patterns.
///
/// Each entry in `args` is an anchored regular expression matched against the
/// argument at the same position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellCommandRule {
    pub program: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

/// Detailed allow-rules refining one simple permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedPermission {
    pub permission: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_commands: Option<Vec<ShellCommandRule>>,
}

impl ParsedPermission {
    pub fn new(permission: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
            allow_paths: None,
            allow_commands: None,
        }
    }

    pub fn with_paths(mut self, paths: &[&str]) -> Self {
        self.allow_paths = Some(paths.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn with_command(mut self, program: &str, args: Option<&[&str]>) -> Self {
        self.allow_commands.get_or_insert_with(Vec::new).push(ShellCommandRule {
            program: program.to_string(),
            args: args.map(|a| a.iter().map(|s| s.to_string()).collect()),
        });
        self
    }

    /// Append another rule set for the same permission.
    pub fn merge(&mut self, other: ParsedPermission) {
        if let Some(paths) = other.allow_paths {
            self.allow_paths.get_or_insert_with(Vec::new).extend(paths);
        }
        if let Some(commands) = other.allow_commands {
            self.allow_commands.get_or_insert_with(Vec::new).extend(commands);
        }
    }
}

/// Everything the Permission Engine needs to know about an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionHostInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_permissions: Option<Vec<ParsedPermission>>,
}

impl ExtensionHostInfo {
    pub fn new(id: &str, name: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            permissions: Vec::new(),
            parsed_permissions: None,
        }
    }

    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_parsed(mut self, parsed: ParsedPermission) -> Self {
        self.parsed_permissions.get_or_insert_with(Vec::new).push(parsed);
        self
    }

    /// The detailed rule for `permission`, if the manifest declared one.
    pub fn parsed_permission(&self, permission: &str) -> Option<&ParsedPermission> {
        self.parsed_permissions
            .as_deref()
            .and_then(|rules| rules.iter().find(|p| p.permission == permission))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_permissions_roundtrip_through_strings() {
        for s in KNOWN_PERMISSIONS {
            let perm = Permission::parse(s);
            assert!(!matches!(perm, Permission::Other(_)), "{} parsed as Other", s);
            assert_eq!(perm.as_str(), *s);
        }
    }

    #[test]
    fn unknown_flags_are_kept_verbatim() {
        let perm: Permission = serde_json::from_value(serde_json::json!("network")).unwrap();
        assert_eq!(perm, Permission::Other("network".into()));
        assert_eq!(serde_json::to_value(&perm).unwrap(), serde_json::json!("network"));
    }

    #[test]
    fn risk_levels_are_valid() {
        for s in KNOWN_PERMISSIONS {
            let risk = Permission::parse(s).risk_level();
            assert!(["low", "medium", "high", "critical"].contains(&risk));
        }
    }

    #[test]
    fn parsed_permission_json_shape() {
        let json = serde_json::json!({
            "permission": "shell",
            "allowCommands": [{"program": "git", "args": ["status"]}]
        });
        let parsed: ParsedPermission = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(parsed.allow_paths, None);
        assert_eq!(parsed.allow_commands.as_ref().unwrap()[0].program, "git");
        assert_eq!(serde_json::to_value(&parsed).unwrap(), json);
    }

    #[test]
    fn merge_concatenates_rules() {
        let mut a = ParsedPermission::new("fs:read").with_paths(&["$HOME/a/**"]);
        a.merge(ParsedPermission::new("fs:read").with_paths(&["/tmp/*"]));
        assert_eq!(
            a.allow_paths,
            Some(vec!["$HOME/a/**".to_string(), "/tmp/*".to_string()])
        );
        assert_eq!(a.allow_commands, None);
    }

    #[test]
    fn lookup_parsed_permission_by_name() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_permissions(&["shell"])
            .with_parsed(ParsedPermission::new("shell").with_command("ls", None));
        assert!(info.parsed_permission("shell").is_some());
        assert!(info.parsed_permission("fs:read").is_none());
    }
}
