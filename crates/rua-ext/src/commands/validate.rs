use anyhow::{bail, Context, Result};
use rua_host_lib::permissions::{Permission, KNOWN_PERMISSIONS};
use rua_host_lib::registry::manifest::{entry_path, MANIFEST_FILE};
use rua_host_lib::registry::ExtensionManifest;
use std::path::Path;

/// One `- flag [risk] description` line per declared permission, plus warnings
/// for flags the host does not enforce and for `allowPaths` on flags that
/// are not path-scoped.
fn permission_report(manifest: &ExtensionManifest) -> (Vec<String>, Vec<String>) {
    let mut lines = Vec::new();
    let mut warnings = Vec::new();
    for flag in manifest.simple_permissions() {
        let permission = Permission::parse(&flag);
        lines.push(format!(
            "  - {} [{}] {}",
            flag,
            permission.risk_level(),
            permission.description()
        ));
        if matches!(permission, Permission::Other(_)) {
            warnings.push(format!(
                "unknown permission '{}' (known: {})",
                flag,
                KNOWN_PERMISSIONS.join(", ")
            ));
        }
    }
    for rule in manifest.parsed_permissions().into_iter().flatten() {
        let permission = Permission::parse(&rule.permission);
        if rule.allow_paths.is_some() && !permission.is_path_scoped() {
            warnings.push(format!(
                "allowPaths on '{}' has no effect: it is not path-scoped",
                rule.permission
            ));
        }
    }
    (lines, warnings)
}

pub fn run(path: &Path) -> Result<()> {
    println!("Validating {}", path.join(MANIFEST_FILE).display());

    let manifest = ExtensionManifest::load(path).context("Failed to read manifest")?;
    let mut errors: Vec<String> = Vec::new();
    if let Err(e) = manifest.validate() {
        errors.push(e.to_string());
    }

    if let Some(entry) = manifest.ui_entry() {
        if !entry_path(path, entry).is_some_and(|file| file.is_file()) {
            errors.push(format!("ui entry '{}' not found", entry));
        }
    }
    if let Some(script) = manifest.background_entry() {
        if !entry_path(path, script).is_some_and(|file| file.is_file()) {
            errors.push(format!("background script '{}' not found", script));
        }
    }

    let (lines, warnings) = permission_report(&manifest);
    for warning in &warnings {
        eprintln!("  WARNING: {warning}");
    }

    if errors.is_empty() {
        println!(
            "{} {} is valid ({} actions)",
            manifest.id,
            manifest.version,
            manifest.rua.actions.len()
        );
        if !lines.is_empty() {
            println!("Permissions:");
            for line in &lines {
                println!("{line}");
            }
        }
        Ok(())
    } else {
        for err in &errors {
            eprintln!("  ERROR: {err}");
        }
        bail!("{} validation error(s) found", errors.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, manifest: &str) {
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
    }

    #[test]
    fn valid_extension_passes() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            r#"{"id": "notes", "name": "Notes", "version": "1.0.0",
                "rua": {"ui": {"entry": "index.html"}, "actions": []}}"#,
        );
        std::fs::write(dir.path().join("index.html"), "").unwrap();
        run(dir.path()).unwrap();
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            r#"{"id": "notes", "name": "Notes", "version": "1.0.0",
                "rua": {"ui": {"entry": "index.html"},
                        "actions": [{"name": "bg", "title": "Bg", "mode": "background", "script": "bg.js"}]}}"#,
        );
        let err = run(dir.path()).unwrap_err();
        assert!(err.to_string().contains("2 validation error(s)"));
    }

    #[test]
    fn permissions_are_reported_with_risk() {
        let manifest = ExtensionManifest::from_json(
            r#"{"id": "notes", "name": "Notes", "version": "1.0.0",
                "permissions": ["shell", "network",
                    {"permission": "clipboard", "allow": [{"path": "/tmp/**"}]}],
                "rua": {"actions": []}}"#,
        )
        .unwrap();
        let (lines, warnings) = permission_report(&manifest);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("shell [critical]"));
        assert!(lines[1].contains("network [medium]"));
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("unknown permission 'network'"));
        assert!(warnings[0].contains("fs:read"));
        assert!(warnings[1].contains("'clipboard' has no effect"));
    }
}
