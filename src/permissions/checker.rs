use super::glob::{anchored_match, glob_matches, normalize_lexical, PathEnv};
use super::types::{ExtensionHostInfo, Permission, ShellCommandRule};
use crate::capabilities::shell::split_command;
use crate::error::RuaError;

/// Characters a shell gives meaning beyond plain word splitting.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '<', '>', '$', '`', '(', ')', '{', '}', '[', ']', '*', '?', '~', '!', '#',
    '\'', '"', '\\', '\n', '\r',
];

/// Exact membership test. No wildcard matching at this tier.
pub fn has_simple_permission(permissions: &[String], name: &str) -> bool {
    permissions.iter().any(|p| p == name)
}

/// Path-scoped check using the current user's `$HOME` / `$APPDATA`.
pub fn has_path_permission(info: &ExtensionHostInfo, permission: &str, path: &str) -> bool {
    has_path_permission_in(&PathEnv::current(), info, permission, path)
}

/// Path-scoped check against an explicit environment.
///
/// A granted flag with no `allowPaths` rule is unrestricted. This open default
/// exists for manifests written before scoped rules; new permission kinds must
/// not lean on it. Under `allowPaths` the path is matched after lexical
/// normalization, and a path whose `..` climbs above its root is denied.
pub fn has_path_permission_in(
    env: &PathEnv,
    info: &ExtensionHostInfo,
    permission: &str,
    path: &str,
) -> bool {
    if !has_simple_permission(&info.permissions, permission) {
        return false;
    }

    let allow_paths = match info
        .parsed_permission(permission)
        .and_then(|p| p.allow_paths.as_ref())
    {
        Some(paths) => paths,
        None => return true,
    };

    let normalized = match normalize_lexical(path) {
        Some(normalized) => normalized,
        None => return false,
    };
    allow_paths
        .iter()
        .any(|pattern| glob_matches(env, pattern, &normalized))
}

/// Shell check: requires the `shell` flag, then an `allowCommands` entry for
/// the exact program whose argument patterns accept `args` positionally.
pub fn has_shell_permission(info: &ExtensionHostInfo, program: &str, args: &[String]) -> bool {
    let shell = Permission::Shell;
    if !has_simple_permission(&info.permissions, shell.as_str()) {
        return false;
    }

    let allow_commands = match info
        .parsed_permission(shell.as_str())
        .and_then(|p| p.allow_commands.as_ref())
    {
        Some(commands) => commands,
        None => return true,
    };

    allow_commands
        .iter()
        .any(|rule| command_rule_matches(rule, program, args))
}

/// Shell check for a full command line run through `shell -c`.
///
/// With `allowCommands` rules the line must be a plain word list: any shell
/// metacharacter is denied, then the whitespace split is checked as
/// `program args..`.
pub fn has_command_line_permission(info: &ExtensionHostInfo, command: &str) -> bool {
    let shell = Permission::Shell;
    if !has_simple_permission(&info.permissions, shell.as_str()) {
        return false;
    }
    let restricted = info
        .parsed_permission(shell.as_str())
        .is_some_and(|p| p.allow_commands.is_some());
    if !restricted {
        return true;
    }
    if command.contains(SHELL_METACHARACTERS) {
        return false;
    }
    let (program, args) = split_command(command);
    has_shell_permission(info, &program, &args)
}

fn command_rule_matches(rule: &ShellCommandRule, program: &str, args: &[String]) -> bool {
    if rule.program != program {
        return false;
    }
    let patterns = match &rule.args {
        Some(patterns) => patterns,
        None => return true,
    };
    // Fewer args than patterns is fine; more is not.
    if args.len() > patterns.len() {
        return false;
    }
    args.iter()
        .zip(patterns)
        .all(|(arg, pattern)| anchored_match(pattern, arg))
}

/// Build the denial returned to extension code when a check fails.
pub fn permission_error(permission: &str, detail: Option<&str>) -> RuaError {
    RuaError::permission_denied(permission, detail.map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::types::ParsedPermission;
    use std::path::PathBuf;

    fn env() -> PathEnv {
        PathEnv {
            home: Some(PathBuf::from("/home/ana")),
            app_data: Some(PathBuf::from("/home/ana/.config/rua")),
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn simple_permission_is_exact() {
        let perms = args(&["fs:read", "clipboard"]);
        assert!(has_simple_permission(&perms, "clipboard"));
        assert!(!has_simple_permission(&perms, "fs"));
        assert!(!has_simple_permission(&perms, "fs:*"));
    }

    #[test]
    fn missing_flag_denies_regardless_of_rules() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_parsed(ParsedPermission::new("fs:read").with_paths(&["/**"]))
            .with_parsed(ParsedPermission::new("shell").with_command("ls", None));
        assert!(!has_path_permission_in(&env(), &info, "fs:read", "/tmp/a"));
        assert!(!has_shell_permission(&info, "ls", &[]));
    }

    #[test]
    fn granted_flag_without_rules_is_open() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0").with_permissions(&["fs:read"]);
        assert!(has_path_permission_in(&env(), &info, "fs:read", "/etc/passwd"));
    }

    #[test]
    fn rule_without_paths_is_open() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_permissions(&["fs:read"])
            .with_parsed(ParsedPermission::new("fs:read"));
        assert!(has_path_permission_in(&env(), &info, "fs:read", "/etc/passwd"));
    }

    #[test]
    fn allow_paths_restrict() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_permissions(&["fs:read"])
            .with_parsed(ParsedPermission::new("fs:read").with_paths(&["$HOME/Documents/**"]));
        assert!(has_path_permission_in(&env(), &info, "fs:read", "/home/ana/Documents/a/b/c.txt"));
        assert!(!has_path_permission_in(&env(), &info, "fs:read", "/home/ana/Desktop/a.txt"));
    }

    #[test]
    fn parent_components_cannot_escape_allow_paths() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_permissions(&["fs:read", "fs:write"])
            .with_parsed(ParsedPermission::new("fs:read").with_paths(&["$HOME/Documents/**"]))
            .with_parsed(ParsedPermission::new("fs:write").with_paths(&["$APPDATA/cache/**"]));
        let e = env();
        assert!(!has_path_permission_in(&e, &info, "fs:read", "/home/ana/Documents/../../../etc/passwd"));
        assert!(!has_path_permission_in(&e, &info, "fs:write", "/home/ana/.config/rua/cache/../../../.bashrc"));
        assert!(!has_path_permission_in(&e, &info, "fs:read", "/../home/ana/Documents/a.txt"));
        // `..` that stays inside the scope is fine
        assert!(has_path_permission_in(&e, &info, "fs:read", "/home/ana/Documents/a/../b.txt"));
        assert!(has_path_permission_in(&e, &info, "fs:write", "/home/ana/.config/rua/cache/./x"));
    }

    #[test]
    fn restricted_command_lines_reject_shell_syntax() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_permissions(&["shell"])
            .with_parsed(ParsedPermission::new("shell").with_command("ls", None));
        assert!(has_command_line_permission(&info, "ls -la /tmp"));
        for line in [
            "ls ; rm -rf /",
            "ls && rm -rf /",
            "ls | sh",
            "ls $(rm -rf /)",
            "ls `rm -rf /`",
            "ls > /etc/passwd",
            "ls\nrm -rf /",
            "ls 'a b'",
        ] {
            assert!(!has_command_line_permission(&info, line), "{}", line);
        }
        assert!(!has_command_line_permission(&info, "rm -rf /"));
    }

    #[test]
    fn unrestricted_shell_accepts_any_command_line() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0").with_permissions(&["shell"]);
        assert!(has_command_line_permission(&info, "ls | wc -l"));
        let none = ExtensionHostInfo::new("e", "E", "1.0.0");
        assert!(!has_command_line_permission(&none, "ls"));
    }

    #[test]
    fn shell_args_are_positional() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_permissions(&["shell"])
            .with_parsed(ParsedPermission::new("shell").with_command("git", Some(&["status"])));
        assert!(has_shell_permission(&info, "git", &args(&["status"])));
        assert!(!has_shell_permission(&info, "git", &args(&["push"])));
        assert!(!has_shell_permission(&info, "git", &args(&["status", "--short"])));
        assert!(has_shell_permission(&info, "git", &[]));
    }

    #[test]
    fn program_without_arg_patterns_accepts_any_args() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_permissions(&["shell"])
            .with_parsed(ParsedPermission::new("shell").with_command("ls", None));
        assert!(has_shell_permission(&info, "ls", &args(&["-la"])));
        assert!(!has_shell_permission(&info, "rm", &args(&["-rf", "/"])));
    }

    #[test]
    fn malformed_arg_pattern_fails_closed() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_permissions(&["shell"])
            .with_parsed(ParsedPermission::new("shell").with_command("echo", Some(&["(unclosed"])));
        assert!(!has_shell_permission(&info, "echo", &args(&["(unclosed"])));
        // The other rule sets are unaffected.
        assert!(has_shell_permission(&info, "echo", &[]));
    }

    #[test]
    fn shell_without_rules_is_open() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0").with_permissions(&["shell"]);
        assert!(has_shell_permission(&info, "anything", &args(&["at", "all"])));
    }

    #[test]
    fn permission_error_prefix() {
        let err = permission_error("shell", Some("rm -rf /"));
        assert!(RuaError::is_permission_denied(&err.to_string()));
        assert!(err.to_string().contains("rm -rf /"));
    }
}
