pub mod checker;
pub mod glob;
pub mod types;

pub use checker::{
    has_command_line_permission, has_path_permission, has_path_permission_in,
    has_shell_permission, has_simple_permission, permission_error,
};
pub use glob::{normalize_lexical, PathEnv};
pub use types::{
    ExtensionHostInfo, ParsedPermission, Permission, ShellCommandRule, KNOWN_PERMISSIONS,
};
