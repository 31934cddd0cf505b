use std::path::{Component, Path, PathBuf};

/// Directory name used under the platform data/config roots.
pub const APP_DIR_NAME: &str = "rua";

/// Symbolic base directories an extension may resolve paths against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseDirectory {
    Home,
    AppData,
    AppConfig,
    Desktop,
    Document,
    Download,
    Picture,
    Video,
    Audio,
    Temp,
}

impl BaseDirectory {
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "home" => BaseDirectory::Home,
            "appData" => BaseDirectory::AppData,
            "appConfig" => BaseDirectory::AppConfig,
            "desktop" => BaseDirectory::Desktop,
            "document" => BaseDirectory::Document,
            "download" => BaseDirectory::Download,
            "picture" => BaseDirectory::Picture,
            "video" => BaseDirectory::Video,
            "audio" => BaseDirectory::Audio,
            "temp" => BaseDirectory::Temp,
            _ => return None,
        })
    }

    pub fn path(&self) -> Option<PathBuf> {
        match self {
            BaseDirectory::Home => dirs::home_dir(),
            BaseDirectory::AppData => app_data_dir(),
            BaseDirectory::AppConfig => dirs::config_dir().map(|d| d.join(APP_DIR_NAME)),
            BaseDirectory::Desktop => dirs::desktop_dir(),
            BaseDirectory::Document => dirs::document_dir(),
            BaseDirectory::Download => dirs::download_dir(),
            BaseDirectory::Picture => dirs::picture_dir(),
            BaseDirectory::Video => dirs::video_dir(),
            BaseDirectory::Audio => dirs::audio_dir(),
            BaseDirectory::Temp => Some(std::env::temp_dir()),
        }
    }
}

/// The launcher's own data directory (`$APPDATA` in permission patterns).
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_DIR_NAME))
}

/// Join `path` onto the directory named by `base_dir`.
///
/// Unknown tokens, or a base directory the platform cannot provide, return
/// `path` unchanged.
pub fn resolve_path(path: &str, base_dir: Option<&str>) -> String {
    let base = match base_dir.and_then(BaseDirectory::from_token).and_then(|b| b.path()) {
        Some(base) => base,
        None => return path.to_string(),
    };
    base.join(path.trim_start_matches('/'))
        .to_string_lossy()
        .to_string()
}

/// Normalize a path by resolving `.` and `..` components without requiring
/// the path to exist on disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                components.pop();
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }
    components.iter().collect()
}
