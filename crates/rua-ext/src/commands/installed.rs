use anyhow::Result;
use rua_host_lib::capabilities::storage::ExtensionStorage;
use rua_host_lib::config::default_data_dir;
use rua_host_lib::registry::{ExtensionManager, InstallSource};
use rua_host_lib::services::EXTENSIONS_DIR;
use std::path::PathBuf;

fn open(data_dir: Option<PathBuf>) -> Result<(PathBuf, ExtensionManager)> {
    let data_dir = data_dir.unwrap_or_else(default_data_dir);
    let manager = ExtensionManager::open(&data_dir.join(EXTENSIONS_DIR))?;
    Ok((data_dir, manager))
}

pub fn run_list(data_dir: Option<PathBuf>) -> Result<()> {
    let (_, manager) = open(data_dir)?;
    let records = manager.list();
    if records.is_empty() {
        println!("No extensions installed");
    }
    for record in records {
        let state = match (&record.error, record.enabled) {
            (Some(_), _) => "error",
            (None, true) => "enabled",
            (None, false) => "disabled",
        };
        println!("{:<32} {:<12} {}", record.id, record.version, state);
        if let Some(error) = &record.error {
            println!("    {error}");
        }
    }
    Ok(())
}

pub async fn run_install(data_dir: Option<PathBuf>, source: &str) -> Result<()> {
    let (_, mut manager) = open(data_dir)?;
    let source = InstallSource::parse(source)?;
    let record = manager.install(source).await?;
    println!("Installed {} {} into {}", record.id, record.version, record.path.display());
    Ok(())
}

pub fn run_uninstall(data_dir: Option<PathBuf>, id: &str) -> Result<()> {
    let (data_dir, mut manager) = open(data_dir)?;
    manager.uninstall(id)?;
    ExtensionStorage::new(&data_dir).remove_extension(id);
    println!("Uninstalled {id}");
    Ok(())
}
