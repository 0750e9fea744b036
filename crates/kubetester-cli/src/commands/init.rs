use super::{json_pretty, EXIT_SUCCESS};
use kubetester_config::EnvironmentConfig;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

fn write_atomic(dest: &Path, content: &str) -> Result<(), String> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| format!("write temp file: {e}"))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| format!("write temp file: {e}"))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| format!("fsync temp file: {e}"))?;
    tmp.persist(dest)
        .map_err(|e| format!("persist config: {}", e.error))?;
    Ok(())
}

/// Write a starter config with one unmanaged node group and no add-ons.
pub fn run(dest: &Path, name: &str, region: &str, force: bool, json: bool) -> Result<u8, String> {
    if dest.exists() && !force {
        return Err(format!(
            "refusing to overwrite existing {} (pass --force)",
            dest.display()
        ));
    }

    let config = EnvironmentConfig::template(name, region);
    config
        .validate()
        .map_err(|e| format!("config error: {e}"))?;
    let toml = config
        .to_toml()
        .map_err(|e| format!("config error: {e}"))?;
    write_atomic(dest, &toml)?;

    if json {
        let payload = serde_json::json!({
            "status": "written",
            "path": dest.display().to_string(),
            "name": name,
            "region": region,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("wrote {} for '{name}' ({region})", dest.display());
    }
    Ok(EXIT_SUCCESS)
}
