use super::{json_pretty, EXIT_SUCCESS};
use clap::CommandFactory;
use std::fs;
use std::path::{Path, PathBuf};

fn write_page(cmd: clap::Command, path: &Path) -> Result<(), String> {
    let mut buf = Vec::new();
    clap_mangen::Man::new(cmd)
        .render(&mut buf)
        .map_err(|e| format!("man page render failed: {e}"))?;
    fs::write(path, &buf).map_err(|e| format!("failed to write {}: {e}", path.display()))
}

/// Render `<bin>.1` plus one `<bin>-<subcommand>.1` page per subcommand.
pub fn run<C: CommandFactory>(dir: &Path, json: bool) -> Result<u8, String> {
    fs::create_dir_all(dir).map_err(|e| format!("failed to create dir: {e}"))?;
    let cmd = C::command();
    let bin = cmd.get_name().to_owned();

    let mut written: Vec<PathBuf> = Vec::new();
    let top = dir.join(format!("{bin}.1"));
    write_page(cmd.clone(), &top)?;
    written.push(top);
    for sub in cmd.get_subcommands() {
        let path = dir.join(format!("{bin}-{}.1", sub.get_name()));
        write_page(sub.clone(), &path)?;
        written.push(path);
    }

    if json {
        let pages: Vec<String> = written.iter().map(|p| p.display().to_string()).collect();
        println!("{}", json_pretty(&serde_json::json!({ "pages": pages }))?);
    } else {
        println!("{} man pages written to {}", written.len(), dir.display());
    }
    Ok(EXIT_SUCCESS)
}
