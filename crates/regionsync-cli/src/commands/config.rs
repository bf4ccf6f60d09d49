use std::path::Path;

use anyhow::{Result, bail};
use regionsync_core::SyncConfig;

/// Load `path`, or the defaults when no file is given.
pub fn load(path: Option<&Path>) -> Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::from_file(path),
        None => Ok(SyncConfig::default()),
    }
}

pub fn init(out: Option<&Path>, force: bool) -> Result<()> {
    let rendered = SyncConfig::default().to_toml_string()?;
    let Some(out) = out else {
        print!("{rendered}");
        return Ok(());
    };
    if out.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", out.display());
    }
    std::fs::write(out, rendered)?;
    println!("✓ Generated {}", out.display());
    Ok(())
}

pub fn show(path: Option<&Path>) -> Result<()> {
    let config = load(path)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_a_loadable_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("regionsync.toml");

        init(Some(&out), false).unwrap();
        assert_eq!(load(Some(&out)).unwrap(), SyncConfig::default());

        assert!(init(Some(&out), false).is_err());
        init(Some(&out), true).unwrap();
    }

    #[test]
    fn show_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[debounce]\nwindow_ms = \"soon\"\n").unwrap();
        assert!(show(Some(&path)).is_err());
    }
}
