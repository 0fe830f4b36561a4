use std::io::Write;

use anyhow::Result;
use tracing::info;

use repro_get::cache::Cache;
use repro_get::hashfile;

use crate::cli::{CacheExportOptions, CacheImportOptions, GlobalOptions};

pub async fn import(global: &GlobalOptions, opts: &CacheImportOptions) -> Result<()> {
    let cache = Cache::new(&global.cache)?;
    let imported = cache.import(&opts.files).await?;
    let mut out = std::io::stdout().lock();
    for (basename, sha256) in &imported {
        hashfile::write_line(&mut out, sha256.as_hex(), basename)?;
    }
    Ok(())
}

pub fn export(global: &GlobalOptions, opts: &CacheExportOptions) -> Result<()> {
    let cache = Cache::new(&global.cache)?;
    let exported = cache.export(&opts.dir)?;
    let mut out = std::io::stdout().lock();
    for (basename, sha256) in &exported {
        hashfile::write_line(&mut out, sha256.as_hex(), basename)?;
    }
    Ok(())
}

pub fn clean(global: &GlobalOptions) -> Result<()> {
    info!("removing {:?}", global.cache.display().to_string());
    match std::fs::remove_dir_all(&global.cache) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
