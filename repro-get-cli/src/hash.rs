use std::io::Write;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use repro_get::cache::Cache;
use repro_get::distro::{self, HashOpts, InspectOpts};
use repro_get::{filespec, hashfile};

use crate::cli::{GlobalOptions, HashGenerateOptions, HashInspectOptions, HashUpdateOptions};

pub async fn generate(global: &GlobalOptions, _opts: &HashGenerateOptions) -> Result<()> {
    let driver = distro::resolve(&global.distro)?;
    let cache = Cache::new(&global.cache)?;
    let mut out = Vec::new();
    let hash_opts = HashOpts {
        filter_by_name: Vec::new(),
        cache: Some(&cache),
    };
    driver.generate_hash(&mut out, hash_opts).await?;
    std::io::stdout().write_all(&out)?;
    std::io::stdout().flush()?;
    Ok(())
}

pub fn inspect(opts: &HashInspectOptions) -> Result<()> {
    let specs = filespec::from_hash_files(&opts.hash_files)?;
    let json = serde_json::to_string_pretty(&specs)?;
    println!("{json}");
    Ok(())
}

pub async fn update(global: &GlobalOptions, opts: &HashUpdateOptions) -> Result<()> {
    let driver = distro::resolve(&global.distro)?;
    let cache = Cache::new(&global.cache)?;

    let old = std::fs::read(&opts.hash_file)
        .with_context(|| format!("failed to open {:?}", opts.hash_file.display().to_string()))?;
    let sums = hashfile::parse(old.as_slice())
        .with_context(|| format!("failed to parse {:?}", opts.hash_file.display().to_string()))?;
    let specs = filespec::from_sums(&sums, None)?;

    let mut packages = Vec::new();
    for (name, spec) in &specs {
        match driver.inspect_file(spec, InspectOpts::default()).await {
            Ok(inf) => match inf.package_name {
                Some(pkg) => packages.push(pkg),
                None => warn!("failed to resolve the package name of {name:?}"),
            },
            Err(e) => warn!("failed to resolve the package name of {name:?}: {e}"),
        }
    }

    let hash_opts = HashOpts {
        filter_by_name: packages,
        cache: Some(&cache),
    };
    let mut new = Vec::new();
    driver.generate_hash(&mut new, hash_opts).await?;
    if new.is_empty() {
        bail!("no hash was generated");
    }
    if new == old {
        info!("no update");
        return Ok(());
    }
    std::fs::write(&opts.hash_file, &new)?;
    info!("updated {:?}", opts.hash_file.display().to_string());
    Ok(())
}
