use anyhow::Result;

use repro_get::cache::Cache;
use repro_get::distro;
use repro_get::downloader::{download, DownloadOpts};
use repro_get::filespec;

use crate::cli::{DownloadOptions, GlobalOptions};

pub async fn run(global: &GlobalOptions, opts: &DownloadOptions) -> Result<()> {
    let driver = distro::resolve(&global.distro)?;
    let cache = Cache::new(&global.cache)?;
    let specs = filespec::from_hash_files(&opts.hash_files)?;

    let download_opts = DownloadOpts {
        providers: global.provider.clone(),
        skip_installed: false,
    };
    download(driver.as_ref(), &cache, &specs, &download_opts).await?;
    Ok(())
}
