use anyhow::Result;
use tracing::info;

use repro_get::cache::Cache;
use repro_get::distro::{self, InstallOpts};
use repro_get::downloader::{download, DownloadOpts};
use repro_get::filespec;

use crate::cli::{GlobalOptions, InstallOptions};

pub async fn run(global: &GlobalOptions, opts: &InstallOptions) -> Result<()> {
    let driver = distro::resolve(&global.distro)?;
    let cache = Cache::new(&global.cache)?;
    let specs = filespec::from_hash_files(&opts.hash_files)?;

    let download_opts = DownloadOpts {
        providers: global.provider.clone(),
        skip_installed: true,
    };
    let res = download(driver.as_ref(), &cache, &specs, &download_opts).await?;
    if res.packages_to_install.is_empty() {
        info!("no package to install");
        return Ok(());
    }
    let install_opts = InstallOpts {
        aux_files: res.aux_files_for_install,
    };
    driver
        .install_packages(&cache, &res.packages_to_install, install_opts)
        .await?;
    Ok(())
}
