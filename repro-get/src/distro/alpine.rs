//! The Alpine Linux driver.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::cache::{Cache, Metadata};
use crate::distro::{
    command_stdout, run_command, Distro, DockerfileArgs, DockerfileOpts, FileInfo, HashOpts, Info,
    InspectOpts, InstallOpts,
};
use crate::filename::ApkName;
use crate::filespec::FileSpec;
use crate::paths::secure_join;
use crate::urlopener::redacted;
use crate::{hashfile, Error};

/// The `apk` driver.
pub struct Alpine {
    info: Info,
    installed: Mutex<Option<HashMap<String, ApkName>>>,
}

impl Alpine {
    /// Creates the Alpine driver.
    pub fn new() -> Self {
        Self {
            info: Info {
                name: "alpine".to_owned(),
                default_providers: vec![
                    "https://dl-cdn.alpinelinux.org/alpine/{{.Name}}".to_owned(),
                ],
                experimental: true,
                cache_needed_for_generating_hash: true,
            },
            installed: Mutex::new(None),
        }
    }

    async fn installed(&self) -> Result<HashMap<String, ApkName>, Error> {
        if let Some(m) = self.installed.lock().expect("poisoned").as_ref() {
            return Ok(m.clone());
        }
        let m = installed_packages().await?;
        *self.installed.lock().expect("poisoned") = Some(m.clone());
        Ok(m)
    }
}

impl Default for Alpine {
    fn default() -> Self {
        Self::new()
    }
}

async fn generate_hash_for_url(
    out: &mut (dyn Write + Send),
    cache: &Cache,
    url: &Url,
) -> Result<(), Error> {
    debug!("generating the hash for {:?}", redacted(url));
    if url.scheme() != "https" {
        return Err(Error::InvalidUrl(format!(
            "expected an https url, got {:?}",
            redacted(url)
        )));
    }
    let fname = filename_without_provider(url)?;
    let basename = fname.rsplit('/').next().unwrap_or(&fname).to_owned();
    match cache.sha256_by_origin_url(url) {
        Ok(sha256) => {
            debug!(
                "{basename:?}: found cached sha256 {sha256} for {:?}",
                redacted(url)
            );
            hashfile::write_line(out, sha256.as_hex(), &fname)?;
            return Ok(());
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    debug!("{basename:?}: downloading from {:?}", redacted(url));
    let metadata = Metadata { basename };
    let sha256 = cache.import_with_url(url, Some(&metadata)).await?;
    hashfile::write_line(out, sha256.as_hex(), &fname)?;
    Ok(())
}

/// Converts a mirror URL such as
/// `https://dl-cdn.alpinelinux.org/alpine/v3.16/main/x86_64/ca-certificates-bundle-20220614-r0.apk`
/// to the provider-relative name `v3.16/main/x86_64/ca-certificates-bundle-20220614-r0.apk`.
fn filename_without_provider(url: &Url) -> Result<String, Error> {
    let fields: Vec<&str> = url.path().split('/').collect();
    for i in 1..fields.len() {
        let bytes = fields[i].as_bytes();
        if fields[i - 1].starts_with("alpine")
            && bytes.first() == Some(&b'v')
            && bytes.get(1).is_some_and(|c| (b'1'..=b'9').contains(c))
        {
            return Ok(fields[i..].join("/"));
        }
    }
    Err(Error::InvalidUrl(format!(
        "failed to parse {:?}",
        redacted(url)
    )))
}

/// Queries the installed package set via `apk info -v`.
///
/// The map key is the package name.
pub async fn installed_packages() -> Result<HashMap<String, ApkName>, Error> {
    let stdout = command_stdout("apk", ["info", "-v"]).await?;
    parse_installed(&String::from_utf8_lossy(&stdout))
}

fn parse_installed(input: &str) -> Result<HashMap<String, ApkName>, Error> {
    let mut pkgs = HashMap::new();
    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let pkg = ApkName::split(trimmed)?;
        pkgs.insert(pkg.package.clone(), pkg);
    }
    Ok(pkgs)
}

#[async_trait]
impl Distro for Alpine {
    fn info(&self) -> &Info {
        &self.info
    }

    async fn generate_hash(
        &self,
        out: &mut (dyn Write + Send),
        opts: HashOpts<'_>,
    ) -> Result<(), Error> {
        let cache = opts.cache.ok_or(Error::CacheRequired)?;
        let mut names = opts.filter_by_name;
        if names.is_empty() {
            let installed = self.installed().await?;
            if installed.is_empty() {
                return Err(Error::NothingInstalled);
            }
            names = installed.into_keys().collect();
        }
        names.sort();
        // `apk fetch` insists on an output directory even when simulating.
        let scratch = tempfile::tempdir()?;
        let output_flag = format!("--output={}", scratch.path().display());
        let args = ["fetch", "--simulate", &output_flag, "--url"]
            .map(str::to_owned)
            .into_iter()
            .chain(names);
        let stdout = command_stdout("apk", args).await?;
        for line in String::from_utf8_lossy(&stdout).lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let url = Url::parse(trimmed)?;
            generate_hash_for_url(out, cache, &url).await?;
        }
        Ok(())
    }

    async fn inspect_file(&self, spec: &FileSpec, opts: InspectOpts) -> Result<FileInfo, Error> {
        let mut inf = FileInfo::new(spec);
        let Some(apk) = &spec.apk else {
            return Ok(inf);
        };
        inf.is_package = true;
        inf.package_name = Some(apk.package.clone());
        if opts.check_installed {
            let installed = self.installed().await?;
            if let Some(inst) = installed.get(&apk.package) {
                inf.installed = Some(inst.version == apk.version);
            }
        }
        Ok(inf)
    }

    async fn install_packages(
        &self,
        cache: &Cache,
        packages: &[FileSpec],
        _opts: InstallOpts,
    ) -> Result<(), Error> {
        if packages.is_empty() {
            return Ok(());
        }
        // `apk add` wants meaningful file names, so hand it symlinks that
        // preserve the original basenames.
        let scratch = tempfile::tempdir()?;
        let mut args = vec!["add".to_owned(), "--no-network".to_owned()];
        info!("running 'apk add --no-network ...' with {} packages", packages.len());
        for pkg in packages {
            let blob = cache.blob_path(&pkg.sha256);
            let link = secure_join(scratch.path(), &pkg.basename)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&blob, &link)?;
            #[cfg(not(unix))]
            return Err(Error::NotImplemented);
            args.push(link.display().to_string());
        }
        run_command("apk", args).await
    }

    async fn generate_dockerfile(
        &self,
        _dir: &Path,
        _args: &DockerfileArgs,
        _opts: DockerfileOpts,
    ) -> Result<(), Error> {
        Err(Error::NotImplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_installed_lines() {
        let input = "\
musl-1.2.3-r4
ca-certificates-bundle-20220614-r0
";
        let got = parse_installed(input).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got["musl"].version, "1.2.3-r4");
        assert_eq!(got["ca-certificates-bundle"].version, "20220614-r0");
    }

    #[test]
    fn filename_from_mirror_url() {
        let url = Url::parse(
            "https://dl-cdn.alpinelinux.org/alpine/v3.16/main/x86_64/ca-certificates-bundle-20220614-r0.apk",
        )
        .unwrap();
        assert_eq!(
            filename_without_provider(&url).unwrap(),
            "v3.16/main/x86_64/ca-certificates-bundle-20220614-r0.apk"
        );
    }

    #[test]
    fn filename_requires_alpine_segment() {
        let url = Url::parse("https://example.com/other/v3.16/main/x.apk").unwrap();
        assert!(filename_without_provider(&url).is_err());
    }

    #[tokio::test]
    async fn inspect_classifies_apk_files() {
        let sum = "35b1508eeee9c1dfba798c4c04304ef0f266990f936a51f165571edf53325cbc";
        let d = Alpine::new();
        let sp = FileSpec::new(
            "v3.16/main/x86_64/ca-certificates-bundle-20220614-r0.apk",
            sum,
        )
        .unwrap();
        let inf = d.inspect_file(&sp, InspectOpts::default()).await.unwrap();
        assert!(inf.is_package);
        assert_eq!(inf.package_name.as_deref(), Some("ca-certificates-bundle"));
    }
}
