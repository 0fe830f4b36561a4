//! The Fedora driver.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{Cache, Metadata};
use crate::distro::{
    command_stdout, run_command, Distro, DockerfileArgs, DockerfileOpts, FileInfo, HashOpts, Info,
    InspectOpts, InstallOpts,
};
use crate::filename::RpmName;
use crate::filespec::FileSpec;
use crate::urlopener::redacted;
use crate::{hashfile, Error};

const KOJI_PACKAGES: &str = "https://kojipkgs.fedoraproject.org/packages/";

/// The `rpm` driver.
pub struct Fedora {
    info: Info,
    installed: Mutex<Option<HashMap<String, RpmName>>>,
}

impl Fedora {
    /// Creates the Fedora driver.
    pub fn new() -> Self {
        Self {
            info: Info {
                name: "fedora".to_owned(),
                default_providers: vec![format!("{KOJI_PACKAGES}{{{{.Name}}}}")],
                experimental: true,
                cache_needed_for_generating_hash: true,
            },
            installed: Mutex::new(None),
        }
    }

    async fn installed(&self) -> Result<HashMap<String, RpmName>, Error> {
        if let Some(m) = self.installed.lock().expect("poisoned").as_ref() {
            return Ok(m.clone());
        }
        let m = installed_packages().await?;
        *self.installed.lock().expect("poisoned") = Some(m.clone());
        Ok(m)
    }

    async fn generate_hash_from_query(
        &self,
        out: &mut (dyn Write + Send),
        cache: &Cache,
        input: &str,
    ) -> Result<(), Error> {
        for line in input.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            debug!("parsing <RPM>,<SRPM> line {trimmed:?}");
            let Some((rpm_name, srpm_name)) = trimmed.split_once(',') else {
                return Err(Error::InvalidFilename {
                    name: line.to_owned(),
                    reason: "expected 2 comma-separated fields".to_owned(),
                });
            };
            let rpm = match RpmName::parse_filename(rpm_name) {
                Ok(rpm) => rpm,
                Err(e) => {
                    warn!("failed to parse the RPM name {rpm_name:?}: {e}");
                    continue;
                }
            };
            // The source RPM is "(none)" for gpg-pubkey entries.
            if !srpm_name.ends_with(".rpm") {
                warn!(
                    "failed to determine the source RPM name of the package {rpm_name:?}: {srpm_name:?}"
                );
                continue;
            }
            let srpm = match RpmName::parse_filename(srpm_name) {
                Ok(srpm) => srpm,
                Err(e) => {
                    warn!("failed to parse the source RPM name {srpm_name:?} (package {rpm_name:?}): {e}");
                    continue;
                }
            };
            let fname = format!(
                "{}/{}/{}/{}/{}",
                srpm.package, srpm.version, srpm.release, rpm.architecture, rpm_name
            );
            generate_hash_for_name(out, cache, &fname).await?;
        }
        Ok(())
    }
}

impl Default for Fedora {
    fn default() -> Self {
        Self::new()
    }
}

async fn generate_hash_for_name(
    out: &mut (dyn Write + Send),
    cache: &Cache,
    fname: &str,
) -> Result<(), Error> {
    let url = Url::parse(&format!("{KOJI_PACKAGES}{fname}"))?;
    debug!("generating the hash for {:?}", redacted(&url));
    let basename = fname.rsplit('/').next().unwrap_or(fname).to_owned();
    match cache.sha256_by_origin_url(&url) {
        Ok(sha256) => {
            debug!(
                "{basename:?}: found cached sha256 {sha256} for {:?}",
                redacted(&url)
            );
            hashfile::write_line(out, sha256.as_hex(), fname)?;
            return Ok(());
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    debug!("{basename:?}: downloading from {:?}", redacted(&url));
    let metadata = Metadata { basename };
    let sha256 = cache.import_with_url(&url, Some(&metadata)).await?;
    hashfile::write_line(out, sha256.as_hex(), fname)?;
    Ok(())
}

/// Queries the installed package set via `rpm -qa`.
///
/// The map key is `package` or `package:architecture` when the architecture
/// is known.
pub async fn installed_packages() -> Result<HashMap<String, RpmName>, Error> {
    let stdout = command_stdout("rpm", ["-qa"]).await?;
    parse_installed(&String::from_utf8_lossy(&stdout))
}

fn parse_installed(input: &str) -> Result<HashMap<String, RpmName>, Error> {
    let mut pkgs = HashMap::new();
    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let pkg = RpmName::split(trimmed)?;
        let key = if pkg.architecture.is_empty() {
            pkg.package.clone()
        } else {
            format!("{}:{}", pkg.package, pkg.architecture)
        };
        pkgs.insert(key, pkg);
    }
    Ok(pkgs)
}

async fn check_signatures(cache: &Cache, packages: &[FileSpec]) -> Result<(), Error> {
    if packages.is_empty() {
        return Ok(());
    }
    info!(
        "running 'rpmkeys --checksig ...' with {} packages",
        packages.len()
    );
    let mut args = vec!["--checksig".to_owned()];
    for pkg in packages {
        args.push(cache.blob_path(&pkg.sha256).display().to_string());
    }
    run_command("rpmkeys", args).await
}

#[async_trait]
impl Distro for Fedora {
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
            names = installed.into_values().map(|rpm| rpm.package).collect();
        }
        names.sort();
        let args = ["-qa", "--queryformat", "%{NAME}-%{VERSION}-%{RELEASE}.%{ARCH}.rpm,%{SOURCERPM}\n"]
            .map(str::to_owned)
            .into_iter()
            .chain(names);
        let stdout = command_stdout("rpm", args).await?;
        self.generate_hash_from_query(out, cache, &String::from_utf8_lossy(&stdout))
            .await
    }

    async fn inspect_file(&self, spec: &FileSpec, opts: InspectOpts) -> Result<FileInfo, Error> {
        let mut inf = FileInfo::new(spec);
        let Some(rpm) = &spec.rpm else {
            return Ok(inf);
        };
        inf.is_package = true;
        inf.package_name = Some(rpm.package.clone());
        if opts.check_installed {
            let installed = self.installed().await?;
            let key = if rpm.architecture.is_empty() {
                rpm.package.clone()
            } else {
                format!("{}:{}", rpm.package, rpm.architecture)
            };
            if let Some(inst) = installed.get(&key) {
                inf.installed = Some(
                    format!("{}.{}", inst.version, inst.release)
                        == format!("{}.{}", rpm.version, rpm.release),
                );
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
        check_signatures(cache, packages).await?;
        info!("running 'rpm -Uvh ...' with {} packages", packages.len());
        let mut args = vec!["-Uvh".to_owned()];
        for pkg in packages {
            args.push(cache.blob_path(&pkg.sha256).display().to_string());
        }
        run_command("rpm", args).await
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
ca-certificates-2022.2.54-5.fc37.noarch
bash-5.2.2-2.fc37.x86_64
gpg-pubkey-5323552a-6112bcdc
";
        let got = parse_installed(input).unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got["ca-certificates:noarch"].version, "2022.2.54");
        assert_eq!(got["bash:x86_64"].release, "2.fc37");
        // gpg-pubkey has no architecture, so the key is the bare name.
        assert_eq!(got["gpg-pubkey"].version, "5323552a");
    }

    #[tokio::test]
    async fn inspect_classifies_rpm_files() {
        let sum = "35b1508eeee9c1dfba798c4c04304ef0f266990f936a51f165571edf53325cbc";
        let d = Fedora::new();
        let sp = FileSpec::new(
            "ca-certificates/2022.2.54/5.fc37/noarch/ca-certificates-2022.2.54-5.fc37.noarch.rpm",
            sum,
        )
        .unwrap();
        let inf = d.inspect_file(&sp, InspectOpts::default()).await.unwrap();
        assert!(inf.is_package);
        assert_eq!(inf.package_name.as_deref(), Some("ca-certificates"));

        let sp = FileSpec::new("pool/main/h/hello/hello_2.10-2_amd64.deb", sum).unwrap();
        let inf = d.inspect_file(&sp, InspectOpts::default()).await.unwrap();
        assert!(!inf.is_package && !inf.is_aux);
    }

    #[tokio::test]
    async fn generate_hash_requires_cache() {
        let d = Fedora::new();
        let mut out: Vec<u8> = Vec::new();
        let err = d
            .generate_hash(&mut out, HashOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CacheRequired));
    }
}
