//! The Arch Linux driver.

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
use crate::filename::PacmanName;
use crate::filespec::FileSpec;
use crate::paths::secure_join;
use crate::urlopener::redacted;
use crate::{hashfile, Error};

const SIGNATURE_SUFFIX: &str = ".pkg.tar.zst.sig";

const DOCKERFILE_GENERATE_HASH_TMPL: &str = r#"# syntax = docker/dockerfile:1.4
FROM {{.BaseImageOrig}} AS generate-hash
{{snippet "fetch-repro-get"}}
RUN pacman -Sy --noconfirm {{join .Packages " "}}
RUN repro-get hash generate >/SHA256SUMS-{{.OCIArchDashVariant}}

FROM scratch
COPY --from=generate-hash /SHA256SUMS-{{.OCIArchDashVariant}} /
"#;

const DOCKERFILE_TMPL: &str = r#"# syntax = docker/dockerfile:1.4
FROM {{.BaseImage}}
{{snippet "fetch-repro-get"}}
RUN --mount=type=bind,source=SHA256SUMS-{{.OCIArchDashVariant}},target=/run/repro-get/SHA256SUMS \
  repro-get --provider={{join .Providers ","}} install /run/repro-get/SHA256SUMS
"#;

/// The `pacman` driver.
pub struct Arch {
    info: Info,
    installed: Mutex<Option<HashMap<String, PacmanName>>>,
}

impl Arch {
    /// Creates the Arch Linux driver.
    pub fn new() -> Self {
        Self {
            info: Info {
                name: "arch".to_owned(),
                default_providers: vec![
                    "https://archive.archlinux.org/packages/{{.Name}}".to_owned(),
                ],
                experimental: false,
                cache_needed_for_generating_hash: true,
            },
            installed: Mutex::new(None),
        }
    }

    async fn installed(&self) -> Result<HashMap<String, PacmanName>, Error> {
        if let Some(m) = self.installed.lock().expect("poisoned").as_ref() {
            return Ok(m.clone());
        }
        let m = installed_packages().await?;
        *self.installed.lock().expect("poisoned") = Some(m.clone());
        Ok(m)
    }
}

impl Default for Arch {
    fn default() -> Self {
        Self::new()
    }
}

async fn generate_hash_for_url(
    out: &mut (dyn Write + Send),
    cache: &Cache,
    raw_url: &str,
) -> Result<(), Error> {
    let url = Url::parse(raw_url)?;
    debug!("generating the hash for {:?}", redacted(&url));
    let basename = url
        .path()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_owned();
    let pkg = PacmanName::parse_filename(basename.strip_suffix(".sig").unwrap_or(&basename))?;
    let initial = pkg.package.chars().next().ok_or_else(|| Error::InvalidFilename {
        name: basename.clone(),
        reason: "empty package name".to_owned(),
    })?;
    // archive.archlinux.org shards packages by their first character.
    let fname = format!("{initial}/{}/{basename}", pkg.package);
    match cache.sha256_by_origin_url(&url) {
        Ok(sha256) => {
            debug!(
                "{basename:?}: found cached sha256 {sha256} for {:?}",
                redacted(&url)
            );
            hashfile::write_line(out, sha256.as_hex(), &fname)?;
            return Ok(());
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    debug!("{basename:?}: downloading from {:?}", redacted(&url));
    let metadata = Metadata { basename };
    let sha256 = cache.import_with_url(&url, Some(&metadata)).await?;
    hashfile::write_line(out, sha256.as_hex(), &fname)?;
    Ok(())
}

/// Queries the installed package set via `pacman -Qi`.
///
/// The map key is `package` or `package:architecture` when the architecture
/// is known.
pub async fn installed_packages() -> Result<HashMap<String, PacmanName>, Error> {
    let stdout = command_stdout("pacman", ["-Qi"]).await?;
    Ok(parse_installed(&String::from_utf8_lossy(&stdout)))
}

fn parse_installed(input: &str) -> HashMap<String, PacmanName> {
    let mut pkgs = HashMap::new();
    let mut pkg = PacmanName {
        package: String::new(),
        version: String::new(),
        architecture: String::new(),
    };
    let store = |pkg: &PacmanName, pkgs: &mut HashMap<String, PacmanName>| {
        if pkg.package.is_empty() {
            return;
        }
        let key = if pkg.architecture.is_empty() {
            pkg.package.clone()
        } else {
            format!("{}:{}", pkg.package, pkg.architecture)
        };
        pkgs.insert(key, pkg.clone());
    };
    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            store(&pkg, &mut pkgs);
            continue;
        }
        // Continuation lines (wrapped dependency lists) have no colon.
        let Some((k, v)) = trimmed.split_once(':') else {
            continue;
        };
        match k.trim() {
            "Name" => {
                pkg.package = v.trim().to_owned();
                pkg.version.clear();
                pkg.architecture.clear();
            }
            "Version" => pkg.version = v.trim().to_owned(),
            "Architecture" => pkg.architecture = v.trim().to_owned(),
            _ => {}
        }
    }
    store(&pkg, &mut pkgs);
    pkgs
}

#[async_trait]
impl Distro for Arch {
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
            names = installed.into_values().map(|pkg| pkg.package).collect();
        }
        names.sort();
        let args = ["-Sddp".to_owned()].into_iter().chain(names);
        let stdout = command_stdout("pacman", args).await?;
        for line in String::from_utf8_lossy(&stdout).lines() {
            let raw_url = line.trim();
            if raw_url.is_empty() {
                continue;
            }
            generate_hash_for_url(out, cache, raw_url).await?;
            // Each package is accompanied by its detached signature.
            generate_hash_for_url(out, cache, &format!("{raw_url}.sig")).await?;
        }
        Ok(())
    }

    async fn inspect_file(&self, spec: &FileSpec, opts: InspectOpts) -> Result<FileInfo, Error> {
        let mut inf = FileInfo::new(spec);
        let pkg = match &spec.pacman {
            Some(pkg) => {
                inf.is_package = true;
                pkg.clone()
            }
            None => {
                let Some(trimmed) = spec.basename.strip_suffix(SIGNATURE_SUFFIX) else {
                    return Ok(inf);
                };
                inf.is_aux = true;
                PacmanName::split(trimmed)?
            }
        };
        inf.package_name = Some(pkg.package.clone());
        if opts.check_installed {
            let installed = self.installed().await?;
            let key = if pkg.architecture.is_empty() {
                pkg.package.clone()
            } else {
                format!("{}:{}", pkg.package, pkg.architecture)
            };
            if let Some(inst) = installed.get(&key) {
                inf.installed = Some(inst.version == pkg.version);
            }
        }
        Ok(inf)
    }

    async fn install_packages(
        &self,
        cache: &Cache,
        packages: &[FileSpec],
        opts: InstallOpts,
    ) -> Result<(), Error> {
        if packages.is_empty() {
            return Ok(());
        }

        // Symlink packages and signatures into a scratch directory so the
        // tools see the original basenames.
        let scratch = tempfile::tempdir()?;
        for f in packages.iter().chain(opts.aux_files.iter()) {
            let blob = cache.blob_path(&f.sha256);
            let link = secure_join(scratch.path(), &f.basename)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&blob, &link)?;
            #[cfg(not(unix))]
            return Err(Error::NotImplemented);
        }

        info!(
            "running 'pacman-key --verify ...' with {} signatures",
            opts.aux_files.len()
        );
        // key: package basename, value: signature basename
        let mut signatures: HashMap<String, String> = HashMap::new();
        for f in &opts.aux_files {
            let Some(pkg_basename) = f.basename.strip_suffix(".sig") else {
                return Err(Error::InvalidFilename {
                    name: f.basename.clone(),
                    reason: "expected *.sig".to_owned(),
                });
            };
            signatures.insert(pkg_basename.to_owned(), f.basename.clone());
            let file = secure_join(scratch.path(), &f.basename)?;
            run_command("pacman-key", ["--verify".to_owned(), file.display().to_string()]).await?;
        }

        info!(
            "running 'pacman -Uv --noconfirm ...' with {} packages",
            packages.len()
        );
        let mut args = vec!["-Uv".to_owned(), "--noconfirm".to_owned()];
        for pkg in packages {
            if !signatures.contains_key(&pkg.basename) {
                return Err(Error::InvalidFilename {
                    name: pkg.basename.clone(),
                    reason: "no signature found for package".to_owned(),
                });
            }
            let file = secure_join(scratch.path(), &pkg.basename)?;
            args.push(file.display().to_string());
        }
        run_command("pacman", args).await
    }

    async fn generate_dockerfile(
        &self,
        dir: &Path,
        args: &DockerfileArgs,
        opts: DockerfileOpts,
    ) -> Result<(), Error> {
        if opts.generate_hash {
            args.write_to_file(&dir.join("Dockerfile.generate-hash"), DOCKERFILE_GENERATE_HASH_TMPL)?;
        }
        args.write_to_file(&dir.join("Dockerfile"), DOCKERFILE_TMPL)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_installed_paragraphs() {
        // Abbreviated `pacman -Qi` output.
        let input = "\
Name            : bash
Version         : 5.1.016-1
Description     : The GNU Bourne Again shell
Architecture    : x86_64
Depends On      : readline  libreadline.so=8-64  glibc  ncurses
Optional Deps   : bash-completion: for tab completion

Name            : ca-certificates
Version         : 20220905-1
Architecture    : any

";
        let got = parse_installed(input);
        assert_eq!(got.len(), 2);
        assert_eq!(got["bash:x86_64"].version, "5.1.016-1");
        assert_eq!(got["ca-certificates:any"].version, "20220905-1");
    }

    #[test]
    fn parse_installed_without_trailing_blank() {
        let input = "Name : foo\nVersion : 1-1\nArchitecture : any";
        let got = parse_installed(input);
        assert_eq!(got["foo:any"].version, "1-1");
    }

    #[tokio::test]
    async fn inspect_classifies_packages_and_signatures() {
        let sum = "35b1508eeee9c1dfba798c4c04304ef0f266990f936a51f165571edf53325cbc";
        let d = Arch::new();

        let sp = FileSpec::new(
            "c/ca-certificates/ca-certificates-20220905-1-any.pkg.tar.zst",
            sum,
        )
        .unwrap();
        let inf = d.inspect_file(&sp, InspectOpts::default()).await.unwrap();
        assert!(inf.is_package);
        assert!(!inf.is_aux);
        assert_eq!(inf.package_name.as_deref(), Some("ca-certificates"));

        let sp = FileSpec::new(
            "c/ca-certificates/ca-certificates-20220905-1-any.pkg.tar.zst.sig",
            sum,
        )
        .unwrap();
        let inf = d.inspect_file(&sp, InspectOpts::default()).await.unwrap();
        assert!(!inf.is_package);
        assert!(inf.is_aux);
        assert_eq!(inf.package_name.as_deref(), Some("ca-certificates"));
    }

    #[tokio::test]
    async fn install_requires_signatures() {
        let sum_a = "35b1508eeee9c1dfba798c4c04304ef0f266990f936a51f165571edf53325cbc";
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let d = Arch::new();
        let pkg = FileSpec::new("b/bash/bash-5.1.016-1-x86_64.pkg.tar.zst", sum_a).unwrap();
        let err = d
            .install_packages(&cache, &[pkg], InstallOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilename { .. }), "{err:?}");
    }
}
