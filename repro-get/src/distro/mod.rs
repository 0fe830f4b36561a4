//! Distro drivers: hash generation, file inspection, and package
//! installation for each supported packaging ecosystem.

use std::ffi::OsStr;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::filespec::FileSpec;
use crate::template::{self, Value};
use crate::{osrelease, Error};

pub mod alpine;
pub mod arch;
pub mod debian;
pub mod fedora;
pub mod none;

/// Static information about a distro driver.
#[derive(Debug, Clone, Serialize)]
pub struct Info {
    /// Driver name, e.g. `"debian"`.
    #[serde(rename = "Name")]
    pub name: String,
    /// Providers used when the caller configures none.
    #[serde(rename = "DefaultProviders")]
    pub default_providers: Vec<String>,
    /// Whether the driver is still experimental.
    #[serde(rename = "Experimental")]
    pub experimental: bool,
    /// Whether `generate_hash` needs a cache to learn digests.
    #[serde(skip)]
    pub cache_needed_for_generating_hash: bool,
}

/// The result of inspecting one file specification.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// The inspected spec.
    pub spec: FileSpec,
    /// Whether the file is an installable package for this distro.
    pub is_package: bool,
    /// Whether the file is an auxiliary file needed for installation
    /// (e.g. a detached signature).
    pub is_aux: bool,
    /// The package name, when the file decodes to one.
    pub package_name: Option<String>,
    /// Whether this exact package version is installed. Only populated when
    /// requested and when the installed set contains the package.
    pub installed: Option<bool>,
}

impl FileInfo {
    fn new(spec: &FileSpec) -> Self {
        Self {
            spec: spec.clone(),
            is_package: false,
            is_aux: false,
            package_name: None,
            installed: None,
        }
    }
}

/// Options for [`Distro::inspect_file`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InspectOpts {
    /// Also consult the (memoized) set of installed packages. Can be slow
    /// on first use.
    pub check_installed: bool,
}

/// Options for [`Distro::generate_hash`].
#[derive(Default)]
pub struct HashOpts<'a> {
    /// Restrict generation to these package names. No filter when empty.
    pub filter_by_name: Vec<String>,
    /// Cache used to learn digests; required by the drivers whose
    /// [`Info::cache_needed_for_generating_hash`] is set.
    pub cache: Option<&'a Cache>,
}

/// Options for [`Distro::install_packages`].
#[derive(Debug, Default)]
pub struct InstallOpts {
    /// Auxiliary files fetched alongside the packages.
    pub aux_files: Vec<FileSpec>,
}

/// Options for [`Distro::generate_dockerfile`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerfileOpts {
    /// Also generate the hash-generation Dockerfile.
    pub generate_hash: bool,
}

/// Values bound into the Dockerfile templates.
#[derive(Debug, Clone, Default)]
pub struct DockerfileArgs {
    /// Base image pinned by digest.
    pub base_image: String,
    /// Base image as the user specified it.
    pub base_image_orig: String,
    /// Packages to install in the generated image.
    pub packages: Vec<String>,
    /// OCI architecture string, e.g. `"amd64"` or `"arm-v7"`.
    pub oci_arch_dash_variant: String,
    /// Providers baked into the generated image.
    pub providers: Vec<String>,
    /// Version of this tool, without the `v` prefix.
    pub version: String,
}

/// Literal snippet that places the tool into an image being built.
const FETCH_REPRO_GET_SNIPPET: &str =
    "COPY --chmod=0755 repro-get.linux-* /usr/local/bin/repro-get";

impl DockerfileArgs {
    fn lookup(&self, name: &str) -> Option<Value> {
        match name {
            "BaseImage" => Some(Value::Str(self.base_image.clone())),
            "BaseImageOrig" => Some(Value::Str(self.base_image_orig.clone())),
            "Packages" => Some(Value::List(self.packages.clone())),
            "OCIArchDashVariant" => Some(Value::Str(self.oci_arch_dash_variant.clone())),
            "Providers" => Some(Value::List(self.providers.clone())),
            "Version" => Some(Value::Str(self.version.clone())),
            _ => None,
        }
    }

    /// Renders `tmpl` against these arguments and writes it to `path`.
    pub fn write_to_file(&self, path: &Path, tmpl: &str) -> Result<(), Error> {
        info!("generating {:?}", path.display().to_string());
        let body = template::expand(
            tmpl,
            &|name| self.lookup(name),
            &[("fetch-repro-get", FETCH_REPRO_GET_SNIPPET)],
        )?;
        std::fs::write(path, body)?;
        Ok(())
    }
}

/// A distro driver.
#[async_trait]
pub trait Distro: Send + Sync {
    /// Returns the driver info.
    fn info(&self) -> &Info;

    /// Writes `SHA256SUMS` lines for the installed (or filtered) package
    /// set.
    async fn generate_hash(
        &self,
        out: &mut (dyn Write + Send),
        opts: HashOpts<'_>,
    ) -> Result<(), Error>;

    /// Inspects a file specification.
    async fn inspect_file(&self, spec: &FileSpec, opts: InspectOpts) -> Result<FileInfo, Error>;

    /// Installs the given packages. All blobs must already be cached.
    async fn install_packages(
        &self,
        cache: &Cache,
        packages: &[FileSpec],
        opts: InstallOpts,
    ) -> Result<(), Error>;

    /// Generates Dockerfiles for building images pinned by this tool.
    async fn generate_dockerfile(
        &self,
        dir: &Path,
        args: &DockerfileArgs,
        opts: DockerfileOpts,
    ) -> Result<(), Error>;
}

/// Names of the recognized distro drivers, sorted.
pub fn known_names() -> &'static [&'static str] {
    &["alpine", "arch", "debian", "fedora", "none", "ubuntu"]
}

/// Instantiates a driver by name.
pub fn by_name(name: &str) -> Option<Box<dyn Distro>> {
    match name {
        "alpine" => Some(Box::new(alpine::Alpine::new())),
        "arch" => Some(Box::new(arch::Arch::new())),
        "debian" => Some(Box::new(debian::Debian::new())),
        "fedora" => Some(Box::new(fedora::Fedora::new())),
        "none" => Some(Box::new(none::Noop::new())),
        "ubuntu" => Some(Box::new(debian::Debian::new_ubuntu())),
        _ => None,
    }
}

/// Resolves a driver by name, autodetecting from `/etc/os-release` when the
/// name is empty. Unsupported detected distros fall back to `none`.
pub fn resolve(name: &str) -> Result<Box<dyn Distro>, Error> {
    let name = if name.is_empty() {
        let detected = osrelease::distro_id();
        if known_names().contains(&detected.as_str()) {
            detected
        } else {
            debug!("unsupported distro {detected:?}");
            "none".to_owned()
        }
    } else {
        name.to_owned()
    };
    let driver = by_name(&name).ok_or_else(|| Error::UnknownDistro {
        name: name.clone(),
        known: known_names().to_vec(),
    })?;
    let info = driver.info();
    debug!("using distro driver {:?}", info.name);
    if info.experimental {
        warn!("distro driver {:?} is experimental", info.name);
    }
    Ok(driver)
}

/// Returns the OCI architecture string for the current machine, e.g.
/// `"amd64"`, `"arm64"`, or `"arm-v7"`.
pub fn oci_arch_dash_variant() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        // TODO: support v6
        "arm" => "arm-v7",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

/// Runs a program with inherited stdio; non-zero exit is fatal.
pub(crate) async fn run_command<I, S>(program: &str, args: I) -> Result<(), Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args).kill_on_drop(true);
    debug!("running {cmd:?}");
    let status = cmd.status().await?;
    if !status.success() {
        return Err(Error::Command {
            program: program.to_owned(),
            status,
        });
    }
    Ok(())
}

/// Runs a program capturing stdout, with stderr passed through; non-zero
/// exit is fatal.
pub(crate) async fn command_stdout<I, S>(program: &str, args: I) -> Result<Vec<u8>, Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    debug!("running {cmd:?}");
    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(Error::Command {
            program: program.to_owned(),
            status: output.status,
        });
    }
    Ok(output.stdout)
}
