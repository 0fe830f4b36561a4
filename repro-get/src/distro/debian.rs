//! The Debian and Ubuntu drivers.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::distro::{
    command_stdout, run_command, Distro, DockerfileArgs, DockerfileOpts, FileInfo, HashOpts, Info,
    InspectOpts, InstallOpts,
};
use crate::filename::DebName;
use crate::filespec::FileSpec;
use crate::{hashfile, Error};

const DOCKERFILE_GENERATE_HASH_TMPL: &str = r#"# syntax = docker/dockerfile:1.4
FROM {{.BaseImageOrig}} AS generate-hash
{{snippet "fetch-repro-get"}}
RUN apt-get update && apt-get install -y {{join .Packages " "}}
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

/// The `dpkg`/`apt` driver, covering both Debian and Ubuntu.
pub struct Debian {
    info: Info,
    installed: Mutex<Option<HashMap<String, DebName>>>,
}

impl Debian {
    /// Creates the Debian driver.
    pub fn new() -> Self {
        Self {
            info: Info {
                name: "debian".to_owned(),
                // HTTPS is not used by default in the apt-get ecosystem.
                default_providers: vec![
                    // deb.debian.org: multi-arch, ephemeral
                    "http://deb.debian.org/debian/{{.Name}}".to_owned(),
                    "http://deb.debian.org/debian-security/{{.Name}}".to_owned(),
                    // snapshot-cloudflare.debian.org: multi-arch, persistent, slow
                    "http://snapshot-cloudflare.debian.org/archive/debian/{{timeToDebianSnapshot .Epoch}}/{{.Name}}".to_owned(),
                    "http://snapshot-cloudflare.debian.org/archive/debian-security/{{timeToDebianSnapshot .Epoch}}/{{.Name}}".to_owned(),
                    // snapshot.debian.org: multi-arch, persistent, very slow
                    "http://snapshot.debian.org/archive/debian/{{timeToDebianSnapshot .Epoch}}/{{.Name}}".to_owned(),
                    "http://snapshot.debian.org/archive/debian-security/{{timeToDebianSnapshot .Epoch}}/{{.Name}}".to_owned(),
                    // archive.debian.org: multi-arch, persistent, EOL only
                    "http://archive.debian.org/debian/{{.Name}}".to_owned(),
                    "http://archive.debian.org/debian-security/{{.Name}}".to_owned(),
                ],
                experimental: false,
                cache_needed_for_generating_hash: false,
            },
            installed: Mutex::new(None),
        }
    }

    /// Creates the Ubuntu variant.
    pub fn new_ubuntu() -> Self {
        Self {
            info: Info {
                name: "ubuntu".to_owned(),
                default_providers: vec![
                    // multi-arch, ephemeral
                    "http://ports.ubuntu.com/{{.Name}}".to_owned(),
                    // multi-arch, persistent
                    "http://launchpad.net/ubuntu/+archive/primary/+files/{{.Basename}}".to_owned(),
                    // amd64 only, ephemeral
                    "http://archive.ubuntu.com/ubuntu/{{.Name}}".to_owned(),
                    // multi-arch, persistent, EOL only
                    "http://old-releases.ubuntu.com/ubuntu/{{.Name}}".to_owned(),
                ],
                experimental: false,
                cache_needed_for_generating_hash: false,
            },
            installed: Mutex::new(None),
        }
    }

    async fn installed(&self) -> Result<HashMap<String, DebName>, Error> {
        if let Some(m) = self.installed.lock().expect("poisoned").as_ref() {
            return Ok(m.clone());
        }
        let m = installed_packages().await?;
        *self.installed.lock().expect("poisoned") = Some(m.clone());
        Ok(m)
    }
}

impl Default for Debian {
    fn default() -> Self {
        Self::new()
    }
}

/// Queries the installed package set.
///
/// The map key is `package` or `package:architecture` when the architecture
/// is known.
pub async fn installed_packages() -> Result<HashMap<String, DebName>, Error> {
    let stdout = command_stdout(
        "dpkg-query",
        ["-f", "${Package},${Version},${Architecture}\n", "-W"],
    )
    .await?;
    parse_installed(&String::from_utf8_lossy(&stdout))
}

fn parse_installed(input: &str) -> Result<HashMap<String, DebName>, Error> {
    let mut pkgs = HashMap::new();
    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let fields: Vec<&str> = trimmed.splitn(3, ',').collect();
        let [package, version, architecture] = fields.as_slice() else {
            return Err(Error::InvalidFilename {
                name: line.to_owned(),
                reason: "expected 3 comma-separated fields".to_owned(),
            });
        };
        let pkg = DebName {
            package: (*package).to_owned(),
            version: (*version).to_owned(),
            architecture: (*architecture).to_owned(),
        };
        pkgs.insert(installed_key(&pkg.package, &pkg.architecture), pkg);
    }
    Ok(pkgs)
}

fn installed_key(package: &str, architecture: &str) -> String {
    if architecture.is_empty() {
        package.to_owned()
    } else {
        format!("{package}:{architecture}")
    }
}

fn generate_hash_from_control(out: &mut (dyn Write + Send), input: &str) -> Result<(), Error> {
    // key: package:architecture, value: newest version written so far
    let mut seen: HashMap<String, String> = HashMap::new();
    for para in paragraphs(input) {
        let Some(package) = para.get("Package") else {
            continue;
        };
        let version = para.get("Version").cloned().unwrap_or_default();
        let architecture = para.get("Architecture").map(String::as_str).unwrap_or("");
        let seen_key = format!("{package}:{architecture}");
        if let Some(prev) = seen.get(&seen_key) {
            if compare_versions(prev, &version) == Ordering::Greater {
                continue;
            }
        }
        seen.insert(seen_key, version);
        let Some(filename) = para.get("Filename").filter(|f| !f.is_empty()) else {
            warn!("no Filename found for package {package:?} (Hint: try 'apt-get update')");
            continue;
        };
        let Some(sha256) = para.get("SHA256").filter(|s| !s.is_empty()) else {
            warn!("no SHA256 found for package {package:?} (Hint: try 'apt-get update')");
            continue;
        };
        hashfile::write_line(out, sha256, filename)?;
    }
    Ok(())
}

/// Splits RFC 822-style control output into key/value paragraphs.
fn paragraphs(input: &str) -> Vec<HashMap<String, String>> {
    let mut out = Vec::new();
    let mut current: HashMap<String, String> = HashMap::new();
    let mut last_key: Option<String> = None;
    for line in input.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            last_key = None;
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // Continuation of the previous field.
            if let Some(k) = &last_key {
                if let Some(v) = current.get_mut(k) {
                    v.push('\n');
                    v.push_str(line.trim());
                }
            }
            continue;
        }
        if let Some((k, v)) = line.split_once(':') {
            current.insert(k.trim().to_owned(), v.trim().to_owned());
            last_key = Some(k.trim().to_owned());
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Compares two dpkg version strings (`[epoch:]upstream[-revision]`).
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a_epoch, a_rest) = split_epoch(a);
    let (b_epoch, b_rest) = split_epoch(b);
    if a_epoch != b_epoch {
        return a_epoch.cmp(&b_epoch);
    }
    let (a_upstream, a_revision) = split_revision(a_rest);
    let (b_upstream, b_revision) = split_revision(b_rest);
    match verrevcmp(a_upstream.as_bytes(), b_upstream.as_bytes()) {
        Ordering::Equal => verrevcmp(a_revision.as_bytes(), b_revision.as_bytes()),
        other => other,
    }
}

fn split_epoch(v: &str) -> (u64, &str) {
    match v.split_once(':') {
        Some((epoch, rest)) => (epoch.parse().unwrap_or(0), rest),
        None => (0, v),
    }
}

fn split_revision(v: &str) -> (&str, &str) {
    match v.rsplit_once('-') {
        Some((upstream, revision)) => (upstream, revision),
        None => (v, "0"),
    }
}

// Character weight for verrevcmp: '~' sorts before everything including
// the end of the string, letters before all other non-digits.
fn char_order(c: u8) -> i32 {
    if c == b'~' {
        -1
    } else if c.is_ascii_alphabetic() {
        i32::from(c)
    } else {
        i32::from(c) + 256
    }
}

fn verrevcmp(mut a: &[u8], mut b: &[u8]) -> Ordering {
    while !a.is_empty() || !b.is_empty() {
        while a.first().is_some_and(|c| !c.is_ascii_digit())
            || b.first().is_some_and(|c| !c.is_ascii_digit())
        {
            let ac = a.first().map_or(0, |&c| char_order(c));
            let bc = b.first().map_or(0, |&c| char_order(c));
            if ac != bc {
                return ac.cmp(&bc);
            }
            a = &a[1..];
            b = &b[1..];
        }
        while a.first() == Some(&b'0') {
            a = &a[1..];
        }
        while b.first() == Some(&b'0') {
            b = &b[1..];
        }
        let mut first_diff = Ordering::Equal;
        while a.first().is_some_and(u8::is_ascii_digit) && b.first().is_some_and(u8::is_ascii_digit)
        {
            if first_diff == Ordering::Equal {
                first_diff = a[0].cmp(&b[0]);
            }
            a = &a[1..];
            b = &b[1..];
        }
        if a.first().is_some_and(u8::is_ascii_digit) {
            return Ordering::Greater;
        }
        if b.first().is_some_and(u8::is_ascii_digit) {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl Distro for Debian {
    fn info(&self) -> &Info {
        &self.info
    }

    async fn generate_hash(
        &self,
        out: &mut (dyn Write + Send),
        opts: HashOpts<'_>,
    ) -> Result<(), Error> {
        let mut names = opts.filter_by_name;
        if names.is_empty() {
            let installed = installed_packages().await?;
            if installed.is_empty() {
                return Err(Error::NothingInstalled);
            }
            names = installed.keys().cloned().collect();
        }
        names.sort();

        // /var/lib/dpkg/available is only updated by dselect, so shell out
        // to `apt-cache show PKGS...`.
        let args = std::iter::once("show".to_owned()).chain(names);
        let stdout = command_stdout("apt-cache", args).await?;
        generate_hash_from_control(out, &String::from_utf8_lossy(&stdout))
    }

    async fn inspect_file(&self, spec: &FileSpec, opts: InspectOpts) -> Result<FileInfo, Error> {
        let mut inf = FileInfo::new(spec);
        let Some(deb) = &spec.deb else {
            return Ok(inf);
        };
        inf.is_package = true;
        inf.package_name = Some(deb.package.clone());
        if opts.check_installed {
            let installed = self.installed().await?;
            let key = installed_key(&deb.package, &deb.architecture);
            if let Some(inst) = installed.get(&key) {
                inf.installed = Some(inst.version == deb.version);
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
        info!("running 'dpkg -i ...' with {} packages", packages.len());
        let mut args = vec!["-i".to_owned()];
        for pkg in packages {
            args.push(cache.blob_path(&pkg.sha256).display().to_string());
        }
        run_command("dpkg", args).await
    }

    async fn generate_dockerfile(
        &self,
        dir: &Path,
        args: &DockerfileArgs,
        opts: DockerfileOpts,
    ) -> Result<(), Error> {
        if self.info.name != "debian" {
            return Err(Error::NotImplemented);
        }
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
    fn parse_installed_lines() {
        let input = "hello,2.10-2,amd64\nca-certificates,20210119,all\n";
        let got = parse_installed(input).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got["hello:amd64"].version, "2.10-2");
        assert_eq!(got["ca-certificates:all"].package, "ca-certificates");
    }

    #[test]
    fn parse_installed_rejects_malformed_lines() {
        assert!(parse_installed("hello\n").is_err());
    }

    #[test]
    fn version_comparison() {
        use Ordering::*;
        assert_eq!(compare_versions("2.10-2", "2.10-2"), Equal);
        assert_eq!(compare_versions("2.10-2", "2.10-1"), Greater);
        assert_eq!(compare_versions("2.10-2", "2.9-1"), Greater);
        assert_eq!(compare_versions("1:1.0-1", "2.0-1"), Greater);
        assert_eq!(compare_versions("1.0~rc1-1", "1.0-1"), Less);
        assert_eq!(compare_versions("1.0-1", "1.0-1+b1"), Less);
        assert_eq!(compare_versions("10.0-1", "9.0-1"), Greater);
        assert_eq!(compare_versions("1.0", "1.0-1"), Less);
        assert_eq!(compare_versions("1.2a-1", "1.2-1"), Greater);
    }

    #[test]
    fn control_paragraphs() {
        let input = "Package: hello\nVersion: 2.10-2\nDescription: example\n continuation\n\nPackage: bye\n";
        let paras = paragraphs(input);
        assert_eq!(paras.len(), 2);
        assert_eq!(paras[0]["Package"], "hello");
        assert!(paras[0]["Description"].contains("continuation"));
        assert_eq!(paras[1]["Package"], "bye");
    }

    #[test]
    fn generate_hash_picks_newest_version() {
        let input = "\
Package: hello
Architecture: amd64
Version: 2.10-2
Filename: pool/main/h/hello/hello_2.10-2_amd64.deb
SHA256: 35b1508eeee9c1dfba798c4c04304ef0f266990f936a51f165571edf53325cbc

Package: hello
Architecture: amd64
Version: 2.10-1
Filename: pool/main/h/hello/hello_2.10-1_amd64.deb
SHA256: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa
";
        let mut out: Vec<u8> = Vec::new();
        generate_hash_from_control(&mut out, input).unwrap();
        let text = String::from_utf8(out).unwrap();
        // The first (newest) paragraph is written; the older one is skipped.
        assert!(text.contains("hello_2.10-2_amd64.deb"));
        assert!(!text.contains("hello_2.10-1_amd64.deb"));
    }

    #[test]
    fn generate_hash_warns_on_missing_fields() {
        let input = "Package: hello\nArchitecture: amd64\nVersion: 2.10-2\n";
        let mut out: Vec<u8> = Vec::new();
        generate_hash_from_control(&mut out, input).unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn inspect_classifies_deb_files() {
        let sum = "35b1508eeee9c1dfba798c4c04304ef0f266990f936a51f165571edf53325cbc";
        let d = Debian::new();
        let sp = FileSpec::new("pool/main/h/hello/hello_2.10-2_amd64.deb", sum).unwrap();
        let inf = d.inspect_file(&sp, InspectOpts::default()).await.unwrap();
        assert!(inf.is_package);
        assert!(!inf.is_aux);
        assert_eq!(inf.package_name.as_deref(), Some("hello"));

        // An RPM is not relevant to this driver.
        let sp = FileSpec::new("x/foo-1.0-1.x86_64.rpm", sum).unwrap();
        let inf = d.inspect_file(&sp, InspectOpts::default()).await.unwrap();
        assert!(!inf.is_package);
        assert!(!inf.is_aux);
    }
}
