//! The download orchestrator: per-file fallback over ordered providers.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::cache::Cache;
use crate::distro::{Distro, FileInfo, InspectOpts};
use crate::filespec::FileSpec;
use crate::urlopener::redacted;
use crate::Error;

/// The outcome of a [`download`] run.
#[derive(Debug, Default)]
pub struct DownloadResult {
    /// Installable packages, including files that were already cached.
    pub packages_to_install: Vec<FileSpec>,
    /// Auxiliary files needed for installation (e.g. detached signatures).
    pub aux_files_for_install: Vec<FileSpec>,
}

impl DownloadResult {
    fn keep(&mut self, inf: &FileInfo) {
        if inf.is_package {
            self.packages_to_install.push(inf.spec.clone());
        }
        if inf.is_aux {
            self.aux_files_for_install.push(inf.spec.clone());
        }
    }
}

/// Options for [`download`].
#[derive(Debug, Clone, Default)]
pub struct DownloadOpts {
    /// Providers tried in order. Falls back to the driver's defaults when
    /// empty.
    pub providers: Vec<String>,
    /// Skip files whose exact package version is already installed.
    pub skip_installed: bool,
}

/// Acquires every relevant file into the cache, trying providers in order.
///
/// Specs are processed in lexicographic order of their filenames.
/// Inspection failures and cache-check failures are demoted to warnings;
/// provider failures are tolerated until the last provider.
pub async fn download(
    distro: &dyn Distro,
    cache: &Cache,
    file_specs: &BTreeMap<String, FileSpec>,
    opts: &DownloadOpts,
) -> Result<DownloadResult, Error> {
    let providers = if opts.providers.is_empty() {
        distro.info().default_providers.clone()
    } else {
        opts.providers.clone()
    };
    if providers.is_empty() {
        return Err(Error::NoProviders);
    }

    let total = file_specs.len();
    let mut res = DownloadResult::default();
    for (i, sp) in file_specs.values().enumerate() {
        let progress = format!("({:03}/{:03}) {}", i + 1, total, sp.basename);
        let inf = match distro.inspect_file(sp, InspectOpts::default()).await {
            Ok(inf) => inf,
            Err(e) => {
                warn!("failed to inspect {:?}: {e}", sp.name);
                continue;
            }
        };
        if !inf.is_package && !inf.is_aux {
            info!("{progress} Not needed");
            continue;
        }
        if opts.skip_installed {
            match distro
                .inspect_file(
                    sp,
                    InspectOpts {
                        check_installed: true,
                    },
                )
                .await
            {
                Ok(deep) => {
                    if deep.installed == Some(true) {
                        info!("{progress} Already installed");
                        continue;
                    }
                }
                Err(e) => {
                    warn!("failed to check whether installed: {:?}: {e}", sp.basename);
                }
            }
        }
        let cached = match cache.cached(&sp.sha256) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(
                    "failed to check whether {} ({:?}) is cached: {e}",
                    sp.sha256, sp.basename
                );
                false
            }
        };
        if cached {
            info!("{progress} Cached");
            res.keep(&inf);
            continue;
        }
        let last = providers.len() - 1;
        for (j, provider) in providers.iter().enumerate() {
            let url = sp.url(provider)?;
            info!("{progress} Downloading from {}", redacted(&url));
            match cache.ensure(&url, &sp.sha256, None).await {
                Ok(()) => break,
                Err(e) if j != last => {
                    warn!(
                        "failed to download {} ({}), trying the next provider: {e}",
                        sp.basename,
                        redacted(&url)
                    );
                }
                Err(e) => return Err(e),
            }
        }
        res.keep(&inf);
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Sha256Digest;
    use crate::distro::{
        DockerfileArgs, DockerfileOpts, HashOpts, Info, InstallOpts,
    };
    use async_trait::async_trait;
    use std::io::Write;
    use std::path::Path;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Treats every file as a package; optionally reports it installed.
    struct FixtureDistro {
        info: Info,
        installed: bool,
    }

    impl FixtureDistro {
        fn new() -> Self {
            Self {
                info: Info {
                    name: "fixture".to_owned(),
                    default_providers: Vec::new(),
                    experimental: false,
                    cache_needed_for_generating_hash: false,
                },
                installed: false,
            }
        }
    }

    #[async_trait]
    impl Distro for FixtureDistro {
        fn info(&self) -> &Info {
            &self.info
        }

        async fn generate_hash(
            &self,
            _out: &mut (dyn Write + Send),
            _opts: HashOpts<'_>,
        ) -> Result<(), Error> {
            Err(Error::NotImplemented)
        }

        async fn inspect_file(
            &self,
            spec: &FileSpec,
            opts: InspectOpts,
        ) -> Result<FileInfo, Error> {
            Ok(FileInfo {
                spec: spec.clone(),
                is_package: true,
                is_aux: false,
                package_name: Some(spec.basename.clone()),
                installed: opts.check_installed.then_some(self.installed),
            })
        }

        async fn install_packages(
            &self,
            _cache: &Cache,
            _packages: &[FileSpec],
            _opts: InstallOpts,
        ) -> Result<(), Error> {
            Err(Error::NotImplemented)
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

    fn spec_map(name: &str, bytes: &[u8]) -> (BTreeMap<String, FileSpec>, Sha256Digest) {
        let sha256 = Sha256Digest::from_bytes(bytes);
        let sp = FileSpec::new(name, sha256.as_hex()).unwrap();
        let mut specs = BTreeMap::new();
        specs.insert(name.to_owned(), sp);
        (specs, sha256)
    }

    async fn serve(server: &MockServer, sha256: &Sha256Digest, body: &[u8], status: u16) {
        Mock::given(method("GET"))
            .and(path(format!("/blobs/sha256/{sha256}")))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body.to_vec()))
            .mount(server)
            .await;
    }

    fn provider_of(server: &MockServer) -> String {
        format!("{}/blobs/sha256/{{{{.SHA256}}}}", server.uri())
    }

    #[tokio::test]
    async fn fetches_verifies_and_classifies() {
        let server = MockServer::start().await;
        let (specs, sha256) = spec_map("foo", b"blob-foo");
        serve(&server, &sha256, b"blob-foo", 200).await;

        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let opts = DownloadOpts {
            providers: vec![provider_of(&server)],
            skip_installed: false,
        };
        let res = download(&FixtureDistro::new(), &cache, &specs, &opts)
            .await
            .unwrap();
        assert_eq!(res.packages_to_install.len(), 1);
        assert_eq!(res.packages_to_install[0].basename, "foo");
        assert!(res.aux_files_for_install.is_empty());
        let bytes = std::fs::read(cache.blob_path(&sha256)).unwrap();
        assert_eq!(bytes, b"blob-foo");
    }

    #[tokio::test]
    async fn mismatch_on_terminal_provider_is_fatal() {
        let server = MockServer::start().await;
        let (specs, sha256) = spec_map("foo", b"blob-foo");
        serve(&server, &sha256, b"tampered", 200).await;

        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let opts = DownloadOpts {
            providers: vec![provider_of(&server)],
            skip_installed: false,
        };
        let err = download(&FixtureDistro::new(), &cache, &specs, &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DigestMismatch { .. }), "{err:?}");
        assert!(!cache.cached(&sha256).unwrap());
    }

    #[tokio::test]
    async fn falls_back_to_next_provider() {
        let broken = MockServer::start().await;
        let healthy = MockServer::start().await;
        let (specs, sha256) = spec_map("foo", b"blob-foo");
        serve(&broken, &sha256, b"", 500).await;
        serve(&healthy, &sha256, b"blob-foo", 200).await;

        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let opts = DownloadOpts {
            providers: vec![provider_of(&broken), provider_of(&healthy)],
            skip_installed: false,
        };
        let res = download(&FixtureDistro::new(), &cache, &specs, &opts)
            .await
            .unwrap();
        assert_eq!(res.packages_to_install.len(), 1);
        assert!(cache.cached(&sha256).unwrap());
    }

    #[tokio::test]
    async fn cached_blob_skips_network() {
        let (specs, sha256) = spec_map("foo", b"blob-foo");
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let imported = cache.import_with_reader(&b"blob-foo"[..]).await.unwrap();
        assert_eq!(imported, sha256);

        // The server fails every request and asserts it is never contacted.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let opts = DownloadOpts {
            providers: vec![provider_of(&server)],
            skip_installed: false,
        };
        let res = download(&FixtureDistro::new(), &cache, &specs, &opts)
            .await
            .unwrap();
        assert_eq!(res.packages_to_install.len(), 1);
    }

    #[tokio::test]
    async fn irrelevant_files_are_skipped() {
        use crate::distro::debian::Debian;
        // An RPM means nothing to the Debian driver, so no download happens.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let (specs, sha256) = spec_map("x/foo-1.0-1.x86_64.rpm", b"blob-rpm");
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let opts = DownloadOpts {
            providers: vec![provider_of(&server)],
            skip_installed: false,
        };
        let res = download(&Debian::new(), &cache, &specs, &opts).await.unwrap();
        assert!(res.packages_to_install.is_empty());
        assert!(!cache.cached(&sha256).unwrap());
    }

    #[tokio::test]
    async fn skip_installed_consults_driver() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let (specs, _) = spec_map("foo", b"blob-foo");
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let mut distro = FixtureDistro::new();
        distro.installed = true;
        let opts = DownloadOpts {
            providers: vec![provider_of(&server)],
            skip_installed: true,
        };
        let res = download(&distro, &cache, &specs, &opts).await.unwrap();
        assert!(res.packages_to_install.is_empty());
    }

    #[tokio::test]
    async fn missing_providers_are_fatal() {
        let (specs, _) = spec_map("foo", b"blob-foo");
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let err = download(
            &FixtureDistro::new(),
            &cache,
            &specs,
            &DownloadOpts::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NoProviders));
    }
}
