//! The content-addressed blob cache.
//!
//! File name convention under the cache root:
//!
//! - `blobs/sha256/.download-*.tmp` / `.import-*.tmp`: in-flight files
//! - `blobs/sha256/<SHA256>`: verified blobs
//! - `metadata/sha256/<SHA256>`: metadata of the blob (optional)
//! - `digests/by-url-sha256/<SHA256-OF-URL>`: digest of the blob fetched
//!   from that URL (optional; a URL is not always unique)
//!
//! A file that exists at `blobs/sha256/<d>` has already been verified to
//! hash to `d`; blobs are never mutated after the atomic rename that
//! publishes them.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, warn};
use url::Url;

use crate::digest::Sha256Digest;
use crate::paths::secure_join;
use crate::urlopener::{redacted, UrlOpener};
use crate::Error;

/// Relative path of the blob directory under the cache root.
pub const BLOBS_SHA256_REL_PATH: &str = "blobs/sha256";
/// Relative path of the metadata directory under the cache root.
pub const METADATA_SHA256_REL_PATH: &str = "metadata/sha256";
/// Relative path of the reverse-URL directory under the cache root.
pub const REVERSE_URL_REL_PATH: &str = "digests/by-url-sha256";

/// Advisory metadata stored alongside a blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Original basename of the blob. A single path component.
    #[serde(rename = "Basename")]
    pub basename: String,
}

/// Validates that the metadata basename is a bare path component.
pub fn validate_metadata(m: &Metadata) -> Result<(), Error> {
    let b = &m.basename;
    if b.is_empty() || b == "." || b == ".." || b.contains('/') || b.contains('\\') {
        return Err(Error::InvalidMetadata(b.clone()));
    }
    Ok(())
}

/// The content-addressed blob cache.
pub struct Cache {
    dir: PathBuf,
    opener: UrlOpener,
}

impl Cache {
    /// Opens (creating if needed) a cache rooted at `dir`.
    ///
    /// The three sub-roots are created with permissions `0755`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        if std::path::MAIN_SEPARATOR != '/' {
            return Err(Error::Io(std::io::Error::other(format!(
                "expected the path separator to be '/', got {:?}",
                std::path::MAIN_SEPARATOR
            ))));
        }
        let dir = dir.into();
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o755);
        }
        builder.create(&dir)?;
        for sub in [
            BLOBS_SHA256_REL_PATH,
            METADATA_SHA256_REL_PATH,
            REVERSE_URL_REL_PATH,
        ] {
            builder.create(dir.join(sub))?;
        }
        Ok(Self {
            dir,
            opener: UrlOpener::new(),
        })
    }

    /// Returns the cache root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the absolute path a blob with this digest would live at.
    ///
    /// The path may not exist; if it does, its digest has already been
    /// verified.
    pub fn blob_path(&self, sha256: &Sha256Digest) -> PathBuf {
        self.dir.join(BLOBS_SHA256_REL_PATH).join(sha256.as_hex())
    }

    fn metadata_path(&self, sha256: &Sha256Digest) -> PathBuf {
        self.dir
            .join(METADATA_SHA256_REL_PATH)
            .join(sha256.as_hex())
    }

    fn reverse_url_path(&self, url: &Url) -> PathBuf {
        let key = Sha256Digest::from_bytes(redacted(url).as_bytes());
        self.dir.join(REVERSE_URL_REL_PATH).join(key.as_hex())
    }

    /// Whether a verified blob with this digest is present.
    pub fn cached(&self, sha256: &Sha256Digest) -> Result<bool, Error> {
        match std::fs::metadata(self.blob_path(sha256)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotent verified download.
    ///
    /// If the blob already exists, returns without touching the network.
    /// Otherwise streams the URL into a hidden temp file while hashing,
    /// verifies the digest, fsyncs, and atomically renames the temp file to
    /// its blob path. Concurrent calls for the same digest are safe: both
    /// writers produce identical contents, renames are atomic, and the
    /// loser's temp file is removed on drop. A cancelled call leaves no
    /// temp file behind for the same reason.
    pub async fn ensure(
        &self,
        url: &Url,
        sha256: &Sha256Digest,
        metadata: Option<&Metadata>,
    ) -> Result<(), Error> {
        if let Some(m) = metadata {
            validate_metadata(m)?;
        }
        let blob = self.blob_path(sha256);
        match std::fs::metadata(&blob) {
            // The digest was verified on the initial caching.
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let (mut stream, size) = self
            .opener
            .open(url, Some(sha256))
            .await
            .map_err(|e| Error::OpenUrl {
                url: redacted(url),
                source: Box::new(e),
            })?;
        debug!(url = %redacted(url), size = ?size, "downloading");

        let mut tmp = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".tmp")
            .tempfile_in(self.dir.join(BLOBS_SHA256_REL_PATH))?;
        let mut hasher = Sha256::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            tmp.as_file_mut().write_all(&chunk)?;
            hasher.update(&chunk);
        }
        let actual = hex::encode(hasher.finalize());
        if actual != sha256.as_hex() {
            return Err(Error::DigestMismatch {
                expected: sha256.as_hex().to_owned(),
                actual,
                url: redacted(url),
            });
        }

        tmp.as_file().sync_all()?;
        tmp.persist(&blob).map_err(|e| Error::Io(e.error))?;
        self.write_metadata_files(sha256, Some(url), metadata)?;
        Ok(())
    }

    /// Imports a byte stream, returning its computed digest.
    ///
    /// Does not create the sidecar files.
    pub async fn import_with_reader<R>(&self, mut reader: R) -> Result<Sha256Digest, Error>
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut tmp = tempfile::Builder::new()
            .prefix(".import-")
            .suffix(".tmp")
            .tempfile_in(self.dir.join(BLOBS_SHA256_REL_PATH))?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            tmp.as_file_mut().write_all(&buf[..n])?;
            hasher.update(&buf[..n]);
        }
        let sha256 = Sha256Digest::parse(&hex::encode(hasher.finalize()))?;
        let blob = self.blob_path(&sha256);
        tmp.as_file().sync_all()?;
        tmp.persist(&blob).map_err(|e| Error::Io(e.error))?;
        Ok(sha256)
    }

    /// Imports from a URL with no pre-known digest, then writes the sidecar
    /// files.
    pub async fn import_with_url(
        &self,
        url: &Url,
        metadata: Option<&Metadata>,
    ) -> Result<Sha256Digest, Error> {
        if let Some(m) = metadata {
            validate_metadata(m)?;
        }
        let (stream, _) = self
            .opener
            .open(url, None)
            .await
            .map_err(|e| Error::OpenUrl {
                url: redacted(url),
                source: Box::new(e),
            })?;
        let reader = tokio_util::io::StreamReader::new(
            stream.map(|chunk| chunk.map_err(std::io::Error::other)),
        );
        let sha256 = self.import_with_reader(reader).await?;
        self.write_metadata_files(&sha256, Some(url), metadata)?;
        Ok(sha256)
    }

    /// Imports local files, or directories recursively, and returns the
    /// `basename -> digest` map.
    ///
    /// Two inputs sharing a basename but hashing differently conflict
    /// fatally.
    pub async fn import<P: AsRef<Path>>(
        &self,
        dir_or_files: &[P],
    ) -> Result<BTreeMap<String, Sha256Digest>, Error> {
        let mut out = BTreeMap::new();
        for dir_or_file in dir_or_files {
            let dir_or_file = dir_or_file.as_ref();
            if std::fs::metadata(dir_or_file)?.is_dir() {
                self.import_dir(dir_or_file, &mut out).await?;
            } else {
                let sha256 = self.import_file(dir_or_file).await?;
                let basename = dir_or_file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| Error::UnsafePath(dir_or_file.display().to_string()))?;
                record_import(&mut out, basename, sha256)?;
            }
        }
        Ok(out)
    }

    async fn import_dir(
        &self,
        dir: &Path,
        out: &mut BTreeMap<String, Sha256Digest>,
    ) -> Result<(), Error> {
        let mut pending = vec![dir.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries: Vec<_> =
                std::fs::read_dir(&dir)?.collect::<Result<_, std::io::Error>>()?;
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let basename = entry.file_name().to_string_lossy().into_owned();
                let name_full = secure_join(&dir, &basename)?;
                if entry.file_type()?.is_dir() {
                    pending.push(name_full);
                } else {
                    let sha256 = self.import_file(&name_full).await?;
                    record_import(out, basename, sha256)?;
                }
            }
        }
        Ok(())
    }

    async fn import_file(&self, path: &Path) -> Result<Sha256Digest, Error> {
        let abs = std::path::absolute(path)?;
        let url = Url::from_file_path(&abs)
            .map_err(|_| Error::InvalidUrl(abs.display().to_string()))?;
        let basename = abs
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::UnsafePath(abs.display().to_string()))?;
        let metadata = Metadata { basename };
        self.import_with_url(&url, Some(&metadata)).await
    }

    /// Writes the metadata and reverse-URL sidecar files.
    ///
    /// A URL is not unique; existing files are overwritten.
    fn write_metadata_files(
        &self,
        sha256: &Sha256Digest,
        url: Option<&Url>,
        metadata: Option<&Metadata>,
    ) -> Result<(), Error> {
        if let Some(m) = metadata {
            let json = serde_json::to_vec(m)?;
            std::fs::write(self.metadata_path(sha256), json)?;
        }
        if let Some(url) = url {
            std::fs::write(self.reverse_url_path(url), sha256.prefixed())?;
        }
        Ok(())
    }

    /// Returns the metadata recorded for a blob. Not always available.
    pub fn metadata_by_sha256(&self, sha256: &Sha256Digest) -> Result<Metadata, Error> {
        let bytes = std::fs::read(self.metadata_path(sha256))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Returns the digest recorded for an origin URL. Not always available.
    ///
    /// Only meaningful when the URL is known to be unique.
    pub fn sha256_by_origin_url(&self, url: &Url) -> Result<Sha256Digest, Error> {
        let bytes = std::fs::read(self.reverse_url_path(url))?;
        let s = String::from_utf8_lossy(&bytes);
        Sha256Digest::parse_prefixed(s.trim())
    }

    /// Copies every blob into `dir` under its recorded basename and returns
    /// the `basename -> digest` map of the files actually exported.
    ///
    /// Blobs without metadata fall back to `UNKNOWN-<digest>`. Existing
    /// destination files are never overwritten; they are logged and
    /// skipped.
    pub fn export(&self, dir: impl AsRef<Path>) -> Result<BTreeMap<String, Sha256Digest>, Error> {
        let dir = dir.as_ref();
        let blobs_dir = self.dir.join(BLOBS_SHA256_REL_PATH);
        let mut entries: Vec<_> =
            std::fs::read_dir(&blobs_dir)?.collect::<Result<_, std::io::Error>>()?;
        entries.sort_by_key(|e| e.file_name());
        std::fs::create_dir_all(dir)?;

        let mut exported = BTreeMap::new();
        for entry in entries {
            if entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name.ends_with(".tmp") {
                continue;
            }
            let sha256 = match Sha256Digest::parse(&name) {
                Ok(d) => d,
                Err(e) => {
                    error!("invalid sha256 {name:?}: {e}");
                    continue;
                }
            };
            let basename = match self.metadata_by_sha256(&sha256) {
                Ok(m) if !m.basename.is_empty() => {
                    m.basename.rsplit('/').next().unwrap_or(&m.basename).to_owned()
                }
                Ok(_) | Err(_) => {
                    warn!("failed to get the original basename of {sha256}");
                    format!("UNKNOWN-{sha256}")
                }
            };
            let dst = secure_join(dir, &basename)?;
            if dst.symlink_metadata().is_ok() {
                error!("avoiding to overwrite existing file {:?}", dst.display());
                continue;
            }
            std::fs::copy(entry.path(), &dst)?;
            exported.insert(basename, sha256);
        }
        Ok(exported)
    }
}

fn record_import(
    out: &mut BTreeMap<String, Sha256Digest>,
    basename: String,
    sha256: Sha256Digest,
) -> Result<(), Error> {
    if let Some(existing) = out.get(&basename) {
        if *existing != sha256 {
            return Err(Error::BasenameConflict {
                basename,
                a: existing.as_hex().to_owned(),
                b: sha256.as_hex().to_owned(),
            });
        }
        return Ok(());
    }
    out.insert(basename, sha256);
    Ok(())
}
