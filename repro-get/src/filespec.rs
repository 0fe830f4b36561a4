//! File specifications: the in-memory description of one hash file entry.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use url::Url;

use crate::digest::Sha256Digest;
use crate::filename::{ApkName, DebName, PacmanName, RpmName};
use crate::template::{self, Value};
use crate::{env, hashfile, Error};

/// Validates a hash file entry name.
///
/// Names must be non-empty, relative, lexically clean, and their basename
/// must not begin with a dot (dot names are reserved).
pub fn validate_name(name: &str) -> Result<(), Error> {
    let reject = |reason: &str| {
        Err(Error::InvalidFilename {
            name: name.to_owned(),
            reason: reason.to_owned(),
        })
    };
    if name.is_empty() {
        return reject("file name is empty");
    }
    if name.starts_with('/') {
        return reject("must not be absolute");
    }
    if name.ends_with('/') || name.split('/').any(|c| c.is_empty() || c == "." || c == "..") {
        return reject("must be clean");
    }
    let base = name.rsplit('/').next().unwrap_or(name);
    if base.starts_with('.') {
        return reject("must not start with \".\"");
    }
    Ok(())
}

/// Parses a pseudo filename of the form `/ipfs/<CID>`.
///
/// Returns the CID, or `None` (with a warning for malformed shapes) when the
/// name is not a pseudo filename.
pub fn parse_pseudo_filename(s: &str) -> Option<String> {
    if !s.starts_with("/ipfs/") {
        return None;
    }
    let fields: Vec<&str> = s.split('/').collect();
    if fields.len() != 3 {
        warn!("invalid pseudo IPFS filename: expected \"/ipfs/<CID>\", got {s:?}");
        return None;
    }
    Some(fields[2].to_owned())
}

/// An immutable description of one hash file entry.
#[derive(Debug, Clone, Serialize)]
pub struct FileSpec {
    /// Canonical relative path, e.g. `"pool/main/h/hello/hello_2.10-2_amd64.deb"`.
    #[serde(rename = "Name")]
    pub name: String,
    /// The final path component of `name`.
    #[serde(rename = "Basename")]
    pub basename: String,
    /// The file's SHA-256 digest.
    #[serde(rename = "SHA256")]
    pub sha256: Sha256Digest,
    /// IPFS content identifier associated with the same digest, if any.
    #[serde(rename = "CID", skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Wall-clock moment handed to provider templates, either the
    /// `SOURCE_DATE_EPOCH` override or the hash file's modification time.
    #[serde(skip)]
    pub epoch: Option<DateTime<Utc>>,
    /// Decoded fields when the name ends in `.deb`.
    #[serde(rename = "Deb", skip_serializing_if = "Option::is_none")]
    pub deb: Option<DebName>,
    /// Decoded fields when the name ends in `.rpm`.
    #[serde(rename = "Rpm", skip_serializing_if = "Option::is_none")]
    pub rpm: Option<RpmName>,
    /// Decoded fields when the name ends in `.apk`.
    #[serde(rename = "Apk", skip_serializing_if = "Option::is_none")]
    pub apk: Option<ApkName>,
    /// Decoded fields when the name ends in `.pkg.tar.zst`.
    #[serde(rename = "Pacman", skip_serializing_if = "Option::is_none")]
    pub pacman: Option<PacmanName>,
}

impl FileSpec {
    /// Builds a spec from a validated name and digest, decoding the
    /// ecosystem fields by filename suffix. Unknown suffixes are allowed and
    /// carry only the generic fields.
    pub fn new(name: &str, sha256: &str) -> Result<Self, Error> {
        validate_name(name)?;
        let sha256 = Sha256Digest::parse(sha256)?;
        let basename = name.rsplit('/').next().unwrap_or(name).to_owned();
        let mut sp = Self {
            name: name.to_owned(),
            basename,
            sha256,
            cid: None,
            epoch: None,
            deb: None,
            rpm: None,
            apk: None,
            pacman: None,
        };
        if name.ends_with(".deb") {
            sp.deb = Some(DebName::parse_filename(name)?);
        } else if name.ends_with(".rpm") {
            sp.rpm = Some(RpmName::parse_filename(name)?);
        } else if name.ends_with(".apk") {
            sp.apk = Some(ApkName::parse_filename(name)?);
        } else if name.ends_with(".pkg.tar.zst") {
            sp.pacman = Some(PacmanName::parse_filename(name)?);
        }
        Ok(sp)
    }

    /// Attaches an IPFS CID.
    pub fn with_cid(mut self, cid: Option<String>) -> Self {
        self.cid = cid;
        self
    }

    /// Attaches the epoch used for provider template expansion.
    pub fn with_epoch(mut self, epoch: Option<DateTime<Utc>>) -> Self {
        self.epoch = epoch;
        self
    }

    /// Expands a provider template against this spec and parses the result
    /// as a URL.
    ///
    /// For non-OCI schemes the expansion must differ from the template;
    /// otherwise the provider references no variable and is rejected.
    pub fn url(&self, provider: &str) -> Result<Url, Error> {
        // The template engine renders an absent CID as an empty string,
        // which would yield a syntactically valid but wrong URL.
        if provider.contains(".CID") && self.cid.is_none() {
            return Err(Error::MissingCid(self.sha256.as_hex().to_owned()));
        }

        let lookup = |name: &str| -> Option<Value> {
            match name {
                "Name" => Some(Value::Str(self.name.clone())),
                "Basename" => Some(Value::Str(self.basename.clone())),
                "SHA256" => Some(Value::Str(self.sha256.as_hex().to_owned())),
                "CID" => self.cid.clone().map(Value::Str),
                "Epoch" => self.epoch.map(Value::Time),
                _ => None,
            }
        };
        let expanded = template::expand(provider, &lookup, &[])?;

        let u = Url::parse(&expanded)
            .map_err(|e| Error::InvalidUrl(format!("{expanded:?}: {e}")))?;

        let is_oci = u.scheme() == "oci" || u.scheme().starts_with("oci+");
        if is_oci {
            if expanded.contains("@sha256:") {
                warn!(
                    "no need to provide the '@sha256...' suffix in an OCI provider string, got {expanded:?}"
                );
            }
        } else if expanded == provider {
            return Err(Error::InvalidProvider(provider.to_owned()));
        }
        Ok(u)
    }
}

/// Builds the spec map from a parsed `filename -> digest` map.
///
/// Keys are visited in lexicographic order so CID association is
/// deterministic under duplicates: pseudo `/ipfs/<CID>` entries register the
/// CID for their digest (last one wins, with a warning), and every real
/// entry picks up the CID registered for its digest, if any.
pub fn from_sums(
    sums: &BTreeMap<String, String>,
    epoch: Option<DateTime<Utc>>,
) -> Result<BTreeMap<String, FileSpec>, Error> {
    let mut entries = BTreeMap::new();
    let mut cids: BTreeMap<&str, String> = BTreeMap::new();
    for (filename_maybe_pseudo, sum) in sums {
        if let Some(cid) = parse_pseudo_filename(filename_maybe_pseudo) {
            if let Some(old) = cids.get(sum.as_str()) {
                warn!(
                    "multiple CIDs found for SHA256 {sum:?}, discarding CID {old:?}, using {cid:?}"
                );
            }
            cids.insert(sum.as_str(), cid);
            continue;
        }
        let sp = FileSpec::new(filename_maybe_pseudo, sum)?
            .with_cid(cids.get(sum.as_str()).cloned())
            .with_epoch(epoch);
        entries.insert(filename_maybe_pseudo.clone(), sp);
    }
    Ok(entries)
}

/// Loads and merges hash files into a spec map.
///
/// The epoch attached to every spec is the `SOURCE_DATE_EPOCH` override
/// when set, and otherwise the newest modification time among the given
/// files.
pub fn from_hash_files<P: AsRef<Path>>(paths: &[P]) -> Result<BTreeMap<String, FileSpec>, Error> {
    let mut sums = BTreeMap::new();
    let mut mtime: Option<DateTime<Utc>> = None;
    for path in paths {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to open {}: {e}", path.display()),
            ))
        })?;
        if let Ok(modified) = f.metadata().and_then(|m| m.modified()) {
            let modified = DateTime::<Utc>::from(modified);
            if mtime.is_none_or(|t| modified > t) {
                mtime = Some(modified);
            }
        }
        sums.extend(hashfile::parse(BufReader::new(f))?);
    }
    let epoch = env::source_date_epoch().or(mtime);
    from_sums(&sums, epoch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUM: &str = "35b1508eeee9c1dfba798c4c04304ef0f266990f936a51f165571edf53325cbc";

    #[test]
    fn validate_name_rules() {
        assert!(validate_name("pool/main/h/hello/hello_2.10-2_amd64.deb").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("/abs/path").is_err());
        assert!(validate_name("a//b").is_err());
        assert!(validate_name("a/./b").is_err());
        assert!(validate_name("a/../b").is_err());
        assert!(validate_name("a/b/").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("a/.hidden").is_err());
    }

    #[test]
    fn pseudo_filenames() {
        assert_eq!(
            parse_pseudo_filename("/ipfs/QmRY19HEWeTJtRC6vAdz7rDfX3PjSMgXmd1KYi9guAACUj"),
            Some("QmRY19HEWeTJtRC6vAdz7rDfX3PjSMgXmd1KYi9guAACUj".to_owned())
        );
        assert_eq!(parse_pseudo_filename("pool/hello.deb"), None);
        assert_eq!(parse_pseudo_filename("/ipfs/a/b"), None);
    }

    #[test]
    fn new_decodes_by_suffix() {
        let sp = FileSpec::new("pool/main/h/hello/hello_2.10-2_amd64.deb", SUM).unwrap();
        assert_eq!(sp.basename, "hello_2.10-2_amd64.deb");
        let deb = sp.deb.as_ref().unwrap();
        assert_eq!(deb.package, "hello");
        assert_eq!(deb.version, "2.10-2");
        assert_eq!(deb.architecture, "amd64");
        assert!(sp.rpm.is_none() && sp.apk.is_none() && sp.pacman.is_none());
    }

    #[test]
    fn new_allows_unknown_suffix() {
        let sp = FileSpec::new("some/aux/file.sig", SUM).unwrap();
        assert!(sp.deb.is_none() && sp.rpm.is_none() && sp.apk.is_none() && sp.pacman.is_none());
    }

    #[test]
    fn new_rejects_bad_digest() {
        assert!(FileSpec::new("hello_2.10-2_amd64.deb", "deadbeef").is_err());
    }

    fn parse_sums(text: &str) -> BTreeMap<String, String> {
        hashfile::parse(text.as_bytes()).unwrap()
    }

    #[test]
    fn from_sums_simple() {
        let sums = parse_sums(&format!(
            "# Simple\n{SUM}  pool/main/h/hello/hello_2.10-2_amd64.deb\n"
        ));
        let got = from_sums(&sums, None).unwrap();
        assert_eq!(got.len(), 1);
        let sp = &got["pool/main/h/hello/hello_2.10-2_amd64.deb"];
        assert_eq!(sp.sha256.as_hex(), SUM);
        assert!(sp.cid.is_none());
    }

    #[test]
    fn from_sums_with_cid() {
        let sums = parse_sums(&format!(
            "{SUM}  pool/main/h/hello/hello_2.10-2_amd64.deb\n\
             {SUM}  /ipfs/QmRY19HEWeTJtRC6vAdz7rDfX3PjSMgXmd1KYi9guAACU\n"
        ));
        let got = from_sums(&sums, None).unwrap();
        assert_eq!(got.len(), 1);
        let sp = &got["pool/main/h/hello/hello_2.10-2_amd64.deb"];
        assert_eq!(
            sp.cid.as_deref(),
            Some("QmRY19HEWeTJtRC6vAdz7rDfX3PjSMgXmd1KYi9guAACU")
        );
        assert_eq!(sp.deb.as_ref().unwrap().package, "hello");
    }

    #[test]
    fn from_sums_last_cid_wins() {
        let sums = parse_sums(&format!(
            "{SUM}  pool/main/h/hello/hello_2.10-2_amd64.deb\n\
             {SUM}  /ipfs/QmRY19HEWeTJtRC6vAdz7rDfX3PjSMgXmd1KYi9guAACU\n\
             {SUM}  /ipfs/QmTsD9EfB3Zu7DtLGWwDAkmnuhfjea5KyhXzNjd41LW35i\n"
        ));
        let got = from_sums(&sums, None).unwrap();
        let sp = &got["pool/main/h/hello/hello_2.10-2_amd64.deb"];
        assert_eq!(
            sp.cid.as_deref(),
            Some("QmTsD9EfB3Zu7DtLGWwDAkmnuhfjea5KyhXzNjd41LW35i")
        );
    }

    #[test]
    fn url_expansion() {
        let sp = FileSpec::new("pool/main/h/hello/hello_2.10-2_amd64.deb", SUM).unwrap();
        let u = sp.url("http://deb.debian.org/debian/{{.Name}}").unwrap();
        assert_eq!(
            u.as_str(),
            "http://deb.debian.org/debian/pool/main/h/hello/hello_2.10-2_amd64.deb"
        );
        let u = sp.url("http://example.com/by-hash/{{.SHA256}}").unwrap();
        assert!(u.as_str().ends_with(SUM));
    }

    #[test]
    fn url_rejects_variable_free_provider() {
        let sp = FileSpec::new("hello_2.10-2_amd64.deb", SUM).unwrap();
        assert!(matches!(
            sp.url("http://example.com/static"),
            Err(Error::InvalidProvider(_))
        ));
        // OCI providers are exempt: the blob is addressed by digest.
        assert!(sp.url("oci://registry.example/pkgs").is_ok());
    }

    #[test]
    fn url_requires_cid_when_referenced() {
        let sp = FileSpec::new("hello_2.10-2_amd64.deb", SUM).unwrap();
        assert!(matches!(
            sp.url("http://ipfs.io/ipfs/{{.CID}}"),
            Err(Error::MissingCid(_))
        ));
        let sp = sp.with_cid(Some("QmRY19HEWeTJtRC6vAdz7rDfX3PjSMgXmd1KYi9guAACU".to_owned()));
        assert!(sp.url("http://ipfs.io/ipfs/{{.CID}}").is_ok());
    }

    #[test]
    fn url_expansion_is_pure() {
        let sp = FileSpec::new("hello_2.10-2_amd64.deb", SUM).unwrap();
        let a = sp.url("http://deb.debian.org/debian/{{.Name}}").unwrap();
        let b = sp.url("http://deb.debian.org/debian/{{.Name}}").unwrap();
        assert_eq!(a, b);
    }
}
