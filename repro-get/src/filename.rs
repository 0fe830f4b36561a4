//! Package filename decomposition for the four supported packaging
//! ecosystems.
//!
//! Each decoder splits a package filename into its name, version, and
//! architecture parts following that ecosystem's naming convention. The
//! decoders are purely lexical; they never consult the package contents.

use serde::Serialize;

use crate::Error;

fn basename(filename: &str) -> &str {
    filename.rsplit('/').next().unwrap_or(filename)
}

/// Fields of a Debian package filename such as `hello_2.10-2_amd64.deb`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebName {
    /// Package name, e.g. `"hello"`.
    #[serde(rename = "Package")]
    pub package: String,
    /// Version, e.g. `"2.10-2"`.
    #[serde(rename = "Version")]
    pub version: String,
    /// Architecture, e.g. `"amd64"`.
    #[serde(rename = "Architecture")]
    pub architecture: String,
}

impl DebName {
    /// Decodes a `*.deb` filename (with or without directory components).
    pub fn parse_filename(filename: &str) -> Result<Self, Error> {
        let Some(trimmed) = basename(filename).strip_suffix(".deb") else {
            return Err(Error::InvalidFilename {
                name: filename.to_owned(),
                reason: "expected *.deb".to_owned(),
            });
        };
        Self::split(trimmed)
    }

    /// Splits `<package>_<version>_<architecture>`.
    pub fn split(trimmed: &str) -> Result<Self, Error> {
        let mut it = trimmed.splitn(3, '_');
        match (it.next(), it.next(), it.next()) {
            (Some(package), Some(version), Some(architecture)) => Ok(Self {
                package: package.to_owned(),
                version: version.to_owned(),
                architecture: architecture.to_owned(),
            }),
            _ => Err(Error::InvalidFilename {
                name: trimmed.to_owned(),
                reason: "expected <PACKAGE>_<VERSION>_<ARCHITECTURE>".to_owned(),
            }),
        }
    }
}

/// Fields of an RPM filename such as `ca-certificates-2022.2.54-5.fc37.noarch.rpm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpmName {
    /// Package name, e.g. `"ca-certificates"`.
    #[serde(rename = "Package")]
    pub package: String,
    /// Version, e.g. `"2022.2.54"`.
    #[serde(rename = "Version")]
    pub version: String,
    /// Release, e.g. `"5.fc37"`.
    #[serde(rename = "Release")]
    pub release: String,
    /// Architecture, e.g. `"noarch"`. Empty for pseudo packages such as
    /// `gpg-pubkey-<hex>-<hex>`.
    #[serde(rename = "Architecture")]
    pub architecture: String,
}

impl RpmName {
    /// Decodes a `*.rpm` filename (with or without directory components).
    pub fn parse_filename(filename: &str) -> Result<Self, Error> {
        let Some(trimmed) = basename(filename).strip_suffix(".rpm") else {
            return Err(Error::InvalidFilename {
                name: filename.to_owned(),
                reason: "expected *.rpm".to_owned(),
            });
        };
        Self::split(trimmed)
    }

    /// Splits `<package>-<version>-<release>[.<architecture>]`.
    pub fn split(trimmed: &str) -> Result<Self, Error> {
        let err = || Error::InvalidFilename {
            name: trimmed.to_owned(),
            reason: "unexpected package string".to_owned(),
        };
        let (pkg_ver_rel, arch) = match trimmed.rsplit_once('.') {
            Some((head, tail)) => (head, tail),
            None => (trimmed, ""),
        };
        let (pkg_ver, release) = pkg_ver_rel.rsplit_once('-').ok_or_else(err)?;
        let (package, version) = pkg_ver.rsplit_once('-').ok_or_else(err)?;
        Ok(Self {
            package: package.to_owned(),
            version: version.to_owned(),
            release: release.to_owned(),
            architecture: arch.to_owned(),
        })
    }
}

/// Fields of an Alpine package filename such as
/// `ca-certificates-bundle-20220614-r0.apk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApkName {
    /// Package name, e.g. `"ca-certificates-bundle"`.
    #[serde(rename = "Package")]
    pub package: String,
    /// Version, e.g. `"20220614-r0"`.
    #[serde(rename = "Version")]
    pub version: String,
}

impl ApkName {
    /// Decodes a `*.apk` filename (with or without directory components).
    pub fn parse_filename(filename: &str) -> Result<Self, Error> {
        let Some(trimmed) = basename(filename).strip_suffix(".apk") else {
            return Err(Error::InvalidFilename {
                name: filename.to_owned(),
                reason: "expected *.apk".to_owned(),
            });
        };
        Self::split(trimmed)
    }

    /// Splits on the first `-` whose successor begins with a digit.
    pub fn split(pkg_dash_ver: &str) -> Result<Self, Error> {
        let fields: Vec<&str> = pkg_dash_ver.split('-').collect();
        for i in 1..fields.len() {
            if fields[i].as_bytes().first().is_some_and(u8::is_ascii_digit) {
                return Ok(Self {
                    package: fields[..i].join("-"),
                    version: fields[i..].join("-"),
                });
            }
        }
        Err(Error::InvalidFilename {
            name: pkg_dash_ver.to_owned(),
            reason: "failed to split into the package name and the version string".to_owned(),
        })
    }
}

/// Fields of an Arch Linux package filename such as
/// `ca-certificates-20220905-1-any.pkg.tar.zst`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacmanName {
    /// Package name, e.g. `"ca-certificates"`.
    #[serde(rename = "Package")]
    pub package: String,
    /// Version including the release, e.g. `"20220905-1"`.
    #[serde(rename = "Version")]
    pub version: String,
    /// Architecture, e.g. `"any"`.
    #[serde(rename = "Architecture")]
    pub architecture: String,
}

impl PacmanName {
    /// Decodes a `*.pkg.tar.zst` filename (with or without directory
    /// components).
    pub fn parse_filename(filename: &str) -> Result<Self, Error> {
        let Some(trimmed) = basename(filename).strip_suffix(".pkg.tar.zst") else {
            return Err(Error::InvalidFilename {
                name: filename.to_owned(),
                reason: "expected *.pkg.tar.zst".to_owned(),
            });
        };
        Self::split(trimmed)
    }

    /// Splits `<package>-<version>-<release>-<architecture>` from the right.
    pub fn split(trimmed: &str) -> Result<Self, Error> {
        let err = || Error::InvalidFilename {
            name: trimmed.to_owned(),
            reason: "unexpected package string".to_owned(),
        };
        let (pkg_ver_rel, arch) = trimmed.rsplit_once('-').ok_or_else(err)?;
        let (pkg_ver, release) = pkg_ver_rel.rsplit_once('-').ok_or_else(err)?;
        let (package, version) = pkg_ver.rsplit_once('-').ok_or_else(err)?;
        Ok(Self {
            package: package.to_owned(),
            version: format!("{version}-{release}"),
            architecture: arch.to_owned(),
        })
    }
}
