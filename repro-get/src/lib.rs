#![warn(missing_docs)]

//! Reproducible acquisition of OS distribution packages addressed by their
//! SHA-256 content digests.
//!
//! Given a `SHA256SUMS`-format hash file, this crate fetches each blob from
//! one of several interchangeable providers, verifies its digest, stores it
//! in a content-addressed cache, and hands verified blobs to the platform
//! package manager. It also generates hash files from the set of packages
//! installed on the host.
//!
//! This crate provides:
//! - The `SHA256SUMS` codec and the file specification model
//! - A multi-scheme URL opener (`http(s)://`, `file://`, `oci://`)
//! - The content-addressed blob cache with atomic, verified insertion
//! - Provider template expansion and the fallback download orchestrator
//! - Distro drivers for Debian/Ubuntu, Fedora, Alpine, and Arch Linux
//!
//! # Example
//!
//! ```no_run
//! use repro_get::cache::Cache;
//! use repro_get::downloader::{download, DownloadOpts};
//! use repro_get::{distro, filespec};
//!
//! # async fn example() -> Result<(), repro_get::Error> {
//! let driver = distro::resolve("")?;
//! let cache = Cache::new("/var/cache/repro-get")?;
//! let specs = filespec::from_hash_files(&["SHA256SUMS"])?;
//! let res = download(driver.as_ref(), &cache, &specs, &DownloadOpts::default()).await?;
//! eprintln!("{} packages ready", res.packages_to_install.len());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod digest;
pub mod distro;
pub mod downloader;
pub mod env;
mod error;
pub mod filename;
pub mod filespec;
pub mod hashfile;
mod oci;
pub mod osrelease;
mod paths;
mod template;
pub mod urlopener;

pub use digest::Sha256Digest;
pub use error::Error;
pub use filespec::FileSpec;

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
