//! The null driver, used when no supported distro is detected.

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::distro::{
    Distro, DockerfileArgs, DockerfileOpts, FileInfo, HashOpts, Info, InspectOpts, InstallOpts,
};
use crate::filespec::FileSpec;
use crate::Error;

/// A driver that recognizes no packages and implements no mutating
/// operation.
pub struct Noop {
    info: Info,
}

impl Noop {
    /// Creates the null driver.
    pub fn new() -> Self {
        Self {
            info: Info {
                name: "none".to_owned(),
                default_providers: Vec::new(),
                experimental: false,
                cache_needed_for_generating_hash: false,
            },
        }
    }
}

impl Default for Noop {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Distro for Noop {
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

    async fn inspect_file(&self, spec: &FileSpec, _opts: InspectOpts) -> Result<FileInfo, Error> {
        Ok(FileInfo {
            spec: spec.clone(),
            is_package: false,
            is_aux: false,
            package_name: None,
            installed: None,
        })
    }

    async fn install_packages(
        &self,
        _cache: &Cache,
        packages: &[FileSpec],
        _opts: InstallOpts,
    ) -> Result<(), Error> {
        if packages.is_empty() {
            return Ok(());
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_neither_package_nor_aux() {
        let sum = "35b1508eeee9c1dfba798c4c04304ef0f266990f936a51f165571edf53325cbc";
        let d = Noop::new();
        let sp = FileSpec::new("pool/main/h/hello/hello_2.10-2_amd64.deb", sum).unwrap();
        let inf = d.inspect_file(&sp, InspectOpts::default()).await.unwrap();
        assert!(!inf.is_package && !inf.is_aux);
    }

    #[tokio::test]
    async fn mutating_operations_are_not_implemented() {
        let d = Noop::new();
        let mut out: Vec<u8> = Vec::new();
        assert!(matches!(
            d.generate_hash(&mut out, HashOpts::default()).await,
            Err(Error::NotImplemented)
        ));
    }
}
