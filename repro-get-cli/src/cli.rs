use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Debug mode [$DEBUG]
    #[clap(long, global = true)]
    pub debug: bool,
    /// Cache directory
    #[clap(
        long,
        global = true,
        env = "REPRO_GET_CACHE",
        default_value = "/var/cache/repro-get"
    )]
    pub cache: PathBuf,
    /// Distribution driver; autodetected from /etc/os-release when empty
    #[clap(long, global = true, env = "REPRO_GET_DISTRO", default_value = "")]
    pub distro: String,
    /// File provider; run 'repro-get info' to show the default
    #[clap(
        long,
        global = true,
        env = "REPRO_GET_PROVIDER",
        value_delimiter = ','
    )]
    pub provider: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct InstallOptions {
    /// Hash files in the SHA256SUMS format
    #[clap(required = true)]
    pub hash_files: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct DownloadOptions {
    /// Hash files in the SHA256SUMS format
    #[clap(required = true)]
    pub hash_files: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct HashGenerateOptions {}

#[derive(Debug, Parser)]
pub struct HashInspectOptions {
    /// Hash files in the SHA256SUMS format
    #[clap(required = true)]
    pub hash_files: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct HashUpdateOptions {
    /// The hash file to update in place
    pub hash_file: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum HashCommands {
    /// Generate the hash file for the installed packages
    Generate(HashGenerateOptions),
    /// Inspect the hash file
    Inspect(HashInspectOptions),
    /// Update the hash file
    Update(HashUpdateOptions),
}

#[derive(Debug, Parser)]
pub struct CacheImportOptions {
    /// Files or directories to import
    #[clap(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct CacheExportOptions {
    /// Destination directory
    pub dir: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommands {
    /// Import package files into the cache
    Import(CacheImportOptions),
    /// Export the cached package files to the specified dir
    Export(CacheExportOptions),
    /// Remove the cache directory
    Clean,
}

#[derive(Debug, Parser)]
pub struct IpfsPushOptions {
    /// The hash file whose blobs are pushed
    pub hash_file: PathBuf,
    /// Append the CIDs to the hash file
    #[clap(long, default_value_t = true, action = ArgAction::Set)]
    pub append: bool,
}

#[derive(Debug, Subcommand)]
pub enum IpfsCommands {
    /// Push the cached files into IPFS and record their CIDs
    ///
    /// Needs the 'ipfs' command to be installed. There is no pull
    /// counterpart: to pull the pushed packages, set the provider to a
    /// {{.CID}} template with an IPFS gateway, such as
    /// 'http://ipfs.io/ipfs/{{.CID}}'.
    Push(IpfsPushOptions),
}

#[derive(Debug, Parser)]
pub struct DockerfileGenerateOptions {
    /// Output directory
    pub dir: PathBuf,
    /// Base image reference, e.g. 'debian:bookworm-20230109'
    pub base_image: String,
    /// Packages to install in the generated image
    pub packages: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum DockerfileCommands {
    /// Generate Dockerfiles that install packages by their hash file
    Generate(DockerfileGenerateOptions),
}

#[derive(Debug, Parser)]
pub struct InfoOptions {
    /// Enable JSON output
    #[clap(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show diagnostic information
    Info(InfoOptions),
    /// Install packages with the hash file
    Install(InstallOptions),
    /// Download packages into the cache
    Download(DownloadOptions),
    /// Manage hash files
    #[clap(subcommand)]
    Hash(HashCommands),
    /// Manage the cache
    #[clap(subcommand)]
    Cache(CacheCommands),
    /// Manage IPFS distribution
    #[clap(subcommand)]
    Ipfs(IpfsCommands),
    /// Manage Dockerfiles (EXPERIMENTAL)
    #[clap(subcommand)]
    Dockerfile(DockerfileCommands),
}

#[derive(Debug, Parser)]
#[clap(
    name = "repro-get",
    version,
    about = "Reproducible apt, dnf, apk, and pacman",
    after_help = "Examples:
  Generate the hash file for all the installed packages:
  $ repro-get hash generate >SHA256SUMS

  Install packages using the hash file:
  $ repro-get install SHA256SUMS"
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub global: GlobalOptions,
    #[clap(subcommand)]
    pub command: Commands,
}
