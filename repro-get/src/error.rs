use std::process::ExitStatus;

/// Errors from hash parsing, caching, downloading, and package installation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The digest string is not a 64-character lowercase-hex SHA-256 value.
    #[error("invalid sha256 digest {0:?}")]
    InvalidDigest(String),

    /// A file name in a hash file or metadata record is malformed.
    #[error("invalid file name {name:?}: {reason}")]
    InvalidFilename {
        /// The offending file name.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },

    /// A hash file line could not be parsed.
    #[error("line {line}: {reason}")]
    HashFile {
        /// 1-based line number within the hash file.
        line: usize,
        /// Why the line was rejected.
        reason: String,
    },

    /// Downloaded data does not hash to the requested digest.
    #[error("expected sha256 {expected}, got {actual} for {url}")]
    DigestMismatch {
        /// The digest the caller asked for.
        expected: String,
        /// The digest computed from the received bytes.
        actual: String,
        /// Redacted URL the bytes came from.
        url: String,
    },

    /// An HTTP request failed at the transport level.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an unexpected HTTP status.
    #[error("expected HTTP status 200 for {url}, got {status}")]
    HttpStatus {
        /// Redacted URL of the request.
        url: String,
        /// The status the server returned.
        status: reqwest::StatusCode,
    },

    /// A URL string could not be parsed.
    #[error("failed to parse URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The URL is syntactically valid but not acceptable here
    /// (e.g. a `file://` URL carrying a host or query).
    #[error("invalid URL {0:?}")]
    InvalidUrl(String),

    /// The URL scheme is not one of the recognized schemes.
    #[error("unsupported URL scheme {0:?}")]
    UnsupportedScheme(String),

    /// An OCI reference could not be parsed or resolved.
    #[error("invalid OCI reference {reference:?}: {reason}")]
    OciReference {
        /// The raw reference.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },

    /// OCI blob access needs a digest known in advance.
    #[error("a sha256 digest must be provided to open an OCI URL")]
    OciDigestRequired,

    /// Token negotiation with an OCI registry failed.
    #[error("OCI registry authentication failed: {0}")]
    OciAuth(String),

    /// Opening a URL failed; wraps the underlying error with the URL.
    #[error("failed to open {url}: {source}")]
    OpenUrl {
        /// Redacted URL.
        url: String,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A provider template expanded to itself, i.e. referenced no variable.
    #[error("invalid provider {0:?}")]
    InvalidProvider(String),

    /// A provider template references `.CID` but the file has no known CID.
    #[error("no CID is known for sha256 {0:?}")]
    MissingCid(String),

    /// A template string could not be expanded.
    #[error("template error: {0}")]
    Template(String),

    /// No provider was configured and the distro driver declares none.
    #[error("provider needs to be specified")]
    NoProviders,

    /// The operation needs a cache directory but none was supplied.
    #[error("cache is required")]
    CacheRequired,

    /// A relative path would escape its root directory.
    #[error("path {0:?} escapes the target directory")]
    UnsafePath(String),

    /// Metadata attached to a blob is malformed.
    #[error("invalid metadata basename {0:?}")]
    InvalidMetadata(String),

    /// Two imported files share a basename but have different digests.
    #[error("conflict: basename {basename:?} maps to sha256 {a} and {b}")]
    BasenameConflict {
        /// The shared basename.
        basename: String,
        /// Digest recorded first.
        a: String,
        /// Conflicting digest.
        b: String,
    },

    /// An external program exited with a non-zero status.
    #[error("{program} exited with {status}")]
    Command {
        /// The program that was invoked.
        program: String,
        /// Its exit status.
        status: ExitStatus,
    },

    /// The distro driver does not implement the requested feature.
    #[error("the specified distro driver does not implement the requested feature")]
    NotImplemented,

    /// The requested distro driver name is not recognized.
    #[error("unknown distro {name:?} (known distros: {known:?})")]
    UnknownDistro {
        /// The requested name.
        name: String,
        /// The recognized driver names.
        known: Vec<&'static str>,
    },

    /// The queried host has no installed packages to enumerate.
    #[error("no package is installed?")]
    NothingInstalled,

    /// A filesystem I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON metadata record could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error stems from a file that does not exist.
    ///
    /// Used to distinguish "sidecar not recorded" from real I/O failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
