//! Minimal OCI Distribution registry access for digest-addressed blobs.
//!
//! Only blob reads are needed: the digest is always known in advance, so no
//! manifest is ever fetched. Authentication is the anonymous Bearer-token
//! flow of the OCI Distribution specification.

use std::net::IpAddr;

use futures::TryStreamExt;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::digest::Sha256Digest;
use crate::urlopener::ByteStream;
use crate::Error;

/// A parsed OCI reference: `<domain>/<repository>[:tag][@sha256:...]`.
///
/// The tag and digest parts are ignored; blobs are fetched by digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reference {
    pub(crate) domain: String,
    pub(crate) repository: String,
    pub(crate) tag: Option<String>,
}

pub(crate) fn parse_reference(raw: &str) -> Result<Reference, Error> {
    let err = |reason: &str| Error::OciReference {
        reference: raw.to_owned(),
        reason: reason.to_owned(),
    };
    let trimmed = raw.split_once('@').map_or(raw, |(head, _)| head);
    let (domain, rest) = trimmed
        .split_once('/')
        .ok_or_else(|| err("expected <domain>/<repository>"))?;
    // The registry must be explicit; there is no default registry here.
    if !(domain.contains('.') || domain.contains(':') || domain == "localhost") {
        return Err(err("registry domain must be explicit"));
    }
    let (repository, tag) = match rest.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag.to_owned())),
        _ => (rest, None),
    };
    if repository.is_empty() {
        return Err(err("repository is empty"));
    }
    Ok(Reference {
        domain: domain.to_owned(),
        repository: repository.to_owned(),
        tag,
    })
}

/// Parses an image reference the way container tools do: a first segment
/// that does not look like a registry selects Docker Hub, and bare names
/// get the `library/` prefix.
pub(crate) fn parse_image_reference(raw: &str) -> Result<Reference, Error> {
    match raw.split_once('/') {
        None => parse_reference(&format!("registry-1.docker.io/library/{raw}")),
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            parse_reference(raw)
        }
        Some(_) => parse_reference(&format!("registry-1.docker.io/{raw}")),
    }
}

/// Whether the registry domain points at the local host.
pub(crate) fn is_localhost(domain: &str) -> bool {
    let host = if let Some(rest) = domain.strip_prefix('[') {
        rest.split_once(']').map_or(rest, |(h, _)| h)
    } else {
        domain.rsplit_once(':').map_or(domain, |(h, _)| h)
    };
    host == "localhost" || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// A pooled per-registry blob fetcher.
///
/// Holds the negotiated Bearer token for the lifetime of the process; the
/// pool in the URL opener never evicts registries.
pub(crate) struct Registry {
    base: String,
    client: reqwest::Client,
    token: Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

impl Registry {
    pub(crate) fn new(domain: &str, plain_http: bool) -> Self {
        let scheme = if plain_http { "http" } else { "https" };
        Self {
            base: format!("{scheme}://{domain}"),
            client: reqwest::Client::new(),
            token: Mutex::new(None),
        }
    }

    /// Streams the blob with the given digest from `repository`.
    pub(crate) async fn fetch_blob(
        &self,
        repository: &str,
        sha256: &Sha256Digest,
    ) -> Result<(ByteStream, Option<u64>), Error> {
        let url = format!("{}/v2/{}/blobs/{}", self.base, repository, sha256.prefixed());
        let mut resp = self.get(&url).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            let challenge = resp
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let token = self.fetch_token(challenge.as_deref(), repository).await?;
            *self.token.lock().await = Some(token);
            resp = self.get(&url).await?;
        }
        if resp.status() != StatusCode::OK {
            return Err(Error::HttpStatus {
                url,
                status: resp.status(),
            });
        }
        let size = resp.content_length();
        Ok((Box::pin(resp.bytes_stream().map_err(Error::from)), size))
    }

    /// Resolves the manifest digest of a tag, for pinning image references.
    pub(crate) async fn resolve_manifest_digest(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<Sha256Digest, Error> {
        const ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
             application/vnd.oci.image.manifest.v1+json, \
             application/vnd.docker.distribution.manifest.list.v2+json, \
             application/vnd.docker.distribution.manifest.v2+json";
        let url = format!("{}/v2/{repository}/manifests/{tag}", self.base);
        let head = |with_token: Option<String>| {
            let mut req = self.client.head(&url).header(header::ACCEPT, ACCEPT);
            if let Some(token) = with_token {
                req = req.bearer_auth(token);
            }
            req.send()
        };
        let mut resp = head(self.token.lock().await.clone()).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            let challenge = resp
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let token = self.fetch_token(challenge.as_deref(), repository).await?;
            *self.token.lock().await = Some(token.clone());
            resp = head(Some(token)).await?;
        }
        if resp.status() != StatusCode::OK {
            return Err(Error::HttpStatus {
                url,
                status: resp.status(),
            });
        }
        let digest = resp
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::OciReference {
                reference: url.clone(),
                reason: "no Docker-Content-Digest header in the manifest response".to_owned(),
            })?;
        Sha256Digest::parse_prefixed(digest)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, Error> {
        let mut req = self.client.get(url);
        if let Some(token) = self.token.lock().await.as_deref() {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }

    /// Performs the anonymous token handshake described by a
    /// `WWW-Authenticate: Bearer ...` challenge.
    async fn fetch_token(
        &self,
        challenge: Option<&str>,
        repository: &str,
    ) -> Result<String, Error> {
        let challenge = challenge
            .ok_or_else(|| Error::OciAuth("401 without a WWW-Authenticate challenge".to_owned()))?;
        let params = challenge
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::OciAuth(format!("unsupported challenge {challenge:?}")))?;

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for field in params.split(',') {
            let Some((k, v)) = field.trim().split_once('=') else {
                continue;
            };
            let v = v.trim_matches('"').to_owned();
            match k {
                "realm" => realm = Some(v),
                "service" => service = Some(v),
                "scope" => scope = Some(v),
                _ => {}
            }
        }
        let realm = realm
            .ok_or_else(|| Error::OciAuth(format!("challenge without realm: {challenge:?}")))?;
        let scope = scope.unwrap_or_else(|| format!("repository:{repository}:pull"));
        debug!(realm = %realm, scope = %scope, "requesting registry token");

        let mut req = self.client.get(&realm).query(&[("scope", scope.as_str())]);
        if let Some(service) = &service {
            req = req.query(&[("service", service.as_str())]);
        }
        let resp = req.send().await?;
        if resp.status() != StatusCode::OK {
            return Err(Error::OciAuth(format!(
                "token endpoint {realm} returned {}",
                resp.status()
            )));
        }
        let body: TokenResponse = resp.json().await?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| Error::OciAuth("token endpoint returned no token".to_owned()))
    }
}
