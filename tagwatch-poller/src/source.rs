//! Remote tag-listing sources.
//!
//! [`RegistrySource`] talks to the Docker Registry HTTP API v2 anonymously:
//!
//! 1. `GET /v2/<repo>/tags/list?n=<page>`: follows `Link: <…>; rel="next"`,
//!    failing on a link it already fetched or after [`MAX_TAG_PAGES`] pages.
//! 2. `HEAD /v2/<repo>/manifests/<tag>`: reads `Docker-Content-Digest`,
//!    only for accounts that track digests.
//!
//! A failed tag listing fails the whole account. A failed manifest lookup only
//! nulls that tag's digest.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use tagwatch_core::{Account, ObservedImage};

use crate::error::SourceError;

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const MAX_TAG_PAGES: usize = 10_000;

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.docker.distribution.manifest.v2+json";

/// Lists the images currently visible for an account.
///
/// `None` entries stand for observations the source could not make sense of;
/// callers skip them.
pub trait RemoteSource: Send + Sync {
    fn list_images(&self, account: &Account) -> Result<Vec<Option<ObservedImage>>, SourceError>;
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Docker Registry v2 source over `ureq`.
#[derive(Debug, Clone)]
pub struct RegistrySource {
    agent: ureq::Agent,
    page_size: usize,
}

impl RegistrySource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn list_tags(&self, base: &str, repository: &str) -> Result<Vec<String>, SourceError> {
        let mut tags = Vec::new();
        let mut next = Some(format!(
            "{base}/v2/{repository}/tags/list?n={}",
            self.page_size
        ));
        let mut pages = Pages::default();
        while let Some(url) = next.take() {
            pages.visit(&url)?;
            let response = self.agent.get(&url).call().map_err(|err| SourceError::Http {
                url: url.clone(),
                message: err.to_string(),
            })?;
            next = response
                .header("Link")
                .and_then(next_link)
                .map(|link| resolve_link(base, &link));
            let page: TagList = response
                .into_json()
                .map_err(|source| SourceError::Decode {
                    url: url.clone(),
                    source,
                })?;
            tags.extend(page.tags.unwrap_or_default());
        }
        Ok(tags)
    }

    fn manifest_digest(&self, base: &str, repository: &str, tag: &str) -> Option<String> {
        let url = format!("{base}/v2/{repository}/manifests/{tag}");
        match self.agent.head(&url).set("Accept", MANIFEST_ACCEPT).call() {
            Ok(response) => response
                .header("Docker-Content-Digest")
                .map(str::to_string),
            Err(err) => {
                tracing::debug!("manifest lookup {url} failed: {err}");
                None
            }
        }
    }
}

impl RemoteSource for RegistrySource {
    fn list_images(&self, account: &Account) -> Result<Vec<Option<ObservedImage>>, SourceError> {
        let base = account.api_base();
        let mut images = Vec::new();
        for repository in &account.repositories {
            for tag in self.list_tags(&base, repository)? {
                if tag.is_empty() {
                    images.push(None);
                    continue;
                }
                let digest = if account.track_digests {
                    self.manifest_digest(&base, repository, &tag)
                } else {
                    None
                };
                images.push(Some(ObservedImage {
                    account: account.name.clone(),
                    registry: account.registry.clone(),
                    repository: repository.clone(),
                    tag,
                    digest,
                }));
            }
        }
        Ok(images)
    }
}

/// URLs fetched while following one repository's tag pages.
#[derive(Debug, Default)]
struct Pages {
    visited: HashSet<String>,
}

impl Pages {
    fn visit(&mut self, url: &str) -> Result<(), SourceError> {
        let message = if self.visited.contains(url) {
            "pagination loop: next link was already fetched".to_string()
        } else if self.visited.len() >= MAX_TAG_PAGES {
            format!("pagination exceeded {MAX_TAG_PAGES} pages")
        } else {
            self.visited.insert(url.to_string());
            return Ok(());
        };
        Err(SourceError::Http {
            url: url.to_string(),
            message,
        })
    }
}

/// Extract the target of a `rel="next"` entry from a `Link` header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.contains("rel=\"next\"") && !params.contains("rel=next") {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(target.to_string())
    })
}

/// Registries return path-only links; anchor them at the API base.
fn resolve_link(base: &str, link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else {
        format!("{base}{link}")
    }
}
