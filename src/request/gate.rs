//! The request gate
//!
//! Every outbound request of the crawler goes through [`RequestGate::fetch`],
//! one at a time. The gate resolves relative URLs against the site root,
//! waits out the fuzzing delay, picks the next proxy, and inspects the
//! response for the site's anti-scraping page before handing it back.

use crate::config::RequesterConfig;
use crate::request::proxy::ProxyRotation;
use crate::request::throttle::Throttle;
use crate::RipperError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::{Client, Proxy};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

/// A fetched response that passed block detection
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub url: String,

    /// HTTP status code
    pub status_code: u16,

    /// Content-Type header value (empty when absent)
    pub content_type: String,

    /// Raw response body
    pub body: Vec<u8>,
}

impl FetchedPage {
    /// Body decoded as UTF-8, with invalid sequences replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Returns true if the content type is textual
    pub fn is_textual(&self) -> bool {
        is_textual(&self.content_type)
    }
}

/// The site served its anti-scraping page
///
/// This is the crawl's only fatal condition: it means the crawler has been
/// noticed and every further request risks a permanent ban.
#[derive(Debug, Error)]
#[error("Anti-scraping page served for {url}; crawl must stop")]
pub struct BlockDetected {
    /// URL that returned the block page
    pub url: String,

    /// Where the offending body was saved, if saving succeeded
    pub evidence: Option<PathBuf>,
}

/// Transient failure to fetch a URL
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("Request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
}

/// Error returned by [`RequestGate::fetch`]
#[derive(Debug, Error)]
pub enum GateError {
    /// Fatal: the crawl has been detected
    #[error(transparent)]
    Blocked(#[from] BlockDetected),

    /// Transient: this request failed, the crawl may continue
    #[error(transparent)]
    Failed(#[from] FetchFailure),
}

/// Serializes outbound fetches through proxy rotation, fuzzing and block detection
pub struct RequestGate {
    root: Url,
    proxies: ProxyRotation,
    throttle: Throttle,
    rng: StdRng,

    /// One client per configured proxy, keyed by proxy URL
    clients: HashMap<String, Client>,
    direct: Client,

    ban_fingerprint: String,
    evidence_path: PathBuf,
}

impl RequestGate {
    /// Creates a gate for the given site root
    ///
    /// # Arguments
    ///
    /// * `root` - Absolute URL relative links are resolved against
    /// * `config` - Fuzzing, proxy and block detection settings
    ///
    /// # Returns
    ///
    /// * `Ok(RequestGate)` - Ready to fetch
    /// * `Err(RipperError)` - Invalid root or proxy, or client construction failed
    pub fn new(root: &str, config: &RequesterConfig) -> Result<Self, RipperError> {
        Self::with_rng(root, config, StdRng::from_entropy())
    }

    /// Creates a gate whose proxy order and delays are reproducible
    pub fn with_seed(root: &str, config: &RequesterConfig, seed: u64) -> Result<Self, RipperError> {
        Self::with_rng(root, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(root: &str, config: &RequesterConfig, rng: StdRng) -> Result<Self, RipperError> {
        let root = Url::parse(root)?;

        let mut clients = HashMap::new();
        for proxy in &config.proxies {
            clients.insert(proxy.clone(), build_http_client(config, Some(proxy))?);
        }
        let direct = build_http_client(config, None)?;

        Ok(Self {
            root,
            proxies: ProxyRotation::new(config.proxies.clone()),
            throttle: Throttle::new(
                Duration::from_millis(config.fuzz_min_ms),
                Duration::from_millis(config.fuzz_max_ms),
            ),
            rng,
            clients,
            direct,
            ban_fingerprint: config.ban_fingerprint.clone(),
            evidence_path: PathBuf::from(&config.evidence_path),
        })
    }

    /// The site root relative URLs resolve against
    pub fn root(&self) -> &Url {
        &self.root
    }

    /// Completion time of the last non-fatal request
    pub fn last_request_time(&self) -> Option<Instant> {
        self.throttle.last_request_time()
    }

    /// Resolves a possibly relative URL against the site root
    pub fn resolve(&self, url: &str) -> Result<Url, FetchFailure> {
        self.root
            .join(url.trim())
            .map_err(|source| FetchFailure::InvalidUrl {
                url: url.to_string(),
                source,
            })
    }

    /// Fetches a URL
    ///
    /// # Request Flow
    ///
    /// 1. Resolve the URL against the site root
    /// 2. Sleep until the fuzzing delay since the last request has elapsed
    /// 3. Send a GET through the next proxy of the rotation
    /// 4. Check the body for the ban fingerprint (textual responses only)
    ///    - On a match, save the body to the evidence path → `Blocked`
    /// 5. Record the request, which schedules the next allowed request
    /// 6. Reject non-2xx statuses → `Failed(Status)`
    ///
    /// Every request that reached the network schedules the next delay,
    /// whatever its status, so failures never bypass the fuzzing. The block
    /// check runs before the status check because the site may serve its
    /// ban page with an error status.
    pub async fn fetch(&mut self, url: &str) -> Result<FetchedPage, GateError> {
        let target = self.resolve(url)?;

        self.throttle.wait().await;

        let proxy = self.proxies.next_proxy(&mut self.rng);
        let client = proxy
            .as_ref()
            .and_then(|p| self.clients.get(p))
            .unwrap_or(&self.direct);

        tracing::debug!(
            "GET {} via {}",
            target,
            proxy.as_deref().unwrap_or("direct connection")
        );

        let response = match client.get(target.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                self.throttle.record_request(Instant::now(), &mut self.rng);
                return Err(FetchFailure::Transport(e).into());
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                self.throttle.record_request(Instant::now(), &mut self.rng);
                return Err(FetchFailure::Body(e).into());
            }
        };

        let page = FetchedPage {
            url: final_url,
            status_code: status.as_u16(),
            content_type,
            body,
        };

        self.check_block(&page)?;
        self.throttle.record_request(Instant::now(), &mut self.rng);

        if !status.is_success() {
            tracing::debug!("GET {} returned {}", target, status);
            return Err(FetchFailure::Status(status.as_u16()).into());
        }

        Ok(page)
    }

    /// Raises `BlockDetected` if the page is the site's anti-scraping page
    fn check_block(&self, page: &FetchedPage) -> Result<(), BlockDetected> {
        if !is_block_page(page, &self.ban_fingerprint) {
            return Ok(());
        }

        tracing::error!("Anti-scraping page detected at {}", page.url);
        let evidence = match save_evidence(&self.evidence_path, &page.body) {
            Ok(()) => {
                tracing::error!("Block page saved to {}", self.evidence_path.display());
                Some(self.evidence_path.clone())
            }
            Err(e) => {
                tracing::error!(
                    "Failed to save block page to {}: {}",
                    self.evidence_path.display(),
                    e
                );
                None
            }
        };

        Err(BlockDetected {
            url: page.url.clone(),
            evidence,
        })
    }
}

/// Builds an HTTP client, optionally routed through a proxy
pub fn build_http_client(
    config: &RequesterConfig,
    proxy: Option<&str>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    } else {
        builder = builder.no_proxy();
    }

    builder.build()
}

/// Returns true if the content type names a textual body
fn is_textual(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.starts_with("text/")
        || content_type.contains("html")
        || content_type.contains("xml")
        || content_type.contains("json")
}

/// Returns true if a textual body contains the ban fingerprint
pub fn is_block_page(page: &FetchedPage, fingerprint: &str) -> bool {
    page.is_textual() && page.text().contains(fingerprint)
}

fn save_evidence(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, body)
}
