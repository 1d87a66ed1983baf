use serde::Deserialize;

/// Main configuration structure for Choral-Ripper
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub site: SiteConfig,
    #[serde(default)]
    pub requester: RequesterConfig,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// The crawled site and the fixed parts of its document structure
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Root that relative links are resolved against
    pub root: String,

    /// Listing page enumerating every composer
    #[serde(rename = "composer-list-url")]
    pub composer_list_url: String,

    /// Composer count at or above which the catalog counts as seeded
    #[serde(rename = "expected-composers")]
    pub expected_composers: u64,

    /// Link class of composer entries on the composer listing
    #[serde(rename = "composer-link-class", default = "default_composer_link_class")]
    pub composer_link_class: String,

    /// Link class of piece entries on a composer's listing
    #[serde(rename = "piece-link-class", default = "default_piece_link_class")]
    pub piece_link_class: String,

    /// Class of the (possibly nested) listing content container
    #[serde(
        rename = "content-wrapper-class",
        default = "default_content_wrapper_class"
    )]
    pub content_wrapper_class: String,

    /// Text of the link leading to the next listing page
    #[serde(rename = "next-page-text", default = "default_next_page_text")]
    pub next_page_text: String,
}

/// Outbound request behavior
#[derive(Debug, Clone, Deserialize)]
pub struct RequesterConfig {
    /// Lower bound of the randomized delay between requests (milliseconds)
    #[serde(rename = "fuzz-min-ms", default = "default_fuzz_min_ms")]
    pub fuzz_min_ms: u64,

    /// Upper bound of the randomized delay between requests (milliseconds)
    #[serde(rename = "fuzz-max-ms", default = "default_fuzz_max_ms")]
    pub fuzz_max_ms: u64,

    /// Proxy pool; empty means direct connections
    #[serde(default)]
    pub proxies: Vec<String>,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Body text identifying the site's anti-scraping page
    #[serde(rename = "ban-fingerprint", default = "default_ban_fingerprint")]
    pub ban_fingerprint: String,

    /// Where the offending page is saved when the fingerprint matches
    #[serde(rename = "evidence-path", default = "default_evidence_path")]
    pub evidence_path: String,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            fuzz_min_ms: default_fuzz_min_ms(),
            fuzz_max_ms: default_fuzz_max_ms(),
            proxies: Vec::new(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            ban_fingerprint: default_ban_fingerprint(),
            evidence_path: default_evidence_path(),
        }
    }
}

/// Catalog persistence
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// File download stage
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    /// Root directory for downloaded files
    #[serde(default = "default_download_directory")]
    pub directory: String,

    /// File extensions worth downloading (case-insensitive, no dot)
    #[serde(rename = "allowed-extensions", default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// JSON ledger of fully downloaded piece URLs
    #[serde(rename = "ledger-path", default = "default_ledger_path")]
    pub ledger_path: String,

    /// Results requested per search API page
    #[serde(rename = "search-page-size", default = "default_search_page_size")]
    pub search_page_size: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            directory: default_download_directory(),
            allowed_extensions: default_allowed_extensions(),
            ledger_path: default_ledger_path(),
            search_page_size: default_search_page_size(),
        }
    }
}

/// Operator notifications
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Address receiving status digests and failure alerts
    pub recipient: Option<String>,

    /// Mail transfer command fed an RFC 5322 message on stdin
    pub command: Option<Vec<String>>,

    /// Minimum hours between two status digests
    #[serde(
        rename = "status-interval-hours",
        default = "default_status_interval_hours"
    )]
    pub status_interval_hours: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            recipient: None,
            command: None,
            status_interval_hours: default_status_interval_hours(),
        }
    }
}

fn default_composer_link_class() -> String {
    "categorysubcatlink".to_string()
}

fn default_piece_link_class() -> String {
    "categorypagelink".to_string()
}

fn default_content_wrapper_class() -> String {
    "mw-content-ltr".to_string()
}

fn default_next_page_text() -> String {
    "next 200".to_string()
}

fn default_fuzz_min_ms() -> u64 {
    3_000
}

fn default_fuzz_max_ms() -> u64 {
    15_000
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_ban_fingerprint() -> String {
    "the site ripping ban script has been triggered".to_string()
}

fn default_evidence_path() -> String {
    "ripping_page.html".to_string()
}

fn default_download_directory() -> String {
    "downloads".to_string()
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["pdf".to_string(), "mid".to_string(), "midi".to_string()]
}

fn default_ledger_path() -> String {
    "downloaded.json".to_string()
}

fn default_search_page_size() -> u32 {
    50
}

fn default_status_interval_hours() -> u64 {
    24
}
