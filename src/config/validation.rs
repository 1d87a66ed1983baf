use crate::config::types::{
    CatalogConfig, Config, DownloadConfig, NotifyConfig, RequesterConfig, SiteConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_site_config(&config.site)?;
    validate_requester_config(&config.requester)?;
    validate_catalog_config(&config.catalog)?;
    validate_download_config(&config.download)?;
    validate_notify_config(&config.notify)?;
    Ok(())
}

/// Validates the site root and document structure settings
fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    let root = Url::parse(&config.root)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid site root: {}", e)))?;

    if root.scheme() != "http" && root.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "Site root '{}' must use http or https",
            config.root
        )));
    }

    // Relative listing URLs are fine, they are resolved against the root
    root.join(&config.composer_list_url).map_err(|e| {
        ConfigError::InvalidUrl(format!(
            "Invalid composer_list_url '{}': {}",
            config.composer_list_url, e
        ))
    })?;

    for (name, value) in [
        ("composer_link_class", &config.composer_link_class),
        ("piece_link_class", &config.piece_link_class),
        ("content_wrapper_class", &config.content_wrapper_class),
        ("next_page_text", &config.next_page_text),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    if config
        .composer_link_class
        .chars()
        .chain(config.piece_link_class.chars())
        .chain(config.content_wrapper_class.chars())
        .any(|c| c.is_whitespace())
    {
        return Err(ConfigError::Validation(
            "CSS class names cannot contain whitespace".to_string(),
        ));
    }

    Ok(())
}

/// Proxy schemes the HTTP client can tunnel through
const PROXY_SCHEMES: &[&str] = &["http", "https"];

/// Upper bound on the digest interval: one year
const MAX_STATUS_INTERVAL_HOURS: u64 = 24 * 365;

/// Validates fuzzing bounds, proxies and block detection settings
fn validate_requester_config(config: &RequesterConfig) -> Result<(), ConfigError> {
    if config.fuzz_min_ms > config.fuzz_max_ms {
        return Err(ConfigError::Validation(format!(
            "fuzz_min_ms ({}) must not exceed fuzz_max_ms ({})",
            config.fuzz_min_ms, config.fuzz_max_ms
        )));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    for proxy in &config.proxies {
        let url = Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
        if !PROXY_SCHEMES.contains(&url.scheme()) {
            return Err(ConfigError::Validation(format!(
                "Proxy '{}' must use one of: {}",
                proxy,
                PROXY_SCHEMES.join(", ")
            )));
        }
    }

    if config.ban_fingerprint.trim().is_empty() {
        return Err(ConfigError::Validation(
            "ban_fingerprint cannot be empty".to_string(),
        ));
    }

    if config.evidence_path.is_empty() {
        return Err(ConfigError::Validation(
            "evidence_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_catalog_config(config: &CatalogConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_download_config(config: &DownloadConfig) -> Result<(), ConfigError> {
    if config.directory.is_empty() {
        return Err(ConfigError::Validation(
            "download directory cannot be empty".to_string(),
        ));
    }

    if config.ledger_path.is_empty() {
        return Err(ConfigError::Validation(
            "ledger_path cannot be empty".to_string(),
        ));
    }

    if config.allowed_extensions.is_empty() {
        return Err(ConfigError::Validation(
            "allowed_extensions must list at least one extension".to_string(),
        ));
    }

    for ext in &config.allowed_extensions {
        if ext.is_empty() || ext.starts_with('.') || !ext.chars().all(|c| c.is_alphanumeric()) {
            return Err(ConfigError::Validation(format!(
                "Invalid extension '{}': use bare alphanumeric extensions like 'pdf'",
                ext
            )));
        }
    }

    if config.search_page_size < 1 || config.search_page_size > 500 {
        return Err(ConfigError::Validation(format!(
            "search_page_size must be between 1 and 500, got {}",
            config.search_page_size
        )));
    }

    Ok(())
}

fn validate_notify_config(config: &NotifyConfig) -> Result<(), ConfigError> {
    if let Some(recipient) = &config.recipient {
        validate_email(recipient)?;
    }

    if let Some(command) = &config.command {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(ConfigError::Validation(
                "notify command must name a program".to_string(),
            ));
        }
        if config.recipient.is_none() {
            return Err(ConfigError::Validation(
                "notify command requires a recipient".to_string(),
            ));
        }
    }

    if config.status_interval_hours == 0
        || config.status_interval_hours > MAX_STATUS_INTERVAL_HOURS
    {
        return Err(ConfigError::Validation(format!(
            "status_interval_hours must be between 1 and {}, got {}",
            MAX_STATUS_INTERVAL_HOURS, config.status_interval_hours
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("ops@example.com").is_ok());
        assert!(validate_email("admin@sub.example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());
    }

    #[test]
    fn test_fuzz_bounds_must_be_ordered() {
        let config = RequesterConfig {
            fuzz_min_ms: 10_000,
            fuzz_max_ms: 5_000,
            ..RequesterConfig::default()
        };
        assert!(matches!(
            validate_requester_config(&config),
            Err(ConfigError::Validation(_))
        ));

        let equal = RequesterConfig {
            fuzz_min_ms: 5_000,
            fuzz_max_ms: 5_000,
            ..RequesterConfig::default()
        };
        assert!(validate_requester_config(&equal).is_ok());
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let config = RequesterConfig {
            proxies: vec!["not a proxy".to_string()],
            ..RequesterConfig::default()
        };
        assert!(matches!(
            validate_requester_config(&config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_unsupported_proxy_scheme_rejected() {
        let config = RequesterConfig {
            proxies: vec!["ftp://10.0.0.1:21".to_string()],
            ..RequesterConfig::default()
        };
        assert!(matches!(
            validate_requester_config(&config),
            Err(ConfigError::Validation(_))
        ));

        let supported = RequesterConfig {
            proxies: vec![
                "http://10.0.0.1:8080".to_string(),
                "https://10.0.0.2:8443".to_string(),
            ],
            ..RequesterConfig::default()
        };
        assert!(validate_requester_config(&supported).is_ok());
    }

    #[test]
    fn test_extensions_must_be_bare() {
        let config = DownloadConfig {
            allowed_extensions: vec![".pdf".to_string()],
            ..DownloadConfig::default()
        };
        assert!(validate_download_config(&config).is_err());

        let empty = DownloadConfig {
            allowed_extensions: vec![],
            ..DownloadConfig::default()
        };
        assert!(validate_download_config(&empty).is_err());

        assert!(validate_download_config(&DownloadConfig::default()).is_ok());
    }

    #[test]
    fn test_notify_command_needs_recipient() {
        let config = NotifyConfig {
            recipient: None,
            command: Some(vec!["sendmail".to_string(), "-t".to_string()]),
            status_interval_hours: 24,
        };
        assert!(validate_notify_config(&config).is_err());
    }

    #[test]
    fn test_status_interval_bounds() {
        let interval = |hours| NotifyConfig {
            recipient: None,
            command: None,
            status_interval_hours: hours,
        };
        assert!(validate_notify_config(&interval(0)).is_err());
        assert!(validate_notify_config(&interval(u64::MAX)).is_err());
        assert!(validate_notify_config(&interval(MAX_STATUS_INTERVAL_HOURS + 1)).is_err());
        assert!(validate_notify_config(&interval(24)).is_ok());
        assert!(validate_notify_config(&interval(MAX_STATUS_INTERVAL_HOURS)).is_ok());
    }
}
