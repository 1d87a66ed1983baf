//! Search API result paging
//!
//! The site's search endpoint answers with JSON. Each result page lists its
//! hits under `query.pages.<id>.fullurl`; when more hits remain, the
//! response names the offset of the next page under
//! `query-continue.search.gsroffset` (older servers) or `continue.gsroffset`.

use crate::extract::{fetch_text, ExtractError, ParseError};
use crate::request::RequestGate;
use serde_json::Value;
use url::Url;

/// Adds the page size and, past the first page, the result offset to a
/// search URL
///
/// Existing `gsrlimit`/`gsroffset` parameters are replaced. A URL that does
/// not parse on its own (e.g. a relative one) has the parameters appended as
/// text.
pub fn with_search_paging(url: &str, page_size: u32, offset: Option<u64>) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            let kept: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(k, _)| k != "gsrlimit" && k != "gsroffset")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            {
                let mut query = parsed.query_pairs_mut();
                query.clear();
                query.extend_pairs(kept);
                query.append_pair("gsrlimit", &page_size.to_string());
                if let Some(offset) = offset {
                    query.append_pair("gsroffset", &offset.to_string());
                }
            }
            parsed.to_string()
        }
        Err(_) => {
            let separator = if url.contains('?') { '&' } else { '?' };
            let mut paged = format!("{}{}gsrlimit={}", url, separator, page_size);
            if let Some(offset) = offset {
                paged.push_str(&format!("&gsroffset={}", offset));
            }
            paged
        }
    }
}

/// Full URLs of the hits on one result page, ordered by page id
pub fn search_page_urls(response: &Value) -> Vec<String> {
    let Some(pages) = response.pointer("/query/pages").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut hits: Vec<(i64, String)> = pages
        .iter()
        .filter_map(|(key, page)| {
            let url = page.get("fullurl")?.as_str()?.to_string();
            let order = page
                .get("index")
                .and_then(Value::as_i64)
                .or_else(|| key.parse().ok())
                .unwrap_or(i64::MAX);
            Some((order, url))
        })
        .collect();
    hits.sort_by_key(|(order, _)| *order);
    hits.into_iter().map(|(_, url)| url).collect()
}

/// Offset of the next result page, if the response has one
pub fn next_search_offset(response: &Value) -> Option<u64> {
    ["/query-continue/search/gsroffset", "/continue/gsroffset"]
        .iter()
        .filter_map(|path| response.pointer(path))
        .find_map(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok()))
}

/// Collects the URL of every hit of a search, following its continuation
///
/// # Arguments
///
/// * `gate` - Gate every result page is fetched through
/// * `url` - Search API URL returning JSON
/// * `page_size` - Hits requested per page
pub async fn collect_search_results(
    gate: &mut RequestGate,
    url: &str,
    page_size: u32,
) -> Result<Vec<String>, ExtractError> {
    let mut urls = Vec::new();
    let mut offset = None;

    loop {
        let page_url = with_search_paging(url, page_size, offset);
        let body = fetch_text(gate, &page_url).await?;
        let response: Value = serde_json::from_str(&body)
            .map_err(|e| ExtractError::parse(&page_url, ParseError::Json(e)))?;

        let hits = search_page_urls(&response);
        tracing::info!(
            "Search page at offset {} returned {} result(s)",
            offset.unwrap_or(0),
            hits.len()
        );
        urls.extend(hits);

        match next_search_offset(&response) {
            Some(next) if offset.map_or(true, |current| next > current) => offset = Some(next),
            _ => break,
        }
    }

    Ok(urls)
}
