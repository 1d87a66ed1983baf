//! Category listing extraction
//!
//! Category pages list their members in a content container. Some pages nest
//! containers of the same class to separate unrelated tabs; the member links
//! live in the innermost one. Long categories are split over several pages
//! chained by a "next page" link.

use crate::config::SiteConfig;
use crate::extract::{fetch_text, selector, ExtractError, ParseError};
use crate::request::RequestGate;
use scraper::{ElementRef, Html};
use std::collections::HashSet;

/// Deepest container nesting accepted before the page counts as malformed
const MAX_CONTAINER_NESTING: usize = 32;

/// Fixed parts of the listing layout
#[derive(Debug, Clone)]
pub struct ListingRules {
    /// Class of the content container
    pub wrapper_class: String,

    /// Exact text of the next-page link
    pub next_page_text: String,
}

impl ListingRules {
    pub fn from_site(site: &SiteConfig) -> Self {
        Self {
            wrapper_class: site.content_wrapper_class.clone(),
            next_page_text: site.next_page_text.clone(),
        }
    }
}

/// One member link of a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLink {
    /// Link text
    pub name: String,

    /// Link target as written in the page
    pub url: String,
}

/// Links and continuation of a single listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub links: Vec<ListingLink>,
    pub next_page: Option<String>,
}

/// Parses one listing page
///
/// # Arguments
///
/// * `html` - The page markup
/// * `link_class` - Class of the member links to collect
/// * `rules` - Container class and next-page link text
///
/// # Returns
///
/// * `Ok(ListingPage)` - Links of the innermost container, in document order
/// * `Err(ParseError)` - No container, or containers nested implausibly deep
pub fn parse_listing_page(
    html: &str,
    link_class: &str,
    rules: &ListingRules,
) -> Result<ListingPage, ParseError> {
    let document = Html::parse_document(html);
    let wrapper = selector(&format!("div.{}", rules.wrapper_class))?;
    let member = selector(&format!("a.{}", link_class))?;
    let anchor = selector("a[href]")?;

    let outer = document
        .select(&wrapper)
        .next()
        .ok_or_else(|| ParseError::MissingContainer(rules.wrapper_class.clone()))?;
    let inner = innermost_container(outer, &wrapper)?;

    let links = inner
        .select(&member)
        .filter_map(|a| {
            let url = a.value().attr("href")?.trim();
            if url.is_empty() {
                return None;
            }
            Some(ListingLink {
                name: a.text().collect::<String>().trim().to_string(),
                url: url.to_string(),
            })
        })
        .collect();

    let next_page = outer
        .select(&anchor)
        .find(|a| a.text().collect::<String>().trim() == rules.next_page_text)
        .and_then(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty());

    Ok(ListingPage { links, next_page })
}

/// Descends into nested containers of the same class until none remain
fn innermost_container<'a>(
    outer: ElementRef<'a>,
    wrapper: &scraper::Selector,
) -> Result<ElementRef<'a>, ParseError> {
    let mut current = outer;

    for _ in 0..MAX_CONTAINER_NESTING {
        // `select` may yield the scope element itself
        let nested = current.select(wrapper).find(|e| e.id() != current.id());
        match nested {
            Some(inner) => current = inner,
            None => return Ok(current),
        }
    }

    Err(ParseError::NestingTooDeep(MAX_CONTAINER_NESTING))
}

/// Collects every member link of a listing, following its pagination
///
/// Pages are followed strictly forward: a next-page link pointing at a page
/// already visited ends the walk.
///
/// # Arguments
///
/// * `gate` - Gate every page is fetched through
/// * `url` - First page of the listing (absolute or relative to the site root)
/// * `link_class` - Class of the member links to collect
/// * `rules` - Container class and next-page link text
pub async fn collect_listing(
    gate: &mut RequestGate,
    url: &str,
    link_class: &str,
    rules: &ListingRules,
) -> Result<Vec<ListingLink>, ExtractError> {
    let mut all_links = Vec::new();
    let mut visited = HashSet::new();
    let mut page_url = url.to_string();
    let mut page_count = 0usize;

    loop {
        let resolved = gate
            .resolve(&page_url)
            .map_err(|e| ExtractError::fetch(&page_url, e))?;
        visited.insert(resolved.to_string());

        let html = fetch_text(gate, &page_url).await?;
        let page = parse_listing_page(&html, link_class, rules)
            .map_err(|e| ExtractError::parse(&page_url, e))?;

        page_count += 1;
        tracing::info!(
            "Scraped {} page(s) of links from {} ({} links so far)",
            page_count,
            url,
            all_links.len() + page.links.len()
        );
        all_links.extend(page.links);

        let Some(next) = page.next_page else {
            break;
        };

        let next_resolved = gate
            .resolve(&next)
            .map_err(|e| ExtractError::fetch(&next, e))?;
        if visited.contains(next_resolved.as_str()) {
            tracing::warn!(
                "Listing {} links back to an already visited page {}; stopping",
                url,
                next_resolved
            );
            break;
        }

        page_url = next;
    }

    Ok(all_links)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ListingRules {
        ListingRules {
            wrapper_class: "mw-content-ltr".to_string(),
            next_page_text: "next 200".to_string(),
        }
    }

    #[test]
    fn test_collects_target_class_only() {
        let html = r#"<html><body><div class="mw-content-ltr">
            <a class="categorysubcatlink" href="/wiki/index.php/Category:Josquin_des_Prez">Josquin des Prez</a>
            <a class="categorypagelink" href="/wiki/index.php/Ave_Maria">Ave Maria</a>
            <a class="categorysubcatlink" href="/wiki/index.php/Category:Thomas_Tallis">Thomas Tallis</a>
        </div></body></html>"#;

        let page = parse_listing_page(html, "categorysubcatlink", &rules()).unwrap();

        assert_eq!(
            page.links,
            vec![
                ListingLink {
                    name: "Josquin des Prez".to_string(),
                    url: "/wiki/index.php/Category:Josquin_des_Prez".to_string(),
                },
                ListingLink {
                    name: "Thomas Tallis".to_string(),
                    url: "/wiki/index.php/Category:Thomas_Tallis".to_string(),
                },
            ]
        );
        assert_eq!(page.next_page, None);
    }

    #[test]
    fn test_uses_innermost_container() {
        let html = r#"<html><body><div class="mw-content-ltr">
            <a class="categorypagelink" href="/wiki/index.php/Unrelated_tab">Unrelated</a>
            <div class="mw-content-ltr">
                <div class="mw-content-ltr">
                    <a class="categorypagelink" href="/wiki/index.php/Spem_in_alium">Spem in alium</a>
                </div>
            </div>
            <a href="/wiki/index.php?title=Category:Thomas_Tallis&amp;pagefrom=S">next 200</a>
        </div></body></html>"#;

        let page = parse_listing_page(html, "categorypagelink", &rules()).unwrap();

        assert_eq!(page.links.len(), 1);
        assert_eq!(page.links[0].name, "Spem in alium");
        assert_eq!(
            page.next_page.as_deref(),
            Some("/wiki/index.php?title=Category:Thomas_Tallis&pagefrom=S")
        );
    }

    #[test]
    fn test_missing_container_is_parse_error() {
        let html = r#"<html><body><a class="categorypagelink" href="/x">X</a></body></html>"#;
        let result = parse_listing_page(html, "categorypagelink", &rules());
        assert!(matches!(result, Err(ParseError::MissingContainer(_))));
    }

    #[test]
    fn test_excessive_nesting_is_parse_error() {
        let depth = MAX_CONTAINER_NESTING + 2;
        let html = format!(
            "<html><body>{}<a class=\"categorypagelink\" href=\"/x\">X</a>{}</body></html>",
            "<div class=\"mw-content-ltr\">".repeat(depth),
            "</div>".repeat(depth)
        );
        let result = parse_listing_page(&html, "categorypagelink", &rules());
        assert!(matches!(result, Err(ParseError::NestingTooDeep(_))));
    }

    #[test]
    fn test_anchor_without_href_skipped() {
        let html = r#"<html><body><div class="mw-content-ltr">
            <a class="categorypagelink">Broken</a>
            <a class="categorypagelink" href="/wiki/index.php/Gloria">Gloria</a>
        </div></body></html>"#;
        let page = parse_listing_page(html, "categorypagelink", &rules()).unwrap();
        assert_eq!(page.links.len(), 1);
        assert_eq!(page.links[0].url, "/wiki/index.php/Gloria");
    }
}
