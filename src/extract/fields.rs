//! Label/value parsing of metadata rows
//!
//! Metadata on piece pages is written as runs of inline markup:
//! `<b>Composer:</b> <a href="...">J.S. Bach</a> <b>Title:</b> Mass in B minor`.
//! A bold child opens a label; everything after it up to the next bold child
//! is that label's value.

use scraper::node::Element;
use scraper::{ElementRef, Node, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parsed value of one metadata label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    /// Visible text, compacted
    pub text: String,

    /// Link targets found inside the value, in document order
    pub links: Vec<String>,
}

impl FieldValue {
    pub fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            links: Vec::new(),
        }
    }
}

/// Mapping from label to value
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Parses the children of `row` into labelled fields
///
/// Children before the first bold child are ignored, as are children styled
/// `display:none`. A later occurrence of a label replaces an earlier one.
pub fn parse_labelled_fields(row: ElementRef<'_>) -> FieldMap {
    let mut fields = FieldMap::new();
    let mut current: Option<(String, FieldValue)> = None;

    for child in row.children() {
        match child.value() {
            Node::Element(element) if is_bold(element) => {
                if let Some((label, value)) = current.take() {
                    insert_field(&mut fields, label, value);
                }
                let label = ElementRef::wrap(child)
                    .map(|b| clean_label(&b.text().collect::<String>()))
                    .unwrap_or_default();
                if !label.is_empty() {
                    current = Some((label, FieldValue::default()));
                }
            }
            Node::Element(element) => {
                let Some((_, value)) = current.as_mut() else {
                    continue;
                };
                if is_hidden(element) {
                    continue;
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    value.text.push_str(&child_ref.text().collect::<String>());
                    value.links.extend(collect_links(child_ref));
                }
            }
            Node::Text(text) => {
                if let Some((_, value)) = current.as_mut() {
                    value.text.push_str(text);
                }
            }
            _ => {}
        }
    }

    if let Some((label, value)) = current.take() {
        insert_field(&mut fields, label, value);
    }

    fields
}

fn insert_field(fields: &mut FieldMap, label: String, mut value: FieldValue) {
    value.text = normalize_text(&value.text);
    fields.insert(label, value);
}

/// Strips non-breaking spaces and newlines, then trims
pub fn normalize_text(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .replace(['\n', '\r'], "")
        .trim()
        .to_string()
}

/// Visible label text minus its trailing punctuation
pub fn clean_label(text: &str) -> String {
    normalize_text(text)
        .trim_end_matches([':', ';', ',', '.'])
        .trim_end()
        .to_string()
}

fn is_bold(element: &Element) -> bool {
    matches!(element.name(), "b" | "strong")
}

/// Returns true if the element's inline style hides it
fn is_hidden(element: &Element) -> bool {
    element
        .attr("style")
        .map(|style| {
            let compact: String = style
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase();
            compact.contains("display:none") || compact.contains("visibility:hidden")
        })
        .unwrap_or(false)
}

/// Link targets of an element: itself if it is an anchor, else its descendants
fn collect_links(element: ElementRef<'_>) -> Vec<String> {
    if element.value().name() == "a" {
        return element.value().attr("href").map(str::to_string).into_iter().collect();
    }

    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    element
        .select(&anchor)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn parse_first(html: &str, tag: &str) -> FieldMap {
        let document = Html::parse_fragment(html);
        let selector = Selector::parse(tag).unwrap();
        let row = document.select(&selector).next().unwrap();
        parse_labelled_fields(row)
    }

    #[test]
    fn test_two_labels_in_one_paragraph() {
        let fields = parse_first(
            "<p><b>Composer:</b> J.S. Bach <b>Title:</b> Mass in B minor</p>",
            "p",
        );

        let mut expected = FieldMap::new();
        expected.insert("Composer".to_string(), FieldValue::plain("J.S. Bach"));
        expected.insert("Title".to_string(), FieldValue::plain("Mass in B minor"));
        assert_eq!(fields, expected);
    }

    #[test]
    fn test_links_recorded_separately() {
        let fields = parse_first(
            r#"<p><b>Composer:</b> <a href="/wiki/index.php/Category:Johann_Sebastian_Bach">Johann Sebastian Bach</a></p>"#,
            "p",
        );

        let composer = &fields["Composer"];
        assert_eq!(composer.text, "Johann Sebastian Bach");
        assert_eq!(
            composer.links,
            vec!["/wiki/index.php/Category:Johann_Sebastian_Bach"]
        );
    }

    #[test]
    fn test_nested_links_are_found() {
        let fields = parse_first(
            r#"<p><b>Genre:</b> <span>Sacred, <a href="/wiki/Motets">Motets</a></span></p>"#,
            "p",
        );
        assert_eq!(fields["Genre"].text, "Sacred, Motets");
        assert_eq!(fields["Genre"].links, vec!["/wiki/Motets"]);
    }

    #[test]
    fn test_hidden_children_skipped() {
        let fields = parse_first(
            r#"<p><b>Voicing:</b> SATB<span style="display: none">sort key</span> a cappella</p>"#,
            "p",
        );
        assert_eq!(fields["Voicing"].text, "SATB a cappella");
    }

    #[test]
    fn test_text_before_first_label_ignored() {
        let fields = parse_first("<p>stray text <b>Language:</b> Latin</p>", "p");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["Language"].text, "Latin");
    }

    #[test]
    fn test_normalizes_nbsp_and_newlines() {
        let fields = parse_first("<p><b>First published:</b>\u{a0}1733\n</p>", "p");
        assert_eq!(fields["First published"].text, "1733");
    }

    #[test]
    fn test_clean_label() {
        assert_eq!(clean_label("Composer:"), "Composer");
        assert_eq!(clean_label(" Instruments (optional): "), "Instruments (optional)");
        assert_eq!(clean_label("Pub. year"), "Pub. year");
    }

    #[test]
    fn test_empty_row() {
        let fields = parse_first("<p>No labels here</p>", "p");
        assert!(fields.is_empty());
    }
}
