//! Link-header pagination.
//!
//! The REST API advertises further pages through an RFC 8288 `Link` header.
//! Two continuation schemes are in use: older endpoints number their pages with
//! a `page` query parameter, newer ones hand out an opaque `cursor`.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// One `<url>; rel="..."` entry of a `Link` header.
static LINK_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<([^>]*)>\s*;\s*rel\s*=\s*"?([^",;]+)"?"#).expect("link header pattern is valid")
});

/// Ordered query pairs. Repeated keys such as `names[]` are kept as-is.
pub type Query = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRelation {
    pub url: String,
    pub rel: String,
}

/// Parses every relation out of a `Link` header value.
pub fn parse_link_header(value: &str) -> Vec<LinkRelation> {
    LINK_ENTRY
        .captures_iter(value)
        .map(|caps| LinkRelation {
            url: caps[1].trim().to_string(),
            rel: caps[2].trim().to_ascii_lowercase(),
        })
        .collect()
}

/// Returns the URL of the first relation named `rel`.
pub fn find_rel<'a>(links: &'a [LinkRelation], rel: &str) -> Option<&'a str> {
    links
        .iter()
        .find(|link| link.rel == rel)
        .map(|link| link.url.as_str())
}

/// Computes the query for the page a "next" link points at.
///
/// A `cursor` in the next URL wins: it is set on the current query and any
/// `page` parameter is removed. Without a cursor, a `page` parameter is carried
/// over instead. `Ok(None)` means the link carries neither and paging stops.
pub fn next_page_query(current: &[(String, String)], next_url: &str) -> Result<Option<Query>, url::ParseError> {
    let next = Url::parse(next_url)?;

    let mut cursor = None;
    let mut page = None;
    for (key, value) in next.query_pairs() {
        match key.as_ref() {
            "cursor" if !value.is_empty() => cursor = Some(value.into_owned()),
            "page" if !value.is_empty() => page = Some(value.into_owned()),
            _ => {}
        }
    }

    let query = if let Some(cursor) = cursor {
        replace_param(current, &["cursor", "page"], ("cursor", cursor))
    } else if let Some(page) = page {
        replace_param(current, &["page"], ("page", page))
    } else {
        return Ok(None);
    };

    Ok(Some(query))
}

fn replace_param(current: &[(String, String)], drop: &[&str], set: (&str, String)) -> Query {
    let mut query: Query = current
        .iter()
        .filter(|(key, _)| !drop.contains(&key.as_str()))
        .cloned()
        .collect();
    query.push((set.0.to_string(), set.1));
    query
}

/// Reads the page number off a "last" relation, for logging.
pub fn last_page(links: &[LinkRelation]) -> Option<String> {
    let last = find_rel(links, "last")?;
    let url = Url::parse(last).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "page")
        .map(|(_, value)| value.into_owned())
}
