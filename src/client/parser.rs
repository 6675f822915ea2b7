//! Autoindex directory-listing parser.
//!
//! Turns one Apache/nginx-style listing page into an ordered,
//! de-duplicated list of [`Entry`] values. Two passes run over the
//! document: table rows (`<tr>` with the link in the first `<td>` and
//! size/date in the following cells) and bare anchors (the fallback for
//! `<pre>`-style listings). Both passes share a single dedup set keyed by
//! resolved absolute URL, so a file linked from a table cell and again
//! from a stray anchor yields exactly one entry.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::Entry;

/// Parses a directory listing page fetched from `base`.
///
/// `base` must be the URL of the listing itself, with a trailing slash.
/// Malformed markup is handled leniently by the HTML5 parser; rows and
/// anchors that cannot be interpreted are skipped rather than failing
/// the page.
///
/// # Panics
///
/// Panics only if the static CSS selectors fail to compile, which cannot
/// happen at runtime.
#[must_use]
#[allow(clippy::expect_used)]
pub fn parse_listing(body: &str, base: &Url) -> Vec<Entry> {
    let tr_sel = Selector::parse("tr").expect("static selector");
    let td_sel = Selector::parse("td").expect("static selector");
    let a_sel = Selector::parse("a").expect("static selector");

    let doc = Html::parse_document(body);
    let mut entries = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    // Table pass: link in the first cell, size/date display text after it.
    for row in doc.select(&tr_sel) {
        let cells: Vec<ElementRef<'_>> = row.select(&td_sel).collect();
        let Some(first) = cells.first() else {
            continue; // header rows carry <th> cells
        };
        let Some(anchor) = first.select(&a_sel).next() else {
            continue;
        };
        let Some(mut entry) = entry_from_anchor(anchor, base) else {
            continue;
        };
        if let Some(size_cell) = cells.get(1) {
            entry.size = text_content(size_cell);
        }
        if let Some(date_cell) = cells.get(2) {
            entry.date = text_content(date_cell);
        }
        if seen.insert(entry.url.clone()) {
            entries.push(entry);
        }
    }

    // Anchor pass: <pre>-style listings without table structure.
    for anchor in doc.select(&a_sel) {
        let Some(entry) = entry_from_anchor(anchor, base) else {
            continue;
        };
        if seen.insert(entry.url.clone()) {
            entries.push(entry);
        }
    }

    entries
}

/// Builds an [`Entry`] from one anchor, or rejects it.
fn entry_from_anchor(anchor: ElementRef<'_>, base: &Url) -> Option<Entry> {
    let href = anchor.value().attr("href")?;
    if href.is_empty() || href.starts_with('#') || href.starts_with('?') {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("data:") {
        return None;
    }
    if href == "../" || href == "./" {
        return None;
    }

    // Name priority: title attribute, anchor text, href basename.
    let title = anchor.value().attr("title").unwrap_or("").trim();
    let text: String = anchor.text().collect();
    let mut name = if title.is_empty() {
        text.trim().to_string()
    } else {
        title.to_string()
    };
    if name.is_empty() {
        name = href_basename(href)?;
    }

    if name == "." || name == ".." {
        return None;
    }
    let trimmed = name.trim();
    if trimmed.eq_ignore_ascii_case("parent directory")
        || trimmed.eq_ignore_ascii_case("parent directory/")
    {
        return None;
    }

    let resolved = base.join(href).ok()?;
    if !in_scope(&resolved, base) {
        return None;
    }

    let is_dir = href.ends_with('/');
    let mut name = name.trim_end_matches('/').to_string();
    if let Ok(decoded) = urlencoding::decode(&name) {
        name = decoded.into_owned();
    }
    let name = name.trim().to_string();
    if name.is_empty() {
        return None;
    }

    Some(Entry {
        name,
        url: resolved.to_string(),
        size: String::new(),
        date: String::new(),
        is_dir,
    })
}

/// Returns whether `resolved` is a strict path descendant of the listing
/// scope `base`.
///
/// `base` ends with `/`, so the prefix comparison lands on a path-segment
/// boundary: `/filesomething/dir/` never passes as a child of `/files/`,
/// even though it is a string prefix match without the slash. Sorting
/// links (`?C=N;O=D`) resolve to a query on the base URL and are rejected
/// by the query check.
fn in_scope(resolved: &Url, base: &Url) -> bool {
    if resolved.query().is_some() || resolved.fragment().is_some() {
        return false;
    }
    let base_str = base.as_str();
    let resolved_str = resolved.as_str();
    resolved_str.len() > base_str.len() && resolved_str.starts_with(base_str)
}

/// Last path segment of an href, used when the anchor carries no usable text.
fn href_basename(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        return None;
    }
    let base = path.rsplit('/').next().unwrap_or(path);
    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}

fn text_content(cell: &ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/files/").unwrap()
    }

    // ==================== Table Pass Tests ====================

    #[test]
    fn test_table_row_with_size_and_date() {
        let html = r#"
<html><body><table>
  <tr><th>Name</th><th>Size</th><th>Date</th></tr>
  <tr><td><a href="game.zip">game.zip</a></td><td>1.2M</td><td>2026-01-01 10:00</td></tr>
</table></body></html>"#;

        let entries = parse_listing(html, &base());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "game.zip");
        assert_eq!(entries[0].url, "https://example.com/files/game.zip");
        assert_eq!(entries[0].size, "1.2M");
        assert_eq!(entries[0].date, "2026-01-01 10:00");
        assert!(!entries[0].is_dir);
    }

    #[test]
    fn test_table_and_anchor_dedup_single_entry() {
        // Same file linked from a table cell and a stray anchor.
        let html = r#"
<html><body>
<table><tr><td><a href="game.zip">game.zip</a></td><td>1.2M</td><td>2026-01-01</td></tr></table>
<a href="game.zip">game.zip</a>
</body></html>"#;

        let entries = parse_listing(html, &base());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size, "1.2M", "table row variant wins");
    }

    #[test]
    fn test_directory_detection_and_name_slash_stripped() {
        let html = r#"<table><tr><td><a href="Nintendo%20-%20Game%20Boy/">Nintendo - Game Boy/</a></td><td>-</td><td>2026-01-01</td></tr></table>"#;
        let entries = parse_listing(html, &base());
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].name, "Nintendo - Game Boy");
        assert_eq!(
            entries[0].url,
            "https://example.com/files/Nintendo%20-%20Game%20Boy/"
        );
    }

    // ==================== Anchor Pass Tests ====================

    #[test]
    fn test_pre_listing_fallback() {
        let html = r#"
<html><body><pre>
<a href="?C=N;O=D">Name</a>
<a href="../">Parent Directory</a>
<a href="data:text/html;base64,SGVsbG8=">bad</a>
<a href="Folder/">Folder/</a>
<a href="file%20name.zip">file name.zip</a>
</pre></body></html>"#;

        let entries = parse_listing(html, &base());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Folder");
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].name, "file name.zip");
        assert!(!entries[1].is_dir);
    }

    #[test]
    fn test_title_attribute_takes_priority_over_text() {
        let html = r#"<a href="truncated-na..%3E" title="Full Game Name (USA).zip">Full Game Na..&gt;</a>"#;
        // href with odd encoding still resolves; name comes from title.
        let entries = parse_listing(html, &base());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Full Game Name (USA).zip");
    }

    #[test]
    fn test_basename_fallback_when_no_text() {
        let html = r#"<a href="subdir/archive.zip"></a>"#;
        let entries = parse_listing(html, &base());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "archive.zip");
    }

    // ==================== Rejection Tests ====================

    #[test]
    fn test_rejects_parent_and_self_links() {
        let html = r#"
<a href="../">..</a>
<a href="./">.</a>
<a href="/files/sub/">Parent directory/</a>
<a href="real.zip">real.zip</a>"#;
        let entries = parse_listing(html, &base());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "real.zip");
    }

    #[test]
    fn test_rejects_javascript_and_fragment_links() {
        let html = r##"
<a href="javascript:void(0)">click</a>
<a href="JavaScript:alert(1)">click</a>
<a href="#section">anchor</a>
"##;
        assert!(parse_listing(html, &base()).is_empty());
    }

    #[test]
    fn test_scope_guard_rejects_prefix_lookalike() {
        // /filesomething/ shares a raw string prefix with /files/ but is
        // a sibling, not a descendant - must not leak into the listing.
        let html = r#"
<a href="https://example.com/filesomething/dir/">dir/</a>
<a href="https://example.com/files/ok/">ok/</a>
<a href="https://other.example.com/files/evil/">evil/</a>
"#;
        let entries = parse_listing(html, &base());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "ok");
    }

    #[test]
    fn test_scope_guard_rejects_base_itself() {
        let html = r#"<a href="https://example.com/files/">here</a>"#;
        assert!(parse_listing(html, &base()).is_empty());
    }

    #[test]
    fn test_order_is_first_seen() {
        let html = r#"
<table>
<tr><td><a href="b.zip">b.zip</a></td><td>1K</td><td>d</td></tr>
<tr><td><a href="a.zip">a.zip</a></td><td>2K</td><td>d</td></tr>
</table>"#;
        let entries = parse_listing(html, &base());
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b.zip", "a.zip"]);
    }

    #[test]
    fn test_percent_decoded_names() {
        let html = r#"<a href="Pok%C3%A9mon%20Red%20(USA).zip">Pok%C3%A9mon%20Red%20(USA).zip</a>"#;
        let entries = parse_listing(html, &base());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Pokémon Red (USA).zip");
    }

    #[test]
    fn test_empty_document_yields_no_entries() {
        assert!(parse_listing("", &base()).is_empty());
        assert!(parse_listing("<html><body></body></html>", &base()).is_empty());
    }
}
