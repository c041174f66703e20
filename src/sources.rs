use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Denormalized parent-document reference carried on every search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

/// One paragraph-level match used as grounding evidence for a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub paragraph_id: String,
    pub text: String,
    pub score: f64,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_path: Option<String>,
    pub document: DocumentRef,
}

/// Internet-search-mode source record, positionally aligned with the
/// message's `search_results` by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedCitation {
    pub index: usize,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub last_updated: String,
}

/// Search results of one assistant message that share a parent document,
/// in first-seen order with a stable 1-based index.
#[derive(Debug, Clone)]
pub struct SourceGroup {
    pub doc_index: usize,
    pub document: DocumentRef,
    pub results: Vec<SearchResult>,
    /// Sorted unique pages contributing to this group.
    pub pages: Vec<u32>,
}

/// Where a citation click should land: a document opened at a page.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationTarget {
    pub document_id: String,
    pub page: u32,
}

fn effective_page(page: Option<i64>) -> u32 {
    match page {
        Some(p) if p > 0 => p as u32,
        _ => 1,
    }
}

/// Group one message's results by parent document, preserving the order in
/// which each document first appears in the backend response.
pub fn group_results(results: &[SearchResult]) -> Vec<SourceGroup> {
    let mut groups: Vec<SourceGroup> = Vec::new();
    for result in results {
        match groups.iter().position(|g| g.document.id == result.document.id) {
            Some(i) => groups[i].results.push(result.clone()),
            None => groups.push(SourceGroup {
                doc_index: groups.len() + 1,
                document: result.document.clone(),
                results: vec![result.clone()],
                pages: Vec::new(),
            }),
        }
    }
    for group in &mut groups {
        let mut pages: Vec<u32> = group
            .results
            .iter()
            .map(|r| effective_page(r.page))
            .collect();
        pages.sort_unstable();
        pages.dedup();
        group.pages = pages;
    }
    groups
}

/// Render a group's citation marker, e.g. `[2, P. 3,7]`.
pub fn marker(group: &SourceGroup) -> String {
    let pages: Vec<String> = group.pages.iter().map(|p| p.to_string()).collect();
    format!("[{}, P. {}]", group.doc_index, pages.join(","))
}

static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(\d+), P\. (\d+(?:,\d+)*)\]$").unwrap());

/// Resolve a marker back to its group: the first result's document, opened
/// at the first listed page.
pub fn resolve_marker(marker: &str, groups: &[SourceGroup]) -> Option<CitationTarget> {
    let caps = MARKER.captures(marker.trim())?;
    let doc_index: usize = caps[1].parse().ok()?;
    let group = match groups.iter().find(|g| g.doc_index == doc_index) {
        Some(group) => group,
        None => {
            log::warn!("citation marker {} has no matching source group", marker);
            return None;
        }
    };
    let page = group.pages.first().copied().unwrap_or(1);
    Some(CitationTarget {
        document_id: group.document.id.clone(),
        page,
    })
}

/// Internet mode: a formatted citation's 1-based index maps into the
/// message's parallel `search_results` array. The alignment is a backend
/// contract — there is no shared key to verify against, so an index out of
/// range is logged and ignored.
pub fn resolve_internet_citation<'a>(
    citation: &FormattedCitation,
    results: &'a [SearchResult],
) -> Option<&'a SearchResult> {
    if citation.index == 0 || citation.index > results.len() {
        log::warn!(
            "formatted citation index {} out of range for {} search results",
            citation.index,
            results.len()
        );
        return None;
    }
    Some(&results[citation.index - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(doc: &str, para: &str, page: Option<i64>) -> SearchResult {
        SearchResult {
            paragraph_id: para.to_string(),
            text: format!("paragraph {}", para),
            score: 0.8,
            page,
            section_path: Some("1 Introduction".to_string()),
            document: DocumentRef {
                id: doc.to_string(),
                title: format!("Doc {}", doc),
                filename: Some(format!("{}.pdf", doc)),
                authors: None,
                year: None,
            },
        }
    }

    #[test]
    fn groups_in_first_seen_order() {
        let mut results = Vec::new();
        for i in 0..15 {
            results.push(result(
                ["a", "b", "c"][i % 3],
                &format!("p{}", i),
                Some((i as i64 % 4) + 1),
            ));
        }
        let groups = group_results(&results);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].doc_index, 1);
        assert_eq!(groups[0].document.id, "a");
        assert_eq!(groups[1].doc_index, 2);
        assert_eq!(groups[2].doc_index, 3);
        assert_eq!(groups[0].results.len(), 5);
    }

    #[test]
    fn pages_are_sorted_and_unique() {
        let results = vec![
            result("a", "p1", Some(7)),
            result("a", "p2", Some(3)),
            result("a", "p3", Some(7)),
            result("a", "p4", None),
        ];
        let groups = group_results(&results);
        assert_eq!(groups[0].pages, vec![1, 3, 7]);
        assert_eq!(marker(&groups[0]), "[1, P. 1,3,7]");
    }

    #[test]
    fn marker_resolves_to_first_page() {
        let results = vec![
            result("a", "p1", Some(5)),
            result("b", "p2", Some(2)),
            result("b", "p3", Some(9)),
        ];
        let groups = group_results(&results);
        let target = resolve_marker("[2, P. 2,9]", &groups).unwrap();
        assert_eq!(target, CitationTarget { document_id: "b".to_string(), page: 2 });
    }

    #[test]
    fn non_positive_pages_default_to_one() {
        let results = vec![result("a", "p1", Some(0)), result("a", "p2", Some(-3))];
        let groups = group_results(&results);
        let target = resolve_marker(&marker(&groups[0]), &groups).unwrap();
        assert_eq!(target.page, 1);
    }

    #[test]
    fn unknown_marker_is_none() {
        let groups = group_results(&[result("a", "p1", Some(1))]);
        assert!(resolve_marker("[9, P. 1]", &groups).is_none());
        assert!(resolve_marker("not a marker", &groups).is_none());
    }

    #[test]
    fn internet_citation_maps_positionally() {
        let results: Vec<SearchResult> = (0..15)
            .map(|i| result("web", &format!("p{}", i), None))
            .collect();
        let citation = FormattedCitation {
            index: 7,
            title: "Source".to_string(),
            url: "https://example.org".to_string(),
            date: String::new(),
            snippet: String::new(),
            last_updated: String::new(),
        };
        let hit = resolve_internet_citation(&citation, &results).unwrap();
        assert_eq!(hit.paragraph_id, "p6");
    }

    #[test]
    fn out_of_range_internet_citation_is_ignored() {
        let results = vec![result("web", "p0", None)];
        let citation = FormattedCitation {
            index: 4,
            title: String::new(),
            url: String::new(),
            date: String::new(),
            snippet: String::new(),
            last_updated: String::new(),
        };
        assert!(resolve_internet_citation(&citation, &results).is_none());
    }
}
