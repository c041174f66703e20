use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Bibliographic record for a single paper, as assembled from workspace
/// document metadata or an arXiv import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BibRecord {
    pub id: String,
    pub title: String,
    /// Comma-separated author names. A string without separators is
    /// treated as a single author.
    pub authors: String,
    pub year: Option<i32>,
    pub journal: Option<String>,
    pub doi: Option<String>,
    pub arxiv_id: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitationStyle {
    BibTex,
    Apa,
    Mla,
    Chicago,
}

impl CitationStyle {
    pub fn label(&self) -> &'static str {
        match self {
            CitationStyle::BibTex => "BibTeX",
            CitationStyle::Apa => "APA",
            CitationStyle::Mla => "MLA",
            CitationStyle::Chicago => "Chicago",
        }
    }
}

fn split_authors(authors: &str) -> Vec<&str> {
    authors
        .split(',')
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect()
}

/// Collapse an author list for APA: more than seven authors become the
/// first six, an ellipsis, and the last.
fn apa_authors(authors: &str) -> String {
    let names = split_authors(authors);
    if names.len() > 7 {
        format!("{}, ... {}", names[..6].join(", "), names[names.len() - 1])
    } else {
        names.join(", ")
    }
}

/// First author plus "et al." when there is more than one.
pub fn short_authors(authors: &str) -> String {
    let names = split_authors(authors);
    match names.len() {
        0 => String::new(),
        1 => names[0].to_string(),
        _ => format!("{} et al.", names[0]),
    }
}

pub fn format_citation(record: &BibRecord, style: CitationStyle) -> String {
    match style {
        CitationStyle::BibTex => format_bibtex(record),
        CitationStyle::Apa => format_apa(record),
        CitationStyle::Mla => format_mla(record),
        CitationStyle::Chicago => format_chicago(record),
    }
}

fn format_bibtex(record: &BibRecord) -> String {
    let entry_type = if record.journal.is_some() { "article" } else { "misc" };
    let mut out = format!("@{}{{{},\n", entry_type, record.id);

    let names = split_authors(&record.authors);
    if !names.is_empty() {
        out.push_str(&format!("  author = {{{}}},\n", names.join(" and ")));
    }
    out.push_str(&format!("  title = {{{}}},\n", record.title));
    if let Some(year) = record.year {
        out.push_str(&format!("  year = {{{}}},\n", year));
    }
    if let Some(journal) = &record.journal {
        out.push_str(&format!("  journal = {{{}}},\n", journal));
    }
    if let Some(doi) = &record.doi {
        out.push_str(&format!("  doi = {{{}}},\n", doi));
    }
    if let Some(arxiv_id) = &record.arxiv_id {
        out.push_str(&format!("  eprint = {{{}}},\n", arxiv_id));
        out.push_str("  archivePrefix = {arXiv},\n");
    }
    if let Some(url) = &record.url {
        out.push_str(&format!("  url = {{{}}},\n", url));
    }
    out.push('}');
    out
}

fn format_apa(record: &BibRecord) -> String {
    let mut out = String::new();
    let authors = apa_authors(&record.authors);
    if !authors.is_empty() {
        out.push_str(&authors);
        out.push(' ');
    }
    if let Some(year) = record.year {
        out.push_str(&format!("({}). ", year));
    }
    out.push_str(&format!("{}. ", record.title));
    if let Some(journal) = &record.journal {
        out.push_str(&format!("{}. ", journal));
    }
    if let Some(doi) = &record.doi {
        out.push_str(&format!("https://doi.org/{}", doi));
    } else if let Some(url) = &record.url {
        out.push_str(url);
    }
    out.trim_end().to_string()
}

fn format_mla(record: &BibRecord) -> String {
    let mut out = String::new();
    let authors = short_authors(&record.authors);
    if !authors.is_empty() {
        out.push_str(&format!("{}. ", authors));
    }
    out.push_str(&format!("\"{}.\" ", record.title));
    if let Some(journal) = &record.journal {
        out.push_str(&format!("{}, ", journal));
    }
    if let Some(year) = record.year {
        out.push_str(&format!("{}, ", year));
    }
    if let Some(doi) = &record.doi {
        out.push_str(&format!("doi:{}.", doi));
    } else if let Some(url) = &record.url {
        out.push_str(&format!("{}.", url));
    }
    out.trim_end().to_string()
}

fn format_chicago(record: &BibRecord) -> String {
    let mut out = String::new();
    let authors = short_authors(&record.authors);
    if !authors.is_empty() {
        out.push_str(&format!("{}. ", authors));
    }
    out.push_str(&format!("\"{}.\" ", record.title));
    if let Some(journal) = &record.journal {
        out.push_str(journal);
        if let Some(year) = record.year {
            out.push_str(&format!(" ({})", year));
        }
        out.push_str(". ");
    } else if let Some(year) = record.year {
        out.push_str(&format!("{}. ", year));
    }
    if let Some(doi) = &record.doi {
        out.push_str(&format!("https://doi.org/{}.", doi));
    } else if let Some(url) = &record.url {
        out.push_str(&format!("{}.", url));
    }
    out.trim_end().to_string()
}

static BIBTEX_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@(\w+)\s*\{\s*([^,\s]+)\s*,").unwrap());
static BIBTEX_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+)\s*=\s*\{([^{}]*)\}").unwrap());

/// Parse a BibTeX entry back into a record. Only the fields emitted by
/// `format_bibtex` are recognized; unknown fields are ignored.
pub fn parse_bibtex(entry: &str) -> Option<BibRecord> {
    let header = BIBTEX_HEADER.captures(entry)?;
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    for cap in BIBTEX_FIELD.captures_iter(entry) {
        fields.insert(cap[1].to_lowercase(), cap[2].to_string());
    }

    let mut record = BibRecord {
        id: header[2].to_string(),
        title: fields.remove("title").unwrap_or_default(),
        ..Default::default()
    };
    if let Some(author) = fields.remove("author") {
        record.authors = author
            .split(" and ")
            .map(|a| a.trim())
            .collect::<Vec<_>>()
            .join(", ");
    }
    record.year = fields.remove("year").and_then(|y| y.parse().ok());
    record.journal = fields.remove("journal");
    record.doi = fields.remove("doi");
    record.arxiv_id = fields.remove("eprint");
    record.url = fields.remove("url");
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BibRecord {
        BibRecord {
            id: "smith2023".to_string(),
            title: "Retrieval at Scale".to_string(),
            authors: "Jane Smith, Wei Chen".to_string(),
            year: Some(2023),
            journal: Some("Journal of IR".to_string()),
            doi: Some("10.1000/xyz".to_string()),
            arxiv_id: Some("2301.00001".to_string()),
            url: Some("https://arxiv.org/abs/2301.00001".to_string()),
        }
    }

    #[test]
    fn bibtex_uses_article_when_journal_present() {
        let out = format_bibtex(&sample());
        assert!(out.starts_with("@article{smith2023,"));
        assert!(out.contains("author = {Jane Smith and Wei Chen}"));
        assert!(out.contains("archivePrefix = {arXiv}"));
    }

    #[test]
    fn bibtex_falls_back_to_misc() {
        let mut record = sample();
        record.journal = None;
        assert!(format_bibtex(&record).starts_with("@misc{"));
    }

    #[test]
    fn bibtex_round_trip_preserves_fields() {
        let original = sample();
        let parsed = parse_bibtex(&format_bibtex(&original)).unwrap();
        assert_eq!(parsed.id, original.id);
        assert_eq!(parsed.title, original.title);
        assert_eq!(parsed.authors, original.authors);
        assert_eq!(parsed.year, original.year);
        assert_eq!(parsed.journal, original.journal);
        assert_eq!(parsed.doi, original.doi);
        assert_eq!(parsed.arxiv_id, original.arxiv_id);
        assert_eq!(parsed.url, original.url);
    }

    #[test]
    fn apa_collapses_more_than_seven_authors() {
        let mut record = sample();
        record.authors = "A, B, C, D, E, F, G, H".to_string();
        let out = format_apa(&record);
        assert!(out.starts_with("A, B, C, D, E, F, ... H"));
    }

    #[test]
    fn apa_keeps_seven_authors() {
        let mut record = sample();
        record.authors = "A, B, C, D, E, F, G".to_string();
        assert!(format_apa(&record).starts_with("A, B, C, D, E, F, G"));
    }

    #[test]
    fn apa_prefers_doi_over_url() {
        let out = format_apa(&sample());
        assert!(out.ends_with("https://doi.org/10.1000/xyz"));
    }

    #[test]
    fn mla_shortens_author_list() {
        let out = format_mla(&sample());
        assert!(out.starts_with("Jane Smith et al."));
        assert!(out.contains("\"Retrieval at Scale.\""));
    }

    #[test]
    fn chicago_places_year_with_journal() {
        let out = format_citation(&sample(), CitationStyle::Chicago);
        assert!(out.starts_with("Jane Smith et al."));
        assert!(out.contains("Journal of IR (2023)."));
        assert!(out.ends_with("https://doi.org/10.1000/xyz."));
    }

    #[test]
    fn single_author_has_no_et_al() {
        assert_eq!(short_authors("Jane Smith"), "Jane Smith");
    }

    #[test]
    fn malformed_author_string_is_one_author() {
        assert_eq!(short_authors("Jane Smith and Wei Chen"), "Jane Smith and Wei Chen");
    }
}
