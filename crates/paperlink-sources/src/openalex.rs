//! OpenAlex works API
//!
//! Title search goes through `/works?search=` (one request per title, best
//! hit chosen locally by string similarity). Records are fetched in batches
//! with `filter=openalex_id:W1|W2|…` or `filter=doi:…`.

use std::collections::HashMap;
use std::sync::Arc;

use paperlink_core::paper::{normalize_arxiv_id, normalize_doi, normalize_openalex_id};
use paperlink_core::{Clock, PaperHash, PaperIdentifiers, SourceError, SourceRecord};
use serde_json::Value;

use crate::abstract_decode::decode_abstract;
use crate::client::{Capabilities, FieldSet, SourceClient, SourceHttp, TitleQuery, effective_batch_size};
use crate::config::SourceSettings;
use crate::matching::{Candidate, best_match};

pub const NAME: &str = "openalex";

const BASE_URL: &str = "https://api.openalex.org";
/// OR-filters accept at most 50 values
const MAX_BATCH: usize = 50;
const DEFAULT_RATE: f64 = 10.0;
const SEARCH_PER_PAGE: &str = "5";
const SEARCH_SELECT: &str = "id,display_name,publication_year";
const IDENTIFIER_SELECT: &str = "id,doi,ids,display_name,publication_year";
const FULL_SELECT: &str = "id,doi,ids,display_name,publication_year,cited_by_count,abstract_inverted_index,authorships,primary_location,open_access";

/// DOI prefix under which arXiv registers its preprints
const ARXIV_DOI_PREFIX: &str = "10.48550/arxiv.";

pub struct OpenAlexClient {
    http: SourceHttp,
    base_url: String,
    api_key: Option<String>,
    mailto: Option<String>,
    match_threshold: f64,
    batch_size: usize,
}

impl OpenAlexClient {
    pub fn new(settings: &SourceSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            http: SourceHttp::new(NAME, settings, DEFAULT_RATE, clock),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: settings.api_key().map(String::from),
            mailto: settings.mailto.clone(),
            match_threshold: settings.match_threshold,
            batch_size: effective_batch_size(MAX_BATCH, settings.max_batch_size),
        }
    }

    fn works_url(&self) -> String {
        format!("{}/works", self.base_url)
    }

    fn query_params(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut params = extra.to_vec();
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    fn search_title(&self, query: &TitleQuery) -> Result<Option<String>, SourceError> {
        let params = self.query_params(&[
            ("search", query.title.clone()),
            ("per-page", SEARCH_PER_PAGE.to_string()),
            ("select", SEARCH_SELECT.to_string()),
        ]);
        let body = match self
            .http
            .send("title search", |c| c.get(self.works_url()).query(&params))
        {
            Ok(body) => body,
            Err(e) if e.is_permanent() => {
                log::debug!("openalex: no result for {}: {e}", query.hash.short());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let candidates = parse_search_candidates(&body)?;
        Ok(best_match(&query.title, query.year, &candidates, self.match_threshold).map(|c| c.id.clone()))
    }

    /// Run one OR-filter query and return the raw works.
    fn filter_works(&self, filter: String, count: usize, fields: FieldSet) -> Result<Vec<Value>, SourceError> {
        let select = match fields {
            FieldSet::Identifiers => IDENTIFIER_SELECT,
            FieldSet::Full => FULL_SELECT,
        };
        let params = self.query_params(&[
            ("filter", filter),
            ("per-page", count.to_string()),
            ("select", select.to_string()),
        ]);
        let body = self
            .http
            .send("batch fetch", |c| c.get(self.works_url()).query(&params))?;
        results_array(&body).map(|r| r.to_vec())
    }
}

impl SourceClient for OpenAlexClient {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_batch_size: self.batch_size,
            supports_batch_lookup: true,
            supports_title_search: true,
        }
    }

    fn find_candidates(&self, queries: &[TitleQuery]) -> Result<HashMap<PaperHash, String>, SourceError> {
        let mut found = HashMap::new();
        for query in queries {
            if let Some(id) = self.search_title(query)? {
                found.insert(query.hash.clone(), id);
            }
        }
        Ok(found)
    }

    fn fetch_fields(&self, ids: &[String], fields: FieldSet) -> Result<HashMap<String, SourceRecord>, SourceError> {
        let ids: Vec<String> = ids.iter().filter_map(|id| normalize_openalex_id(id)).collect();
        let mut out = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(self.batch_size) {
            let filter = format!("openalex_id:{}", chunk.join("|"));
            for work in self.filter_works(filter, chunk.len(), fields)? {
                if let Some(record) = parse_work(&work, fields) {
                    if let Some(id) = record.source_id.clone() {
                        out.insert(id, record);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Lookup by DOI. Papers with only an arXiv or PubMed id are not sent.
    fn fetch_by_external_ids(
        &self,
        papers: &[(PaperHash, PaperIdentifiers)],
    ) -> Result<HashMap<PaperHash, SourceRecord>, SourceError> {
        let by_doi: Vec<(String, &PaperHash)> = papers
            .iter()
            .filter_map(|(hash, ids)| Some((ids.doi.as_deref().and_then(normalize_doi)?, hash)))
            .collect();

        let mut out = HashMap::new();
        for chunk in by_doi.chunks(self.batch_size) {
            let filter = format!(
                "doi:{}",
                chunk.iter().map(|(doi, _)| doi.as_str()).collect::<Vec<_>>().join("|")
            );
            let works = self.filter_works(filter, chunk.len(), FieldSet::Full)?;
            assign_by_doi(chunk, &works, &mut out);
        }
        Ok(out)
    }

    fn internal_id(&self, ids: &PaperIdentifiers) -> Option<String> {
        ids.openalex_id.as_deref().and_then(normalize_openalex_id)
    }

    fn api_calls(&self) -> u64 {
        self.http.calls()
    }
}

/// Hand each work's record to every paper carrying its DOI. Distinct papers
/// may share a DOI, so one work can fill several entries.
fn assign_by_doi(
    chunk: &[(String, &PaperHash)],
    works: &[Value],
    out: &mut HashMap<PaperHash, SourceRecord>,
) {
    let mut index: HashMap<&str, Vec<&PaperHash>> = HashMap::new();
    for (doi, hash) in chunk {
        index.entry(doi.as_str()).or_default().push(*hash);
    }
    for work in works {
        let Some(record) = parse_work(work, FieldSet::Full) else { continue };
        let Some(hashes) = record.identifiers.doi.as_deref().and_then(|d| index.get(d)) else {
            continue;
        };
        for hash in hashes {
            out.insert((*hash).clone(), record.clone());
        }
    }
}

fn results_array(body: &Value) -> Result<&Vec<Value>, SourceError> {
    body.get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Malformed("openalex: response has no 'results' array".into()))
}

/// Search hits as match candidates.
pub fn parse_search_candidates(body: &Value) -> Result<Vec<Candidate>, SourceError> {
    Ok(results_array(body)?
        .iter()
        .filter_map(|work| {
            Some(Candidate {
                id: work.get("id").and_then(Value::as_str).and_then(normalize_openalex_id)?,
                title: str_field(work, &["display_name", "title"])?.to_string(),
                year: year_field(work, "publication_year"),
            })
        })
        .collect())
}

/// Normalize one work. Works without an id are dropped.
pub fn parse_work(work: &Value, fields: FieldSet) -> Option<SourceRecord> {
    let source_id = work.get("id").and_then(Value::as_str).and_then(normalize_openalex_id)?;

    let ids = work.get("ids");
    let id_str = |key: &str| ids.and_then(|v| v.get(key)).and_then(Value::as_str);

    let doi = work
        .get("doi")
        .and_then(Value::as_str)
        .or_else(|| id_str("doi"))
        .and_then(normalize_doi);
    let arxiv_id = doi
        .as_deref()
        .and_then(|d| d.strip_prefix(ARXIV_DOI_PREFIX))
        .and_then(normalize_arxiv_id);

    let mut identifiers = PaperIdentifiers {
        doi,
        arxiv_id,
        openalex_id: Some(source_id.clone()),
        pubmed_id: id_str("pmid").map(String::from),
        ..Default::default()
    };
    for key in ["mag", "pmcid"] {
        if let Some(v) = ids.and_then(|v| v.get(key)) {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            identifiers.other.insert(key.to_string(), value);
        }
    }

    let mut record = SourceRecord {
        source_id: Some(source_id),
        identifiers: identifiers.normalized(),
        title: str_field(work, &["display_name", "title"]).map(String::from),
        year: year_field(work, "publication_year"),
        ..Default::default()
    };

    if fields == FieldSet::Full {
        record.abstract_text = decode_abstract(work.get("abstract_inverted_index"));
        record.citation_count = work.get("cited_by_count").and_then(Value::as_u64);
        record.urls = collect_urls(work, record.identifiers.doi.as_deref());
        record.affiliations = collect_affiliations(work);
    }
    Some(record)
}

fn str_field<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| v.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn year_field(v: &Value, key: &str) -> Option<i32> {
    v.get(key).and_then(Value::as_i64).and_then(|n| i32::try_from(n).ok())
}

fn collect_urls(work: &Value, doi: Option<&str>) -> Vec<String> {
    let location = work.get("primary_location");
    let candidates = [
        location.and_then(|l| l.get("landing_page_url")),
        location.and_then(|l| l.get("pdf_url")),
        work.get("open_access").and_then(|oa| oa.get("oa_url")),
    ];
    let mut urls: Vec<String> = Vec::new();
    for url in candidates.into_iter().flatten().filter_map(Value::as_str) {
        let url = url.trim();
        if !url.is_empty() && !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
    }
    if urls.is_empty() {
        if let Some(doi) = doi {
            urls.push(format!("https://doi.org/{doi}"));
        }
    }
    urls
}

fn collect_affiliations(work: &Value) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let authorships = work.get("authorships").and_then(Value::as_array);
    for authorship in authorships.into_iter().flatten() {
        let institutions = authorship
            .get("institutions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|i| i.get("display_name").and_then(Value::as_str));
        let raw = authorship
            .get("raw_affiliation_strings")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str);
        for name in institutions.chain(raw).map(str::trim) {
            if !name.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(name)) {
                out.push(name.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn work_fixture() -> Value {
        json!({
            "id": "https://openalex.org/W2963403868",
            "doi": "https://doi.org/10.48550/arXiv.1706.03762",
            "display_name": "Attention Is All You Need",
            "publication_year": 2017,
            "ids": {
                "openalex": "https://openalex.org/W2963403868",
                "doi": "https://doi.org/10.48550/arxiv.1706.03762",
                "mag": 2963403868u64,
                "pmid": "https://pubmed.ncbi.nlm.nih.gov/12345"
            },
            "cited_by_count": 98765,
            "abstract_inverted_index": {"The": [0], "dominant": [1], "models": [2]},
            "authorships": [
                {"institutions": [{"display_name": "Google Brain"}], "raw_affiliation_strings": ["Google Brain, Mountain View"]},
                {"institutions": [{"display_name": "google brain"}, {"display_name": "University of Toronto"}]}
            ],
            "primary_location": {"landing_page_url": "https://arxiv.org/abs/1706.03762", "pdf_url": null},
            "open_access": {"oa_url": "https://arxiv.org/pdf/1706.03762"}
        })
    }

    #[test]
    fn parse_full_work() {
        let r = parse_work(&work_fixture(), FieldSet::Full).unwrap();
        assert_eq!(r.source_id.as_deref(), Some("W2963403868"));
        assert_eq!(r.identifiers.doi.as_deref(), Some("10.48550/arxiv.1706.03762"));
        assert_eq!(r.identifiers.arxiv_id.as_deref(), Some("1706.03762"));
        assert_eq!(r.identifiers.openalex_id.as_deref(), Some("W2963403868"));
        assert_eq!(r.identifiers.pubmed_id.as_deref(), Some("12345"));
        assert_eq!(r.identifiers.other.get("mag").map(String::as_str), Some("2963403868"));
        assert_eq!(r.abstract_text.as_deref(), Some("The dominant models"));
        assert_eq!(r.citation_count, Some(98765));
        assert_eq!(
            r.urls,
            vec!["https://arxiv.org/abs/1706.03762", "https://arxiv.org/pdf/1706.03762"]
        );
        assert_eq!(
            r.affiliations,
            vec!["Google Brain", "Google Brain, Mountain View", "University of Toronto"]
        );
    }

    #[test]
    fn identifier_fieldset_skips_enrichment() {
        let r = parse_work(&work_fixture(), FieldSet::Identifiers).unwrap();
        assert!(r.identifiers.has_external_ids());
        assert!(!r.has_enrichment());
    }

    #[test]
    fn work_without_id_is_dropped() {
        assert!(parse_work(&json!({"display_name": "x"}), FieldSet::Full).is_none());
    }

    #[test]
    fn doi_url_used_when_no_locations() {
        let work = json!({"id": "W1", "doi": "10.1/abc", "cited_by_count": 0});
        let r = parse_work(&work, FieldSet::Full).unwrap();
        assert_eq!(r.urls, vec!["https://doi.org/10.1/abc"]);
        assert_eq!(r.citation_count, Some(0));
    }

    #[test]
    fn shared_doi_fills_every_paper() {
        let first = PaperHash::from("aaaa");
        let second = PaperHash::from("bbbb");
        let other = PaperHash::from("cccc");
        let chunk = vec![
            ("10.1/x".to_string(), &first),
            ("10.1/x".to_string(), &second),
            ("10.1/y".to_string(), &other),
        ];
        let works = vec![json!({"id": "W7", "doi": "https://doi.org/10.1/X", "cited_by_count": 3})];

        let mut out = HashMap::new();
        assign_by_doi(&chunk, &works, &mut out);

        assert_eq!(out.len(), 2);
        assert_eq!(out[&first].source_id.as_deref(), Some("W7"));
        assert_eq!(out[&second].citation_count, Some(3));
        assert!(!out.contains_key(&other));
    }

    #[test]
    fn search_candidates() {
        let body = json!({"results": [
            {"id": "https://openalex.org/W1", "display_name": "Attention Is All You Need", "publication_year": 2017},
            {"id": "https://openalex.org/W2", "display_name": null}
        ]});
        let cands = parse_search_candidates(&body).unwrap();
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].id, "W1");
        assert_eq!(cands[0].year, Some(2017));
    }

    #[test]
    fn missing_results_is_malformed() {
        let err = parse_search_candidates(&json!({"error": "bad"})).unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
    }

    #[test]
    fn internal_id_and_capabilities() {
        let mut settings = SourceSettings::default();
        settings.max_batch_size = Some(20);
        let client = OpenAlexClient::new(&settings, paperlink_core::system_clock());
        let caps = client.capabilities();
        assert_eq!(caps.max_batch_size, 20);
        assert!(caps.supports_title_search && caps.supports_batch_lookup);
        let ids = PaperIdentifiers {
            openalex_id: Some("https://openalex.org/w42".into()),
            ..Default::default()
        };
        assert_eq!(client.internal_id(&ids).as_deref(), Some("W42"));
        assert_eq!(client.api_calls(), 0);
    }
}
