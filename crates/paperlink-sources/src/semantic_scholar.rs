//! Semantic Scholar Graph API
//!
//! The batch endpoint (`POST /paper/batch`) accepts up to 500 ids in one
//! call and answers with an array aligned to the request, `null` for ids it
//! does not know. That makes it the cheap route once a paper has a DOI.

use std::collections::HashMap;
use std::sync::Arc;

use paperlink_core::paper::{normalize_arxiv_id, normalize_doi};
use paperlink_core::{Clock, PaperHash, PaperIdentifiers, SourceError, SourceRecord};
use serde_json::{Value, json};

use crate::client::{Capabilities, FieldSet, SourceClient, SourceHttp, TitleQuery, effective_batch_size};
use crate::config::SourceSettings;
use crate::matching::{Candidate, best_match};

pub const NAME: &str = "semantic_scholar";

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const MAX_BATCH: usize = 500;
/// Unauthenticated pool allows roughly one request per second
const DEFAULT_RATE: f64 = 1.0;
const MATCH_FIELDS: &str = "paperId,title,year";
const IDENTIFIER_FIELDS: &str = "paperId,externalIds,title,year";
const FULL_FIELDS: &str = "paperId,externalIds,title,year,abstract,citationCount,url,openAccessPdf,authors.affiliations";

pub struct SemanticScholarClient {
    http: SourceHttp,
    base_url: String,
    api_key: Option<String>,
    match_threshold: f64,
    batch_size: usize,
}

impl SemanticScholarClient {
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
            match_threshold: settings.match_threshold,
            batch_size: effective_batch_size(MAX_BATCH, settings.max_batch_size),
        }
    }

    fn with_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    fn match_title(&self, query: &TitleQuery) -> Result<Option<String>, SourceError> {
        let url = format!("{}/paper/search/match", self.base_url);
        let params = [("query", query.title.as_str()), ("fields", MATCH_FIELDS)];
        let body = match self
            .http
            .send("title match", |c| self.with_key(c.get(&url).query(&params)))
        {
            Ok(body) => body,
            // 404 is how this endpoint says "no match"
            Err(e) if e.is_permanent() => {
                log::debug!("semantic_scholar: no match for {}: {e}", query.hash.short());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let candidates = parse_match_candidates(&body)?;
        Ok(best_match(&query.title, query.year, &candidates, self.match_threshold).map(|c| c.id.clone()))
    }

    /// One batch call. The result is aligned with `ids`.
    fn batch(&self, ids: &[String], fields: FieldSet) -> Result<Vec<Option<SourceRecord>>, SourceError> {
        let url = format!("{}/paper/batch", self.base_url);
        let select = match fields {
            FieldSet::Identifiers => IDENTIFIER_FIELDS,
            FieldSet::Full => FULL_FIELDS,
        };
        let body = json!({ "ids": ids });
        let response = self.http.send("batch lookup", |c| {
            self.with_key(c.post(&url).query(&[("fields", select)]).json(&body))
        })?;
        parse_batch(&response, ids.len(), fields)
    }
}

impl SourceClient for SemanticScholarClient {
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
            if let Some(id) = self.match_title(query)? {
                found.insert(query.hash.clone(), id);
            }
        }
        Ok(found)
    }

    fn fetch_fields(&self, ids: &[String], fields: FieldSet) -> Result<HashMap<String, SourceRecord>, SourceError> {
        let mut out = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(self.batch_size) {
            for (id, record) in chunk.iter().zip(self.batch(chunk, fields)?) {
                if let Some(record) = record {
                    out.insert(id.clone(), record);
                }
            }
        }
        Ok(out)
    }

    fn fetch_by_external_ids(
        &self,
        papers: &[(PaperHash, PaperIdentifiers)],
    ) -> Result<HashMap<PaperHash, SourceRecord>, SourceError> {
        let lookups: Vec<(String, &PaperHash)> = papers
            .iter()
            .filter_map(|(hash, ids)| Some((lookup_key(ids)?, hash)))
            .collect();

        let mut out = HashMap::new();
        for chunk in lookups.chunks(self.batch_size) {
            let ids: Vec<String> = chunk.iter().map(|(key, _)| key.clone()).collect();
            for ((_, hash), record) in chunk.iter().zip(self.batch(&ids, FieldSet::Full)?) {
                if let Some(record) = record {
                    out.insert((*hash).clone(), record);
                }
            }
        }
        Ok(out)
    }

    fn internal_id(&self, ids: &PaperIdentifiers) -> Option<String> {
        ids.semantic_scholar_id.clone()
    }

    fn api_calls(&self) -> u64 {
        self.http.calls()
    }
}

/// Batch lookup key: DOI first, then arXiv, then PubMed.
pub fn lookup_key(ids: &PaperIdentifiers) -> Option<String> {
    if let Some(doi) = &ids.doi {
        Some(format!("DOI:{doi}"))
    } else if let Some(arxiv) = &ids.arxiv_id {
        Some(format!("ARXIV:{arxiv}"))
    } else {
        ids.pubmed_id.as_ref().map(|pmid| format!("PMID:{pmid}"))
    }
}

pub fn parse_match_candidates(body: &Value) -> Result<Vec<Candidate>, SourceError> {
    let data = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Malformed("semantic_scholar: match response has no 'data' array".into()))?;
    Ok(data
        .iter()
        .filter_map(|paper| {
            Some(Candidate {
                id: str_field(paper, "paperId")?.to_string(),
                title: str_field(paper, "title")?.to_string(),
                year: year_field(paper),
            })
        })
        .collect())
}

/// Parse a batch response; `expected` is the number of ids sent.
pub fn parse_batch(body: &Value, expected: usize, fields: FieldSet) -> Result<Vec<Option<SourceRecord>>, SourceError> {
    let items = body
        .as_array()
        .ok_or_else(|| SourceError::Malformed("semantic_scholar: batch response is not an array".into()))?;
    if items.len() != expected {
        return Err(SourceError::Malformed(format!(
            "semantic_scholar: batch returned {} entries for {expected} ids",
            items.len()
        )));
    }
    Ok(items
        .iter()
        .map(|item| if item.is_null() { None } else { parse_paper(item, fields) })
        .collect())
}

/// Normalize one paper. `externalIds` values may be strings or numbers.
pub fn parse_paper(paper: &Value, fields: FieldSet) -> Option<SourceRecord> {
    let paper_id = str_field(paper, "paperId")?.to_string();

    let mut identifiers = PaperIdentifiers {
        semantic_scholar_id: Some(paper_id.clone()),
        ..Default::default()
    };
    let external = paper.get("externalIds").and_then(Value::as_object);
    for (key, value) in external.into_iter().flatten() {
        let value = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "DOI" => identifiers.doi = normalize_doi(&value),
            "ArXiv" => identifiers.arxiv_id = normalize_arxiv_id(&value),
            "PubMed" => identifiers.pubmed_id = Some(value),
            _ => {
                identifiers.other.insert(key.to_ascii_lowercase(), value);
            }
        }
    }

    let mut record = SourceRecord {
        source_id: Some(paper_id),
        identifiers: identifiers.normalized(),
        title: str_field(paper, "title").map(String::from),
        year: year_field(paper),
        ..Default::default()
    };

    if fields == FieldSet::Full {
        record.abstract_text = str_field(paper, "abstract").map(String::from);
        record.citation_count = paper.get("citationCount").and_then(Value::as_u64);
        let pdf = paper
            .get("openAccessPdf")
            .and_then(|p| p.get("url"))
            .and_then(Value::as_str);
        for url in [str_field(paper, "url"), pdf].into_iter().flatten() {
            let url = url.trim();
            if !url.is_empty() && !record.urls.iter().any(|u| u == url) {
                record.urls.push(url.to_string());
            }
        }
        let authors = paper.get("authors").and_then(Value::as_array);
        for affiliation in authors
            .into_iter()
            .flatten()
            .filter_map(|a| a.get("affiliations").and_then(Value::as_array))
            .flatten()
            .filter_map(Value::as_str)
            .map(str::trim)
        {
            if !affiliation.is_empty() && !record.affiliations.iter().any(|a| a.eq_ignore_ascii_case(affiliation)) {
                record.affiliations.push(affiliation.to_string());
            }
        }
    }
    Some(record)
}

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn year_field(v: &Value) -> Option<i32> {
    v.get("year").and_then(Value::as_i64).and_then(|n| i32::try_from(n).ok())
}
