//! Detection history browsing.
//!
//! `HistoryViewer` keeps one fetched page and a view over it. Server-side
//! parameters (`HistoryQuery`) decide what is fetched; `filter_disease` and
//! `sort_by` only rearrange what is already on the page.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::api::types::{HistoryPage, HistoryRecord, Pagination};
use crate::api::ApiClient;
use crate::error::{ClientError, ClientResult};

pub const DEFAULT_PER_PAGE: u32 = 20;
/// The server caps page size at this value.
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    CreatedAt,
    Confidence,
    DiseaseName,
}

impl OrderBy {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderBy::CreatedAt => "created_at",
            OrderBy::Confidence => "confidence",
            OrderBy::DiseaseName => "disease_name",
        }
    }
}

impl FromStr for OrderBy {
    type Err = ClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created_at" | "date" => Ok(OrderBy::CreatedAt),
            "confidence" => Ok(OrderBy::Confidence),
            "disease_name" | "disease" => Ok(OrderBy::DiseaseName),
            other => Err(ClientError::Validation(format!(
                "unknown sort field '{}' (expected created_at, confidence or disease_name)",
                other
            ))),
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDir {
    Asc,
    #[default]
    Desc,
}

impl OrderDir {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderDir::Asc => "ASC",
            OrderDir::Desc => "DESC",
        }
    }
}

impl FromStr for OrderDir {
    type Err = ClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "ASC" => Ok(OrderDir::Asc),
            "DESC" => Ok(OrderDir::Desc),
            _ => Err(ClientError::Validation(format!(
                "unknown sort direction '{}' (expected ASC or DESC)",
                value
            ))),
        }
    }
}

impl fmt::Display for OrderDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query parameters of `GET /history`.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryQuery {
    pub page: u32,
    pub per_page: u32,
    pub disease: Option<String>,
    pub min_confidence: Option<f64>,
    pub order_by: OrderBy,
    pub order_dir: OrderDir,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            disease: None,
            min_confidence: None,
            order_by: OrderBy::default(),
            order_dir: OrderDir::default(),
        }
    }
}

impl HistoryQuery {
    pub fn validate(&self) -> ClientResult<()> {
        if self.page == 0 {
            return Err(ClientError::Validation("page starts at 1".to_string()));
        }
        if self.per_page == 0 || self.per_page > MAX_PER_PAGE {
            return Err(ClientError::Validation(format!(
                "per_page must be between 1 and {}",
                MAX_PER_PAGE
            )));
        }
        if let Some(min) = self.min_confidence {
            if !(0.0..=1.0).contains(&min) {
                return Err(ClientError::Validation(
                    "min_confidence must be between 0 and 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.to_string()),
            ("per_page", self.per_page.to_string()),
            ("order_by", self.order_by.as_str().to_string()),
            ("order_dir", self.order_dir.as_str().to_string()),
        ];
        if let Some(disease) = self.disease.as_deref().map(str::trim) {
            if !disease.is_empty() {
                params.push(("disease", disease.to_string()));
            }
        }
        if let Some(min) = self.min_confidence {
            params.push(("min_confidence", min.to_string()));
        }
        params
    }

    fn with_page(&self, page: u32) -> Self {
        Self {
            page,
            ..self.clone()
        }
    }
}

/// Server operations the viewer needs.
pub trait HistoryBackend {
    fn fetch_history(&mut self, query: &HistoryQuery) -> ClientResult<HistoryPage>;

    fn delete_record(&mut self, record_id: i64) -> ClientResult<()>;
}

impl HistoryBackend for ApiClient {
    fn fetch_history(&mut self, query: &HistoryQuery) -> ClientResult<HistoryPage> {
        self.history(query)
    }

    fn delete_record(&mut self, record_id: i64) -> ClientResult<()> {
        self.delete_history(record_id).map(|_| ())
    }
}

#[derive(Clone, Debug)]
pub struct HistoryViewer {
    query: HistoryQuery,
    fetched: Vec<HistoryRecord>,
    displayed: Vec<HistoryRecord>,
    pagination: Pagination,
    filter: Option<String>,
    sort: Option<(OrderBy, OrderDir)>,
}

impl Default for HistoryViewer {
    fn default() -> Self {
        Self {
            query: HistoryQuery::default(),
            fetched: Vec::new(),
            displayed: Vec::new(),
            pagination: Pagination::empty(DEFAULT_PER_PAGE),
            filter: None,
            sort: None,
        }
    }
}

impl HistoryViewer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters of the last successful fetch.
    pub fn query(&self) -> &HistoryQuery {
        &self.query
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.displayed
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    /// Fetch a page. On failure the displayed set is cleared and pagination reset.
    pub fn load<B: HistoryBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        query: HistoryQuery,
    ) -> ClientResult<()> {
        query.validate()?;
        match backend.fetch_history(&query) {
            Ok(page) => {
                log::info!(
                    "HistoryViewer: page {}/{} with {} records",
                    page.pagination.page,
                    page.pagination.total_pages,
                    page.records.len()
                );
                self.query = query;
                self.fetched = page.records;
                self.pagination = page.pagination;
                self.refresh();
                Ok(())
            }
            Err(err) => {
                log::warn!("HistoryViewer: load failed: {}", err);
                self.fetched.clear();
                self.displayed.clear();
                self.pagination = Pagination::empty(query.per_page);
                Err(err)
            }
        }
    }

    /// Fetch the next page. Returns false when there is none.
    pub fn next_page<B: HistoryBackend + ?Sized>(&mut self, backend: &mut B) -> ClientResult<bool> {
        if !self.pagination.has_next {
            return Ok(false);
        }
        let query = self.query.with_page(self.query.page + 1);
        self.load(backend, query)?;
        Ok(true)
    }

    /// Fetch the previous page. Returns false when there is none.
    pub fn prev_page<B: HistoryBackend + ?Sized>(&mut self, backend: &mut B) -> ClientResult<bool> {
        if !self.pagination.has_prev || self.query.page <= 1 {
            return Ok(false);
        }
        let query = self.query.with_page(self.query.page - 1);
        self.load(backend, query)?;
        Ok(true)
    }

    /// Keep only records whose disease contains `needle` (case-insensitive).
    /// An empty needle clears the filter.
    pub fn filter_disease(&mut self, needle: &str) {
        let needle = needle.trim().to_lowercase();
        self.filter = if needle.is_empty() { None } else { Some(needle) };
        self.refresh();
    }

    /// Sort the fetched page locally.
    pub fn sort_by(&mut self, field: OrderBy, dir: OrderDir) {
        self.sort = Some((field, dir));
        self.refresh();
    }

    /// Delete a record on the server, then drop it from the page.
    pub fn delete<B: HistoryBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        record_id: i64,
    ) -> ClientResult<()> {
        backend.delete_record(record_id)?;
        let before = self.fetched.len();
        self.fetched.retain(|record| record.id != record_id);
        if self.fetched.len() < before {
            self.pagination.total = self.pagination.total.saturating_sub(1);
        }
        self.refresh();
        log::info!("HistoryViewer: deleted record {}", record_id);
        Ok(())
    }

    fn refresh(&mut self) {
        let mut view: Vec<HistoryRecord> = match &self.filter {
            Some(needle) => self
                .fetched
                .iter()
                .filter(|record| matches_disease(record, needle))
                .cloned()
                .collect(),
            None => self.fetched.clone(),
        };
        if let Some((field, dir)) = self.sort {
            view.sort_by(|a, b| {
                let ord = compare(a, b, field);
                match dir {
                    OrderDir::Asc => ord,
                    OrderDir::Desc => ord.reverse(),
                }
            });
        }
        self.displayed = view;
    }
}

fn matches_disease(record: &HistoryRecord, needle: &str) -> bool {
    [record.disease.as_deref(), record.disease_name.as_deref()]
        .into_iter()
        .flatten()
        .any(|name| name.to_lowercase().contains(needle))
}

fn compare(a: &HistoryRecord, b: &HistoryRecord, field: OrderBy) -> Ordering {
    match field {
        OrderBy::Confidence => a.confidence.total_cmp(&b.confidence),
        OrderBy::DiseaseName => a.label().cmp(b.label()),
        // ISO-8601 timestamps order lexicographically.
        OrderBy::CreatedAt => a
            .created_at
            .as_deref()
            .or(a.timestamp.as_deref())
            .cmp(&b.created_at.as_deref().or(b.timestamp.as_deref())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, disease: &str, confidence: f64, created_at: &str) -> HistoryRecord {
        HistoryRecord {
            id,
            disease: Some(disease.to_string()),
            disease_name: Some(disease.to_string()),
            confidence,
            severity: None,
            image_path: None,
            image_source: None,
            status: None,
            processing_time_ms: None,
            timestamp: None,
            created_at: Some(created_at.to_string()),
        }
    }

    struct FakeServer {
        pages: Vec<Vec<HistoryRecord>>,
        fail: bool,
        deleted: Vec<i64>,
        queries: Vec<HistoryQuery>,
    }

    impl FakeServer {
        fn new(pages: Vec<Vec<HistoryRecord>>) -> Self {
            Self {
                pages,
                fail: false,
                deleted: Vec::new(),
                queries: Vec::new(),
            }
        }
    }

    impl HistoryBackend for FakeServer {
        fn fetch_history(&mut self, query: &HistoryQuery) -> ClientResult<HistoryPage> {
            self.queries.push(query.clone());
            if self.fail {
                return Err(ClientError::Network("connection refused".to_string()));
            }
            let total_pages = self.pages.len() as u32;
            let records = self
                .pages
                .get(query.page as usize - 1)
                .cloned()
                .unwrap_or_default();
            Ok(HistoryPage {
                pagination: Pagination {
                    page: query.page,
                    per_page: query.per_page,
                    total: self.pages.iter().map(Vec::len).sum::<usize>() as u64,
                    total_pages,
                    has_next: query.page < total_pages,
                    has_prev: query.page > 1,
                },
                records,
            })
        }

        fn delete_record(&mut self, record_id: i64) -> ClientResult<()> {
            self.deleted.push(record_id);
            Ok(())
        }
    }

    fn two_pages() -> FakeServer {
        FakeServer::new(vec![
            vec![
                record(1, "Tomato__Late_blight", 0.87, "2024-05-02T10:00:00"),
                record(2, "Potato__Early_blight", 0.55, "2024-05-03T10:00:00"),
                record(3, "Tomato__healthy", 0.99, "2024-05-01T10:00:00"),
            ],
            vec![record(4, "Corn__Rust", 0.7, "2024-04-01T10:00:00")],
        ])
    }

    #[test]
    fn query_params_include_only_set_filters() {
        let query = HistoryQuery {
            disease: Some("  ".to_string()),
            ..HistoryQuery::default()
        };
        let keys: Vec<&str> = query.to_params().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["page", "per_page", "order_by", "order_dir"]);

        let query = HistoryQuery {
            disease: Some("blight".to_string()),
            min_confidence: Some(0.5),
            order_by: OrderBy::Confidence,
            order_dir: OrderDir::Asc,
            ..HistoryQuery::default()
        };
        let params = query.to_params();
        assert!(params.contains(&("order_by", "confidence".to_string())));
        assert!(params.contains(&("order_dir", "ASC".to_string())));
        assert!(params.contains(&("disease", "blight".to_string())));
        assert!(params.contains(&("min_confidence", "0.5".to_string())));
    }

    #[test]
    fn filter_and_sort_work_on_the_fetched_page() {
        let mut server = two_pages();
        let mut viewer = HistoryViewer::new();
        viewer.load(&mut server, HistoryQuery::default()).unwrap();
        viewer.filter_disease("TOMATO");
        assert_eq!(viewer.records().len(), 2);
        viewer.sort_by(OrderBy::Confidence, OrderDir::Desc);
        let ids: Vec<i64> = viewer.records().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1]);

        viewer.filter_disease("");
        viewer.sort_by(OrderBy::CreatedAt, OrderDir::Asc);
        let ids: Vec<i64> = viewer.records().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(server.queries.len(), 1);
    }

    #[test]
    fn paging_honors_has_next_and_has_prev() {
        let mut server = two_pages();
        let mut viewer = HistoryViewer::new();
        viewer.load(&mut server, HistoryQuery::default()).unwrap();
        assert!(!viewer.prev_page(&mut server).unwrap());
        assert!(viewer.next_page(&mut server).unwrap());
        assert_eq!(viewer.query().page, 2);
        assert_eq!(viewer.records()[0].id, 4);
        assert!(!viewer.next_page(&mut server).unwrap());
        assert!(viewer.prev_page(&mut server).unwrap());
        assert_eq!(viewer.query().page, 1);
    }

    #[test]
    fn failed_load_clears_the_view() {
        let mut server = two_pages();
        let mut viewer = HistoryViewer::new();
        viewer.load(&mut server, HistoryQuery::default()).unwrap();
        server.fail = true;
        assert!(viewer.next_page(&mut server).is_err());
        assert!(viewer.records().is_empty());
        assert_eq!(viewer.pagination().total, 0);
        assert!(!viewer.pagination().has_next);
        // The last successful parameters are kept.
        assert_eq!(viewer.query().page, 1);
    }

    #[test]
    fn delete_removes_the_record_locally() {
        let mut server = two_pages();
        let mut viewer = HistoryViewer::new();
        viewer.load(&mut server, HistoryQuery::default()).unwrap();
        viewer.delete(&mut server, 2).unwrap();
        assert_eq!(server.deleted, vec![2]);
        assert!(viewer.records().iter().all(|r| r.id != 2));
        assert_eq!(viewer.pagination().total, 3);
    }

    #[test]
    fn invalid_queries_never_reach_the_server() {
        let mut server = two_pages();
        let mut viewer = HistoryViewer::new();
        let query = HistoryQuery {
            per_page: 500,
            ..HistoryQuery::default()
        };
        assert!(matches!(
            viewer.load(&mut server, query),
            Err(ClientError::Validation(_))
        ));
        assert!(server.queries.is_empty());
    }

    #[test]
    fn order_parsing() {
        assert_eq!("confidence".parse::<OrderBy>().unwrap(), OrderBy::Confidence);
        assert_eq!("asc".parse::<OrderDir>().unwrap(), OrderDir::Asc);
        assert!("size".parse::<OrderBy>().is_err());
    }
}
