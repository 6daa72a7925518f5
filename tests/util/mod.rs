#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{TimeZone, Utc};
use yaml_query_dsl::search::embedder::{EmbedError, Embedder, EmbedderResult};
use yaml_query_dsl::search::query::SearchClient;
use yaml_query_dsl::search::tantivy::{Document, DocumentIndex};
use yaml_query_dsl::service::SearchService;

/// Model name served by [`StubEmbedder`]. Not in the registry, so any
/// dimension is accepted.
pub const STUB_MODEL: &str = "toy";

/// Captures tracing output for tests.
pub struct TestTracing {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Deterministic 3-d embedder: texts mentioning "fox" point along x,
/// "dog" along y, anything else along z.
pub struct StubEmbedder {
    calls: AtomicUsize,
    fail: bool,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for StubEmbedder {
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbedError::ProviderUnreachable {
                url: "http://stub.invalid".into(),
                reason: "connection refused".into(),
            });
        }
        let text = text.to_lowercase();
        Ok(if text.contains("fox") {
            vec![1.0, 0.0, 0.0]
        } else if text.contains("dog") {
            vec![0.0, 1.0, 0.0]
        } else {
            vec![0.0, 0.0, 1.0]
        })
    }

    fn model(&self) -> &str {
        STUB_MODEL
    }

    fn dimension(&self) -> Option<usize> {
        Some(3)
    }
}

pub fn corpus() -> Vec<Document> {
    vec![
        Document {
            id: "1".into(),
            title: Some("Fox tales".into()),
            content: "the quick brown fox jumps over the lazy dog".into(),
            status: Some("published".into()),
            tags: vec!["animals".into(), "stories".into()],
            created_at: Some(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()),
            rating: Some(4.5),
            vector: Some(vec![1.0, 0.0, 0.0]),
        },
        Document {
            id: "2".into(),
            title: Some("Dog days".into()),
            content: "a lazy dog sleeps all day".into(),
            status: Some("draft".into()),
            tags: vec!["animals".into()],
            created_at: Some(Utc.with_ymd_and_hms(2024, 3, 2, 12, 30, 0).unwrap()),
            rating: Some(3.0),
            vector: Some(vec![0.0, 1.0, 0.0]),
        },
        Document {
            id: "3".into(),
            title: Some("Quick recipes".into()),
            content: "quick meals for busy people".into(),
            status: Some("published".into()),
            tags: vec!["food".into()],
            created_at: Some(Utc.with_ymd_and_hms(2023, 11, 20, 18, 0, 0).unwrap()),
            rating: Some(4.9),
            vector: Some(vec![0.9, 0.1, 0.0]),
        },
        Document {
            id: "4".into(),
            title: Some("Archive note".into()),
            content: "old brown paper notes".into(),
            status: Some("archived".into()),
            ..Default::default()
        },
    ]
}

pub fn fixture_index() -> DocumentIndex {
    let mut index = DocumentIndex::create_in_ram().unwrap();
    for doc in corpus() {
        index.add_document(&doc).unwrap();
    }
    index.commit().unwrap();
    index
}

pub fn fixture_client() -> SearchClient {
    SearchClient::from_index(fixture_index().index.clone()).unwrap()
}

pub fn fixture_service(embedder: Arc<StubEmbedder>) -> SearchService {
    SearchService::new(fixture_client(), embedder, 32)
}

pub fn hit_ids(result: &yaml_query_dsl::search::query::SearchResult) -> Vec<&str> {
    result.hits.iter().map(|h| h.id.as_str()).collect()
}
