use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime as ChronoDateTime, Utc};
use serde::{Deserialize, Serialize};
use tantivy::schema::*;
use tantivy::{DateTime, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

/// Heap budget handed to the index writer.
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// A document as ingested and as listed back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<ChronoDateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

#[derive(Clone, Copy)]
pub struct Fields {
    pub id: Field,
    pub title: Field,
    pub content: Field,
    pub status: Field,
    pub tags: Field,
    pub created_at: Field,
    pub rating: Field,
    pub vector: Field,
}

pub struct DocumentIndex {
    pub index: Index,
    writer: IndexWriter,
    pub fields: Fields,
}

impl DocumentIndex {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("create index directory {}", path.display()))?;
        let index = if path.join("meta.json").exists() {
            Index::open_in_dir(path).with_context(|| format!("open index at {}", path.display()))?
        } else {
            Index::create_in_dir(path, build_schema())
                .with_context(|| format!("create index at {}", path.display()))?
        };
        Self::from_index(index)
    }

    /// Volatile index with the default schema.
    pub fn create_in_ram() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        let fields = fields_from_schema(&index.schema())?;
        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .with_context(|| "create index writer")?;
        Ok(Self {
            index,
            writer,
            fields,
        })
    }

    /// Insert `doc`, replacing any document with the same id.
    pub fn add_document(&mut self, doc: &Document) -> Result<()> {
        let f = self.fields;
        let mut d = TantivyDocument::default();
        d.add_text(f.id, &doc.id);
        d.add_text(f.content, &doc.content);
        if let Some(title) = &doc.title {
            d.add_text(f.title, title);
        }
        if let Some(status) = &doc.status {
            d.add_text(f.status, status);
        }
        for tag in &doc.tags {
            d.add_text(f.tags, tag);
        }
        if let Some(ts) = doc.created_at {
            d.add_date(f.created_at, DateTime::from_timestamp_micros(ts.timestamp_micros()));
        }
        if let Some(rating) = doc.rating {
            d.add_f64(f.rating, rating);
        }
        if let Some(vector) = &doc.vector {
            for component in vector {
                d.add_f64(f.vector, f64::from(*component));
            }
        }

        self.writer.delete_term(Term::from_field_text(f.id, &doc.id));
        self.writer
            .add_document(d)
            .with_context(|| format!("add document {}", doc.id))?;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.writer.commit()?;
        Ok(())
    }

    pub fn reader(&self) -> Result<IndexReader> {
        Ok(self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?)
    }
}

pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("id", STRING | STORED);
    schema_builder.add_text_field("title", TEXT | STORED);
    schema_builder.add_text_field("content", TEXT | STORED);
    schema_builder.add_text_field("status", STRING | STORED | FAST);
    schema_builder.add_text_field("tags", STRING | STORED);
    schema_builder.add_date_field("created_at", INDEXED | STORED | FAST);
    schema_builder.add_f64_field("rating", INDEXED | STORED | FAST);
    schema_builder.add_f64_field("vector", STORED);
    schema_builder.build()
}

pub fn fields_from_schema(schema: &Schema) -> Result<Fields> {
    let field = |name: &str| {
        schema
            .get_field(name)
            .with_context(|| format!("schema missing {name}"))
    };
    Ok(Fields {
        id: field("id")?,
        title: field("title")?,
        content: field("content")?,
        status: field("status")?,
        tags: field("tags")?,
        created_at: field("created_at")?,
        rating: field("rating")?,
        vector: field("vector")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tantivy::collector::Count;
    use tantivy::query::AllQuery;
    use tempfile::TempDir;

    fn doc(id: &str, content: &str) -> Document {
        Document {
            id: id.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    #[test]
    fn reopen_keeps_documents() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let mut index = DocumentIndex::open_or_create(dir.path())?;
            index.add_document(&doc("a", "hello"))?;
            index.commit()?;
        }
        let index = DocumentIndex::open_or_create(dir.path())?;
        let searcher = index.reader()?.searcher();
        assert_eq!(searcher.search(&AllQuery, &Count)?, 1);
        Ok(())
    }

    #[test]
    fn same_id_replaces_document() -> Result<()> {
        let mut index = DocumentIndex::create_in_ram()?;
        index.add_document(&doc("a", "first"))?;
        index.commit()?;
        index.add_document(&doc("a", "second"))?;
        index.add_document(&doc("b", "other"))?;
        index.commit()?;
        let searcher = index.reader()?.searcher();
        assert_eq!(searcher.search(&AllQuery, &Count)?, 2);
        Ok(())
    }

    #[test]
    fn document_decodes_from_json() {
        let d: Document = serde_json::from_str(
            r#"{"id":"1","content":"x","tags":["a"],"created_at":"2024-01-02T03:04:05Z","vector":[0.5,1.0]}"#,
        )
        .unwrap();
        assert_eq!(d.tags, vec!["a"]);
        assert_eq!(d.vector, Some(vec![0.5, 1.0]));
        assert!(d.created_at.is_some());
        assert!(d.title.is_none());
    }
}
