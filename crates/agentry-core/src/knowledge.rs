use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::storage::{validate_table_name, Database};

/// Where an agent's knowledge comes from and where it is indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeSpec {
    pub urls: Vec<String>,
    pub table_name: String,
}

/// A chunk of a source document.
struct Chunk {
    text: String,
    start_line: usize,
    end_line: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeHit {
    pub source: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub documents: usize,
    pub skipped: usize,
    pub chunks: usize,
}

/// URL-backed document store searchable with SQLite FTS5 (BM25 ranking).
pub struct KnowledgeBase {
    db: Arc<Database>,
    http: reqwest::Client,
    spec: KnowledgeSpec,
    timeout: Duration,
}

impl KnowledgeBase {
    pub fn new(
        db: Arc<Database>,
        http: reqwest::Client,
        spec: KnowledgeSpec,
        timeout: Duration,
    ) -> Result<Self> {
        let t = &spec.table_name;
        validate_table_name(t)?;
        db.lock()?.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {t}_documents (
                source TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {t} (
                id INTEGER PRIMARY KEY,
                source TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                text TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_{t}_source ON {t}(source);

            CREATE VIRTUAL TABLE IF NOT EXISTS {t}_fts USING fts5(
                text,
                content={t},
                content_rowid=id
            );

            CREATE TRIGGER IF NOT EXISTS {t}_ai AFTER INSERT ON {t} BEGIN
                INSERT INTO {t}_fts(rowid, text) VALUES (new.id, new.text);
            END;

            CREATE TRIGGER IF NOT EXISTS {t}_ad AFTER DELETE ON {t} BEGIN
                INSERT INTO {t}_fts({t}_fts, rowid, text) VALUES ('delete', old.id, old.text);
            END;"
        ))?;
        Ok(Self {
            db,
            http,
            spec,
            timeout,
        })
    }

    /// Fetch every URL and index it.
    ///
    /// Unchanged documents (same SHA-256) are skipped unless `upsert` is set.
    pub async fn load(&self, upsert: bool) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        for url in &self.spec.urls {
            info!("Loading knowledge from {url}");
            let resp = self
                .http
                .get(url)
                .timeout(self.timeout)
                .send()
                .await
                .with_context(|| format!("failed to fetch '{url}'"))?;
            resp.error_for_status_ref()
                .map_err(|e| anyhow::anyhow!("failed to fetch '{url}': {e}"))?;
            let text = resp.text().await?;

            match self.index_document(url, &text, upsert)? {
                Some(n) => {
                    report.documents += 1;
                    report.chunks += n;
                }
                None => report.skipped += 1,
            }
        }
        info!(
            "Knowledge table '{}': {} document(s) indexed ({} chunks), {} unchanged",
            self.spec.table_name, report.documents, report.chunks, report.skipped
        );
        Ok(report)
    }

    /// Replace the chunks of one document. Returns `None` when skipped as unchanged.
    pub fn index_document(&self, source: &str, text: &str, upsert: bool) -> Result<Option<usize>> {
        let t = &self.spec.table_name;
        let hash = hex_sha256(text);
        let mut conn = self.db.lock()?;

        let existing: Option<String> = conn
            .query_row(
                &format!("SELECT hash FROM {t}_documents WHERE source = ?1"),
                params![source],
                |row| row.get(0),
            )
            .optional()?;
        if !upsert && existing.as_deref() == Some(hash.as_str()) {
            debug!("Skipping unchanged document {source}");
            return Ok(None);
        }

        let chunks = chunk_text(text);
        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {t} WHERE source = ?1"), params![source])?;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {t} (source, start_line, end_line, text) VALUES (?1, ?2, ?3, ?4)"
            ))?;
            for chunk in &chunks {
                insert.execute(params![
                    source,
                    chunk.start_line as i64,
                    chunk.end_line as i64,
                    chunk.text
                ])?;
            }
        }
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {t}_documents (source, hash, updated_at) VALUES (?1, ?2, ?3)"
            ),
            params![source, hash, chrono::Utc::now().timestamp()],
        )?;
        tx.commit()?;
        Ok(Some(chunks.len()))
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<KnowledgeHit>> {
        let fts_query = build_fts_query(query);
        if fts_query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let t = &self.spec.table_name;
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT c.source, c.start_line, c.end_line, c.text, {t}_fts.rank
             FROM {t}_fts
             JOIN {t} c ON {t}_fts.rowid = c.id
             WHERE {t}_fts MATCH ?1
             ORDER BY {t}_fts.rank
             LIMIT ?2"
        ))?;
        let hits = stmt
            .query_map(params![fts_query, limit as i64], |row| {
                Ok(KnowledgeHit {
                    source: row.get(0)?,
                    start_line: row.get::<_, i64>(1)? as usize,
                    end_line: row.get::<_, i64>(2)? as usize,
                    content: row.get(3)?,
                    // bm25 rank is negative, lower is better
                    score: -row.get::<_, f64>(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hits)
    }
}

/// Quote each whitespace token and OR them, so any matching term contributes to BM25.
fn build_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Split text into overlapping chunks on line boundaries.
/// Target: ~1600 chars per chunk, ~320 chars overlap.
fn chunk_text(text: &str) -> Vec<Chunk> {
    const TARGET_SIZE: usize = 1600;
    const OVERLAP: usize = 320;

    let lines: Vec<&str> = text.lines().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < lines.len() {
        let mut size = 0usize;
        let mut end = start;
        while end < lines.len() {
            let line_len = lines[end].len() + 1;
            if size + line_len > TARGET_SIZE && end > start {
                break;
            }
            size += line_len;
            end += 1;
        }

        let body = lines[start..end].join("\n");
        if !body.trim().is_empty() {
            chunks.push(Chunk {
                text: body,
                start_line: start + 1,
                end_line: end,
            });
        }
        if end >= lines.len() {
            break;
        }

        let mut overlap = 0usize;
        let mut next = end;
        while next > start + 1 {
            next -= 1;
            overlap += lines[next].len() + 1;
            if overlap >= OVERLAP {
                break;
            }
        }
        start = if next <= start { end } else { next };
    }

    chunks
}

fn hex_sha256(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::Router;

    use super::*;

    fn chunk_count(kb: &KnowledgeBase) -> i64 {
        let conn = kb.db.lock().unwrap();
        conn.query_row(&format!("SELECT count(*) FROM {}", kb.spec.table_name), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    fn kb(db: Arc<Database>, urls: Vec<String>) -> KnowledgeBase {
        KnowledgeBase::new(
            db,
            reqwest::Client::new(),
            KnowledgeSpec {
                urls,
                table_name: "docs_knowledge".into(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn chunking_overlaps_and_covers() {
        let lines: Vec<String> = (0..100)
            .map(|i| format!("Line {i} describes how agents, teams and tools fit together."))
            .collect();
        let chunks = chunk_text(&lines.join("\n"));
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks.last().unwrap().end_line, 100);
        assert!(chunks[1].start_line <= chunks[0].end_line);
        assert!(chunks.iter().all(|c| c.text.len() <= 1600));
        assert!(chunk_text("").is_empty());
    }

    #[test]
    fn fts_query_quotes_and_ors() {
        assert_eq!(build_fts_query("agent teams"), "\"agent\" OR \"teams\"");
        assert_eq!(build_fts_query(r#"say "hi""#), r#""say" OR """hi""""#);
        assert_eq!(build_fts_query("   "), "");
    }

    #[test]
    fn index_search_and_skip_unchanged() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let kb = kb(db, Vec::new());
        let doc = "# Teams\nA team coordinates member agents.\n\n# Tools\nToolkits give agents abilities.";

        assert_eq!(kb.index_document("mem://a", doc, false).unwrap(), Some(1));
        assert_eq!(kb.index_document("mem://a", doc, false).unwrap(), None);
        assert_eq!(kb.index_document("mem://a", doc, true).unwrap(), Some(1));
        assert_eq!(chunk_count(&kb), 1);

        kb.index_document("mem://b", "Storage keeps sessions in SQLite.", false)
            .unwrap();
        let hits = kb.search("sqlite sessions", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "mem://b");
        assert!(hits[0].score > 0.0);

        assert!(kb.search("nonexistentterm", 5).unwrap().is_empty());
        assert!(kb.search("", 5).unwrap().is_empty());
    }

    #[test]
    fn changed_document_replaces_chunks() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let kb = kb(db, Vec::new());
        kb.index_document("mem://a", "old words about llamas", false)
            .unwrap();
        kb.index_document("mem://a", "new words about alpacas", false)
            .unwrap();
        assert!(kb.search("llamas", 5).unwrap().is_empty());
        assert_eq!(kb.search("alpacas", 5).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_fetches_urls() {
        let app = Router::new().route(
            "/llms-full.txt",
            get(|| async { "Agents answer questions.\nKnowledge is searched with BM25." }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("k.sqlite")).unwrap());
        let kb = kb(db, vec![format!("http://{addr}/llms-full.txt")]);

        let first = kb.load(false).await.unwrap();
        assert_eq!(
            first,
            LoadReport {
                documents: 1,
                skipped: 0,
                chunks: 1
            }
        );
        let second = kb.load(false).await.unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(kb.search("bm25", 3).unwrap().len(), 1);
    }
}
