//! Tantivy-based media store.
//!
//! Records live in a Tantivy index directory. Text fields are analyzed
//! with the default tokenizer, so matching is token based: `@miles`
//! finds "Miles Davis" but `@mil` does not. Store metadata is kept in
//! `store_meta.json` next to the segment files.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{anyhow, bail, Context, Result};
use tantivy::collector::{Count, DocSetCollector};
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, EmptyQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TantivyDocument, Value, STORED, STRING, TEXT,
};
use tantivy::tokenizer::TokenStream;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Term};
use tracing::{debug, warn};

use crate::index::backend::MediaStore;
use crate::index::models::{BatchReport, StoreMeta, STORE_SCHEMA_VERSION};
use crate::models::{
    sort_for_playback, FieldSelector, Media, QueryPlan, SearchRequest, StoreKind, WriteFailure,
};

const META_FILE: &str = "store_meta.json";
const WRITER_MEMORY_BUDGET: usize = 50_000_000;

#[derive(Debug, Clone, Copy)]
struct MediaFields {
    title: Field,
    artist: Field,
    album: Field,
    genre: Field,
    path: Field,
    track_number: Field,
    disc_number: Field,
}

impl MediaFields {
    fn text_field(&self, selector: FieldSelector) -> Option<Field> {
        match selector {
            FieldSelector::Genre => Some(self.genre),
            FieldSelector::Artist => Some(self.artist),
            FieldSelector::Album => Some(self.album),
            FieldSelector::Title => Some(self.title),
            FieldSelector::Any => None,
        }
    }

    fn generic(&self) -> [Field; 3] {
        [self.artist, self.album, self.title]
    }
}

fn build_schema() -> (Schema, MediaFields) {
    let mut builder = Schema::builder();
    let fields = MediaFields {
        title: builder.add_text_field("title", TEXT | STORED),
        artist: builder.add_text_field("artist", TEXT | STORED),
        album: builder.add_text_field("album", TEXT | STORED),
        genre: builder.add_text_field("genre", TEXT | STORED),
        path: builder.add_text_field("path", STRING | STORED),
        track_number: builder.add_u64_field("tracknumber", STORED),
        disc_number: builder.add_u64_field("discnumber", STORED),
    };
    (builder.build(), fields)
}

/// Tantivy-backed implementation of `MediaStore`.
pub struct TantivyMediaStore {
    path: PathBuf,
    index: Index,
    reader: IndexReader,
    writer: Option<IndexWriter>,
    fields: MediaFields,
}

impl TantivyMediaStore {
    /// Open (or create) a Tantivy store in the given directory.
    pub fn open(index_dir: &Path) -> Result<Self> {
        if index_dir.exists() && !index_dir.is_dir() {
            bail!(
                "tantivy backend requires a directory; got {}",
                index_dir.display()
            );
        }
        fs::create_dir_all(index_dir)
            .with_context(|| format!("failed to create {}", index_dir.display()))?;

        let (schema, fields) = build_schema();
        let directory = MmapDirectory::open(index_dir)
            .with_context(|| format!("failed to open index directory {}", index_dir.display()))?;
        let index = Index::open_or_create(directory, schema)
            .with_context(|| format!("failed to open tantivy index {}", index_dir.display()))?;

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            path: index_dir.to_path_buf(),
            index,
            reader,
            writer: None,
            fields,
        })
    }

    fn meta_path(&self) -> PathBuf {
        self.path.join(META_FILE)
    }

    fn commit(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.commit()?;
        }
        self.reader.reload()?;
        Ok(())
    }

    /// Analyze `text` with the field's tokenizer and build a query that
    /// requires every resulting token.
    ///
    /// Empty text matches every document. Text the analyzer drops
    /// entirely (punctuation, overlong words) matches nothing.
    fn term_query(&self, field: Field, text: &str) -> Result<Box<dyn Query>> {
        if text.trim().is_empty() {
            return Ok(Box::new(AllQuery));
        }

        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut tokens = Vec::new();
        let mut stream = analyzer.token_stream(text);
        stream.process(&mut |token| tokens.push(token.text.clone()));

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = tokens
            .iter()
            .map(|token| {
                let query: Box<dyn Query> = Box::new(TermQuery::new(
                    Term::from_field_text(field, token),
                    IndexRecordOption::Basic,
                ));
                (Occur::Must, query)
            })
            .collect();

        Ok(match clauses.len() {
            0 => Box::new(EmptyQuery),
            1 => clauses.remove(0).1,
            _ => Box::new(BooleanQuery::new(clauses)),
        })
    }

    fn plan_query(&self, plan: &QueryPlan) -> Result<Box<dyn Query>> {
        if plan.is_empty() {
            return Ok(Box::new(AllQuery));
        }

        let mut required: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for group in &plan.groups {
            match self.fields.text_field(group.selector) {
                Some(field) => {
                    let mut alternatives = Vec::with_capacity(group.texts.len());
                    for text in &group.texts {
                        alternatives.push((Occur::Should, self.term_query(field, text)?));
                    }
                    let group_query: Box<dyn Query> = Box::new(BooleanQuery::new(alternatives));
                    required.push((Occur::Must, group_query));
                }
                None => {
                    for text in &group.texts {
                        let mut alternatives = Vec::with_capacity(3);
                        for field in self.fields.generic() {
                            alternatives.push((Occur::Should, self.term_query(field, text)?));
                        }
                        let any_query: Box<dyn Query> = Box::new(BooleanQuery::new(alternatives));
                        required.push((Occur::Must, any_query));
                    }
                }
            }
        }

        Ok(Box::new(BooleanQuery::new(required)))
    }

    fn native_query(&self, text: &str) -> Box<dyn Query> {
        let mut parser = QueryParser::for_index(
            &self.index,
            vec![
                self.fields.title,
                self.fields.artist,
                self.fields.album,
                self.fields.genre,
            ],
        );
        parser.set_conjunction_by_default();

        let (query, errors) = parser.parse_query_lenient(text);
        if !errors.is_empty() {
            debug!(query = text, errors = errors.len(), "lenient parse dropped parts of the query");
        }
        query
    }

    fn collect(&self, query: &dyn Query) -> Result<Vec<TantivyDocument>> {
        let searcher = self.reader.searcher();
        let hits = searcher.search(query, &DocSetCollector)?;

        let mut docs = Vec::with_capacity(hits.len());
        for address in hits {
            docs.push(searcher.doc::<TantivyDocument>(address)?);
        }
        Ok(docs)
    }

    fn doc_to_media(&self, doc: &TantivyDocument) -> Result<Media> {
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let number = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_u64())
                .map(|n| n.min(u32::MAX as u64) as u32)
                .unwrap_or(0)
        };

        let path = text(self.fields.path);
        if path.is_empty() {
            return Err(anyhow!("tantivy document without a path"));
        }

        Ok(Media {
            title: text(self.fields.title),
            artist: text(self.fields.artist),
            album: text(self.fields.album),
            track_number: number(self.fields.track_number),
            disc_number: number(self.fields.disc_number),
            genre: text(self.fields.genre),
            path: PathBuf::from(path),
        })
    }

    fn path_term(&self, path: &Path) -> Term {
        Term::from_field_text(self.fields.path, &path.to_string_lossy())
    }
}

fn ensure_writer<'a>(
    index: &Index,
    slot: &'a mut Option<IndexWriter>,
) -> Result<&'a mut IndexWriter> {
    if slot.is_none() {
        let writer = index
            .writer(WRITER_MEMORY_BUDGET)
            .context("failed to acquire tantivy index writer")?;
        *slot = Some(writer);
    }
    slot.as_mut()
        .ok_or_else(|| anyhow!("tantivy index writer unavailable"))
}

impl MediaStore for TantivyMediaStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Tantivy
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn load_meta(&self) -> Result<StoreMeta> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok(StoreMeta::fresh(crate::index::current_epoch_seconds()));
        }

        let file = File::open(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let meta: StoreMeta = serde_json::from_reader(file)?;
        if meta.schema_version != STORE_SCHEMA_VERSION {
            bail!(
                "unsupported store schema version {}; expected {}",
                meta.schema_version,
                STORE_SCHEMA_VERSION
            );
        }
        Ok(meta)
    }

    fn save_meta(&mut self, meta: &StoreMeta) -> Result<()> {
        // Readers must never observe a partially written file.
        let path = self.meta_path();
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(meta)?)
            .with_context(|| format!("failed to write {}", staging.display()))?;
        fs::rename(&staging, &path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    fn index_batch(&mut self, records: &[Media]) -> Result<BatchReport> {
        let fields = self.fields;
        let writer = ensure_writer(&self.index, &mut self.writer)?;
        let mut report = BatchReport::default();

        for record in records {
            let path = record.path.to_string_lossy();
            writer.delete_term(Term::from_field_text(fields.path, &path));

            let mut doc = TantivyDocument::default();
            doc.add_text(fields.title, &record.title);
            doc.add_text(fields.artist, &record.artist);
            doc.add_text(fields.album, &record.album);
            doc.add_text(fields.genre, &record.genre);
            doc.add_text(fields.path, &path);
            doc.add_u64(fields.track_number, u64::from(record.track_number));
            doc.add_u64(fields.disc_number, u64::from(record.disc_number));

            match writer.add_document(doc) {
                Ok(_) => report.written += 1,
                Err(err) => {
                    warn!(path = %record.path.display(), error = %err, "failed to store record");
                    report.failures.push(WriteFailure {
                        path: record.path.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        self.commit()?;
        Ok(report)
    }

    fn count(&self) -> Result<u64> {
        Ok(self.reader.searcher().num_docs())
    }

    fn search(&self, request: &SearchRequest) -> Result<Vec<Media>> {
        let query = match &request.native {
            Some(text) => self.native_query(text),
            None => self.plan_query(&request.plan)?,
        };

        let mut results = Vec::new();
        for doc in self.collect(query.as_ref())? {
            results.push(self.doc_to_media(&doc)?);
        }
        sort_for_playback(&mut results);
        Ok(results)
    }

    fn all_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for doc in self.collect(&AllQuery)? {
            if let Some(path) = doc.get_first(self.fields.path).and_then(|v| v.as_str()) {
                paths.push(PathBuf::from(path));
            }
        }
        paths.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
        Ok(paths)
    }

    fn remove_paths(&mut self, paths: &[PathBuf]) -> Result<u64> {
        let searcher = self.reader.searcher();
        let terms: Vec<Term> = paths.iter().map(|p| self.path_term(p)).collect();

        let mut removed: u64 = 0;
        for term in &terms {
            let query = TermQuery::new(term.clone(), IndexRecordOption::Basic);
            removed += searcher.search(&query, &Count)? as u64;
        }

        let writer = ensure_writer(&self.index, &mut self.writer)?;
        for term in terms {
            writer.delete_term(term);
        }
        self.commit()?;
        Ok(removed)
    }

    fn clear(&mut self) -> Result<()> {
        let writer = ensure_writer(&self.index, &mut self.writer)?;
        writer.delete_all_documents()?;
        self.commit()
    }

    fn last_modified(&self) -> Result<Option<SystemTime>> {
        let mut newest: Option<SystemTime> = None;
        for entry in fs::read_dir(&self.path)? {
            let modified = match entry.and_then(|e| e.metadata()).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if newest.map_or(true, |n| modified > n) {
                newest = Some(modified);
            }
        }
        Ok(newest)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let store = *self;
        if let Some(writer) = store.writer {
            writer.wait_merging_threads()?;
        }
        Ok(())
    }
}
