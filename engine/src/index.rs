//! Full-text search index over dictionary entries.
//!
//! The index is built in one go from a snapshot of the local store and is
//! never patched afterwards; a rebuild replaces it wholesale. Documents live
//! in an in-memory tantivy index with one text field per searchable schema
//! field, analyzed by [`text::analyzer`].
//!
//! # Ranking
//!
//! Each query token must match a document (AND semantics). A token matches a
//! field by exact term, scored with BM25 and boosted by the field weight; the
//! last token also matches as a prefix at half the field weight. A document
//! whose primary field equals the whole query gets a flat boost. Ties are
//! broken by key so results are stable.

use crate::{error::Result, text, EntryKey, EntrySchema, Error, Record, SchemaVersion};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tantivy::collector::TopDocs;
use tantivy::query::{
    BooleanQuery, BoostQuery, ConstScoreQuery, FuzzyTermQuery, Occur, Query, TermQuery,
};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED, STRING,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

const PREFIX_MATCH_FACTOR: f32 = 0.5;
const EXACT_PRIMARY_BOOST: f32 = 10.0;
/// Indexing arena for the single writer thread
const WRITER_MEMORY_BYTES: usize = 20_000_000;

/// A record shaped for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub key: EntryKey,
    /// Normalized text of the schema's primary field
    pub primary: Option<String>,
    /// `(schema field, text)` for every searchable value that yields tokens
    pub texts: Vec<(String, String)>,
    /// Distinct tokens across all searchable fields
    pub terms: BTreeSet<String>,
}

impl IndexDocument {
    /// Validate a record against the schema and extract its searchable text.
    pub fn shape(record: &Record, schema: &EntrySchema) -> Result<Self> {
        if record.deleted {
            return Err(Error::Unindexable {
                key: record.key.clone(),
                reason: "record is deleted".into(),
            });
        }
        record.validate_shape()?;
        schema.validate_payload(&record.payload)?;

        let mut texts = Vec::new();
        let mut terms = BTreeSet::new();
        for (field, _) in schema.searchable_fields() {
            for value in field_texts(record.payload.get(&field.name)) {
                let tokens = text::tokenize(value);
                if tokens.is_empty() {
                    continue;
                }
                terms.extend(tokens);
                texts.push((field.name.clone(), value.to_string()));
            }
        }

        if terms.is_empty() {
            return Err(Error::Unindexable {
                key: record.key.clone(),
                reason: "no searchable text".into(),
            });
        }

        let primary = schema
            .primary_field()
            .and_then(|f| record.payload.get(&f.name))
            .and_then(|v| v.as_str())
            .map(text::normalize)
            .filter(|s| !s.is_empty());

        Ok(Self {
            key: record.key.clone(),
            primary,
            texts,
            terms,
        })
    }
}

fn field_texts(value: Option<&serde_json::Value>) -> Vec<&str> {
    match value {
        Some(serde_json::Value::String(s)) => vec![s.as_str()],
        Some(serde_json::Value::Array(items)) => items.iter().filter_map(|v| v.as_str()).collect(),
        _ => Vec::new(),
    }
}

/// Tantivy fields backing one [`EntrySchema`].
#[derive(Debug, Clone)]
struct Fields {
    /// Position of the record in `SearchIndex::records`
    ordinal: Field,
    primary: Field,
    /// Schema field name, tantivy field, weight
    searchable: Vec<(String, Field, f32)>,
}

impl Fields {
    fn layout(schema: &EntrySchema) -> (Schema, Self) {
        let mut builder = Schema::builder();
        let ordinal = builder.add_u64_field("ordinal", STORED);
        let primary = builder.add_text_field("primary", STRING);

        let options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(text::ANALYZER)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
        // Schema field names are not guaranteed to be valid tantivy names
        let searchable = schema
            .searchable_fields()
            .enumerate()
            .map(|(i, (field, weight))| {
                let tantivy_field = builder.add_text_field(&format!("field{}", i), options.clone());
                (field.name.clone(), tantivy_field, weight)
            })
            .collect();

        let fields = Self {
            ordinal,
            primary,
            searchable,
        };
        (builder.build(), fields)
    }

    fn document(&self, ordinal: usize, shaped: &IndexDocument) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_u64(self.ordinal, ordinal as u64);
        if let Some(primary) = &shaped.primary {
            doc.add_text(self.primary, primary);
        }
        for (name, value) in &shaped.texts {
            for (_, field, _) in self.searchable.iter().filter(|(n, _, _)| n == name) {
                doc.add_text(*field, value);
            }
        }
        doc
    }
}

/// Accumulates documents for a fresh index.
#[derive(Debug)]
pub struct IndexBuilder {
    schema: EntrySchema,
    records: Vec<Record>,
    documents: Vec<IndexDocument>,
    by_key: HashMap<EntryKey, usize>,
}

impl IndexBuilder {
    pub fn new(schema: EntrySchema) -> Self {
        Self {
            schema,
            records: Vec::new(),
            documents: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    /// Add a record. On error nothing is added, so the caller can skip the
    /// record and keep going.
    pub fn insert(&mut self, record: Record) -> Result<()> {
        if self.by_key.contains_key(&record.key) {
            return Err(Error::DuplicateEntry(record.key));
        }

        let document = IndexDocument::shape(&record, &self.schema)?;
        self.by_key.insert(record.key.clone(), self.records.len());
        self.documents.push(document);
        self.records.push(record);
        Ok(())
    }

    /// Number of documents added so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write every accepted document into a new in-memory index.
    pub fn build(self) -> Result<SearchIndex> {
        let (tantivy_schema, fields) = Fields::layout(&self.schema);
        let index = Index::create_in_ram(tantivy_schema);
        index.tokenizers().register(text::ANALYZER, text::analyzer());

        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_MEMORY_BYTES)?;
        let mut terms = BTreeSet::new();
        for (ordinal, document) in self.documents.into_iter().enumerate() {
            writer.add_document(fields.document(ordinal, &document))?;
            terms.extend(document.terms);
        }
        writer.commit()?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(SearchIndex {
            schema_version: self.schema.version,
            records: self.records,
            by_key: self.by_key,
            term_count: terms.len(),
            fields,
            reader,
        })
    }
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub record: Record,
    pub score: f32,
}

/// Immutable, queryable index.
#[derive(Clone)]
pub struct SearchIndex {
    schema_version: SchemaVersion,
    records: Vec<Record>,
    by_key: HashMap<EntryKey, usize>,
    term_count: usize,
    fields: Fields,
    reader: IndexReader,
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex")
            .field("schema_version", &self.schema_version)
            .field("len", &self.records.len())
            .field("term_count", &self.term_count)
            .finish_non_exhaustive()
    }
}

impl SearchIndex {
    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of distinct terms.
    pub fn term_count(&self) -> usize {
        self.term_count
    }

    pub fn schema_version(&self) -> SchemaVersion {
        self.schema_version
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.by_key.get(key).map(|&doc| &self.records[doc])
    }

    /// Keys of all indexed entries, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &EntryKey> {
        self.records.iter().map(|r| &r.key)
    }

    /// Run a query and return at most `limit` hits, best first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let tokens = text::tokenize(query);
        if tokens.is_empty() || limit == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }

        let compiled = self.compile(&tokens, &tokens.join(" "));
        let searcher = self.reader.searcher();
        // Collect every match so ties can be ordered by key before truncating
        let matches = searcher.search(&compiled, &TopDocs::with_limit(self.records.len()))?;

        let mut hits = Vec::with_capacity(matches.len());
        for (score, address) in matches {
            let doc: TantivyDocument = searcher.doc(address)?;
            let record = doc
                .get_first(self.fields.ordinal)
                .and_then(|value| value.as_u64())
                .and_then(|ordinal| self.records.get(ordinal as usize));
            if let Some(record) = record {
                hits.push(SearchHit {
                    record: record.clone(),
                    score,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.record.key.cmp(&b.record.key))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn compile(&self, tokens: &[String], normalized: &str) -> BooleanQuery {
        let last = tokens.len() - 1;
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::with_capacity(tokens.len() + 1);

        for (i, token) in tokens.iter().enumerate() {
            let mut alternatives: Vec<(Occur, Box<dyn Query>)> = Vec::new();
            for (_, field, weight) in &self.fields.searchable {
                let term = Term::from_field_text(*field, token);
                let exact = TermQuery::new(term.clone(), IndexRecordOption::WithFreqs);
                alternatives.push((
                    Occur::Should,
                    Box::new(BoostQuery::new(Box::new(exact), *weight)),
                ));

                if i == last {
                    let prefix = FuzzyTermQuery::new_prefix(term, 0, true);
                    alternatives.push((
                        Occur::Should,
                        Box::new(BoostQuery::new(Box::new(prefix), weight * PREFIX_MATCH_FACTOR)),
                    ));
                }
            }
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(alternatives))));
        }

        let exact_primary = TermQuery::new(
            Term::from_field_text(self.fields.primary, normalized),
            IndexRecordOption::Basic,
        );
        clauses.push((
            Occur::Should,
            Box::new(ConstScoreQuery::new(Box::new(exact_primary), EXACT_PRIMARY_BOOST)),
        ));

        BooleanQuery::new(clauses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, headword: &str, senses: &[&str]) -> Record {
        Record::new_local(key, json!({"headword": headword, "senses": senses}), 1000)
    }

    fn build(records: Vec<Record>) -> SearchIndex {
        let mut builder = IndexBuilder::new(EntrySchema::dictionary());
        for record in records {
            builder.insert(record).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn shape_extracts_searchable_text() {
        let record = Record::new_local(
            "e1",
            json!({"headword": "Tree", "reading": "tree", "senses": ["a woody plant"], "tags": ["botany"]}),
            1000,
        );
        let doc = IndexDocument::shape(&record, &EntrySchema::dictionary()).unwrap();

        assert_eq!(doc.primary.as_deref(), Some("tree"));
        let terms: Vec<_> = doc.terms.iter().map(String::as_str).collect();
        assert_eq!(terms, vec!["a", "botany", "plant", "tree", "woody"]);
        assert_eq!(doc.texts[0], ("headword".to_string(), "Tree".to_string()));
        assert_eq!(doc.texts.len(), 4);
    }

    #[test]
    fn shape_rejects_malformed_records() {
        let schema = EntrySchema::dictionary();

        let missing = Record::new_local("e1", json!({"senses": ["x"]}), 1000);
        assert!(matches!(
            IndexDocument::shape(&missing, &schema),
            Err(Error::MissingRequiredField(_))
        ));

        let blank = Record::new_local("e2", json!({"headword": "--", "senses": ["!!"]}), 1000);
        assert!(matches!(
            IndexDocument::shape(&blank, &schema),
            Err(Error::Unindexable { .. })
        ));

        let mut deleted = entry("e3", "tree", &["plant"]);
        deleted.delete_local(2000);
        assert!(matches!(
            IndexDocument::shape(&deleted, &schema),
            Err(Error::Unindexable { .. })
        ));
    }

    #[test]
    fn builder_rejects_duplicates_without_side_effects() {
        let mut builder = IndexBuilder::new(EntrySchema::dictionary());
        builder.insert(entry("e1", "tree", &["plant"])).unwrap();

        let result = builder.insert(entry("e1", "oak", &["plant"]));
        assert!(matches!(result, Err(Error::DuplicateEntry(_))));
        assert_eq!(builder.len(), 1);

        let index = builder.build().unwrap();
        assert_eq!(index.get("e1").unwrap().payload["headword"], "tree");
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = IndexBuilder::new(EntrySchema::dictionary()).build().unwrap();
        assert!(index.is_empty());
        assert_eq!(index.term_count(), 0);
        assert!(index.search("anything", 10).unwrap().is_empty());
    }

    #[test]
    fn blank_query_returns_nothing() {
        let index = build(vec![entry("e1", "tree", &["plant"])]);
        assert!(index.search("   ", 10).unwrap().is_empty());
        assert!(index.search("tree", 0).unwrap().is_empty());
    }

    #[test]
    fn exact_headword_ranks_first() {
        let index = build(vec![
            entry("e1", "treehouse", &["a house built in a tree"]),
            entry("e2", "tree", &["a woody plant"]),
            entry("e3", "forest", &["many a tree together"]),
        ]);

        let hits = index.search("Tree", 10).unwrap();
        let keys: Vec<_> = hits.iter().map(|h| h.record.key.as_str()).collect();
        assert_eq!(keys[0], "e2");
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn all_tokens_must_match() {
        let index = build(vec![
            entry("e1", "apple", &["a red fruit"]),
            entry("e2", "cherry", &["a small red fruit"]),
            entry("e3", "brick", &["red building block"]),
        ]);

        let keys: Vec<_> = index
            .search("red fruit", 10)
            .unwrap()
            .into_iter()
            .map(|h| h.record.key)
            .collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"e1".to_string()));
        assert!(keys.contains(&"e2".to_string()));
    }

    #[test]
    fn last_token_matches_prefix() {
        let index = build(vec![
            entry("e1", "elephant", &["a large mammal"]),
            entry("e2", "element", &["a basic part"]),
            entry("e3", "lemon", &["a sour fruit"]),
        ]);

        let hits = index.search("ele", 10).unwrap();
        assert_eq!(hits.len(), 2);

        // Earlier tokens must match whole terms.
        assert!(index.search("ele part", 10).unwrap().is_empty());
        assert_eq!(index.search("basic pa", 10).unwrap().len(), 1);
    }

    #[test]
    fn exact_match_beats_prefix_match() {
        let index = build(vec![
            entry("e1", "cart", &["a wheeled vehicle"]),
            entry("e2", "car", &["a motor vehicle"]),
        ]);

        let hits = index.search("car", 10).unwrap();
        assert_eq!(hits[0].record.key, "e2");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn ties_break_by_key() {
        let index = build(vec![
            entry("b", "same", &["word"]),
            entry("a", "same", &["word"]),
        ]);
        let keys: Vec<_> = index
            .search("word", 10)
            .unwrap()
            .into_iter()
            .map(|h| h.record.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn heavier_fields_rank_higher() {
        let index = build(vec![
            entry("e1", "stone", &["a piece of granite"]),
            entry("e2", "granite", &["a hard stone"]),
        ]);

        let hits = index.search("granite rock", 10).unwrap();
        assert!(hits.is_empty());

        // Headword weight beats senses weight
        let hits = index.search("stone", 10).unwrap();
        assert_eq!(hits[0].record.key, "e1");
        let hits = index.search("hard granite", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.key, "e2");
    }

    #[test]
    fn limit_truncates() {
        let records = (0..20)
            .map(|i| entry(&format!("e{:02}", i), &format!("word{}", i), &["common"]))
            .collect();
        let index = build(records);
        assert_eq!(index.search("common", 5).unwrap().len(), 5);
    }
}
