
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, Table};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::embeddings::{DocumentChunk, Embedder};
use crate::loaders::Metadata;
use crate::{RagError, Result};

/// Table holding one row per chunk
const TABLE: &str = "chunks";
const VECTOR_COLUMN: &str = "vector";
const ORDINAL_COLUMN: &str = "ordinal";
const TEXT_COLUMN: &str = "text";
const METADATA_COLUMN: &str = "metadata";
const DISTANCE_COLUMN: &str = "_distance";

/// A stored chunk and its L2 distance from the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk: DocumentChunk,
    pub distance: f32,
}

/// What `load` found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLoad {
    Missing,
    Loaded { count: usize },
    /// The persisted index was unusable; the store starts empty
    Corrupt { message: String },
}

#[derive(Default)]
struct IndexState {
    table: Option<Table>,
    dimension: Option<usize>,
    count: usize,
    /// Set when the directory on disk failed to load; it is moved aside
    /// before anything new is written
    quarantine: bool,
}

/// Nearest-neighbour index over embedded chunks, stored as a LanceDB table.
///
/// Every row carries the chunk text, its metadata as JSON and an insertion
/// ordinal next to the vector, so one commit writes the vectors and the
/// chunks they map to. Writers (add, save, rebuild) take the write lock,
/// searches take the read lock. Embedding happens before any lock is taken.
pub struct VectorIndexStore {
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
    state: RwLock<IndexState>,
}

impl std::fmt::Debug for VectorIndexStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndexStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn database_error(context: &str, error: impl std::fmt::Display) -> RagError {
    RagError::Database(format!("{}: {}", context, error))
}

impl VectorIndexStore {
    /// An empty, unloaded store persisting to `path`
    #[inline]
    pub fn new(path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            path: path.into(),
            embedder,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Create a store and load whatever is persisted at `path`
    #[inline]
    pub async fn open(path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let store = Self::new(path, embedder);
        store.load().await?;
        Ok(store)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory handle with the persisted table.
    ///
    /// A missing index yields an empty store. An unreadable one also yields
    /// an empty store, and its files are left untouched.
    #[inline]
    pub async fn load(&self) -> Result<IndexLoad> {
        let mut state = self.state.write().await;

        if !self.path.exists() {
            info!(
                "No vector index at {}, starting empty",
                self.path.display()
            );
            *state = IndexState::default();
            return Ok(IndexLoad::Missing);
        }

        match self.open_existing().await {
            Ok(None) => {
                info!(
                    "No vector index at {}, starting empty",
                    self.path.display()
                );
                *state = IndexState::default();
                Ok(IndexLoad::Missing)
            }
            Ok(Some(loaded)) => {
                let count = loaded.count;
                info!(
                    "Loaded vector index from {} ({} vectors, dimension {:?})",
                    self.path.display(),
                    count,
                    loaded.dimension
                );
                *state = loaded;
                Ok(IndexLoad::Loaded { count })
            }
            Err(message) => {
                let err = RagError::IndexCorrupt {
                    path: self.path.display().to_string(),
                    message: message.clone(),
                };
                error!("{}; starting with an empty index", err);
                *state = IndexState {
                    quarantine: true,
                    ..IndexState::default()
                };
                Ok(IndexLoad::Corrupt { message })
            }
        }
    }

    /// Number of stored vectors
    #[inline]
    pub async fn count(&self) -> usize {
        self.state.read().await.count
    }

    /// Dimensionality fixed by the first add, if any
    #[inline]
    pub async fn dimension(&self) -> Option<usize> {
        self.state.read().await.dimension
    }

    /// Embed and insert chunks.
    ///
    /// The first insert creates the table; each insert is its own commit.
    #[inline]
    pub async fn add(&self, chunks: Vec<DocumentChunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let vectors = self.embed_chunks(&chunks).await?;

        let mut state = self.state.write().await;
        self.insert(&mut state, &chunks, &vectors).await
    }

    /// Embed, insert and compact in one writer critical section
    #[inline]
    pub async fn add_and_save(&self, chunks: Vec<DocumentChunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let vectors = self.embed_chunks(&chunks).await?;

        let mut state = self.state.write().await;
        let added = self.insert(&mut state, &chunks, &vectors).await?;
        if let Err(e) = compact(&state).await {
            warn!("Inserted chunks are committed but compaction failed: {}", e);
        }

        info!(
            "Added {} chunks to the vector index ({} total)",
            added, state.count
        );
        Ok(added)
    }

    /// Compact the committed table.
    ///
    /// Saving a store that has never been written is a no-op.
    #[inline]
    pub async fn save(&self) -> Result<()> {
        let state = self.state.write().await;
        compact(&state).await
    }

    /// Discard the index and build a new one from `chunks`
    #[inline]
    pub async fn rebuild(&self, chunks: Vec<DocumentChunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Err(RagError::NoDocumentsAdded);
        }
        let vectors = self.embed_chunks(&chunks).await?;
        let dimension = check_dimension(None, &vectors)?;
        let batch = record_batch(dimension, 0, &chunks, &vectors)?;

        let mut state = self.state.write().await;
        self.set_aside_if_quarantined(&mut state)?;

        let connection = self.connect().await?;
        drop_table_if_exists(&connection).await?;
        let table = create_table(&connection, batch).await?;

        *state = IndexState {
            table: Some(table),
            dimension: Some(dimension),
            count: chunks.len(),
            quarantine: false,
        };
        info!("Rebuilt vector index with {} chunks", chunks.len());
        Ok(chunks.len())
    }

    /// Up to `k` stored chunks nearest to `query`, nearest first.
    ///
    /// Equal distances keep insertion order. An empty index yields no hits.
    #[inline]
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || self.count().await == 0 {
            debug!("Vector index is empty, returning no results");
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_query(query).await?;

        let state = self.state.read().await;
        let Some(table) = state.table.as_ref() else {
            return Ok(Vec::new());
        };
        if let Some(expected) = state.dimension.filter(|d| *d != query_vector.len()) {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: query_vector.len(),
            });
        }

        let mut results = table
            .vector_search(query_vector.as_slice())
            .map_err(|e| database_error("Failed to create vector search", e))?
            .column(VECTOR_COLUMN)
            .limit(k)
            .execute()
            .await
            .map_err(|e| database_error("Failed to execute search", e))?;

        let mut scored = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| database_error("Failed to read result stream", e))?
        {
            scored.extend(parse_hits(&batch)?);
        }
        scored.sort_by(|a, b| {
            a.1.distance
                .total_cmp(&b.1.distance)
                .then_with(|| a.0.cmp(&b.0))
        });
        let hits: Vec<SearchHit> = scored.into_iter().take(k).map(|(_, hit)| hit).collect();

        debug!("Similarity search returned {} hits", hits.len());
        Ok(hits)
    }

    async fn embed_chunks(&self, chunks: &[DocumentChunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        debug!("Embedding {} chunks", texts.len());
        let vectors = self.embedder.embed_documents(&texts).await?;

        if vectors.len() != chunks.len() {
            return Err(RagError::Provider(format!(
                "Embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        Ok(vectors)
    }

    async fn connect(&self) -> Result<Connection> {
        let uri = self.path.to_string_lossy();
        lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| database_error("Failed to connect to LanceDB", e))
    }

    /// Open the persisted table. `Err` carries why it is unusable.
    async fn open_existing(&self) -> std::result::Result<Option<IndexState>, String> {
        let connection = self.connect().await.map_err(|e| e.to_string())?;
        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| format!("failed to list tables: {}", e))?;
        if !table_names.iter().any(|name| name == TABLE) {
            return Ok(None);
        }

        let table = connection
            .open_table(TABLE)
            .execute()
            .await
            .map_err(|e| format!("failed to open table: {}", e))?;
        let schema = table
            .schema()
            .await
            .map_err(|e| format!("failed to read schema: {}", e))?;
        let dimension = dimension_of(&schema)?;
        let count = table
            .count_rows(None)
            .await
            .map_err(|e| format!("failed to count rows: {}", e))?;

        Ok(Some(IndexState {
            table: Some(table),
            dimension: Some(dimension),
            count,
            quarantine: false,
        }))
    }

    /// Insert rows, creating the table on the first insert
    async fn insert(
        &self,
        state: &mut IndexState,
        chunks: &[DocumentChunk],
        vectors: &[Vec<f32>],
    ) -> Result<usize> {
        let dimension = check_dimension(state.dimension, vectors)?;
        let batch = record_batch(dimension, state.count, chunks, vectors)?;

        if let Some(table) = &state.table {
            let schema = batch.schema();
            let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
            table
                .add(reader)
                .execute()
                .await
                .map_err(|e| database_error("Failed to insert chunks", e))?;
        } else {
            self.set_aside_if_quarantined(state)?;
            let connection = self.connect().await?;
            let table = create_table(&connection, batch).await?;
            debug!(
                "Created vector table at {} with dimension {}",
                self.path.display(),
                dimension
            );
            state.table = Some(table);
        }

        state.dimension = Some(dimension);
        state.count += chunks.len();
        Ok(chunks.len())
    }

    /// Move an unreadable index directory out of the way before writing
    fn set_aside_if_quarantined(&self, state: &mut IndexState) -> Result<()> {
        if !state.quarantine {
            return Ok(());
        }
        if self.path.exists() {
            let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
            let aside = sibling(&self.path, &format!(".corrupt-{}", stamp));
            warn!(
                "Moving unreadable vector index aside to {}",
                aside.display()
            );
            fs::rename(&self.path, &aside)?;
        }
        state.quarantine = false;
        Ok(())
    }
}

/// Compact the table's fragments and drop superseded versions
async fn compact(state: &IndexState) -> Result<()> {
    let Some(table) = &state.table else {
        debug!("Vector index was never initialized, nothing to save");
        return Ok(());
    };
    table
        .optimize(lancedb::table::OptimizeAction::All)
        .await
        .map_err(|e| database_error("Failed to optimize table", e))?;
    debug!("Compacted vector index with {} vectors", state.count);
    Ok(())
}

async fn create_table(connection: &Connection, batch: RecordBatch) -> Result<Table> {
    let schema = batch.schema();
    let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
    connection
        .create_table(TABLE, reader)
        .execute()
        .await
        .map_err(|e| database_error("Failed to create table", e))
}

async fn drop_table_if_exists(connection: &Connection) -> Result<()> {
    let table_names = connection
        .table_names()
        .execute()
        .await
        .map_err(|e| database_error("Failed to list tables", e))?;

    if table_names.iter().any(|name| name == TABLE) {
        info!("Dropping existing vector table");
        connection
            .drop_table(TABLE)
            .await
            .map_err(|e| database_error("Failed to drop table", e))?;
    }
    Ok(())
}

/// The dimension every vector must have, fixed by the first insert
fn check_dimension(current: Option<usize>, vectors: &[Vec<f32>]) -> Result<usize> {
    let expected = match current {
        Some(dimension) => dimension,
        None => vectors.first().map(Vec::len).unwrap_or_default(),
    };

    if expected == 0 {
        return Err(RagError::Provider(
            "Embedding provider returned empty vectors".to_string(),
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return Err(RagError::DimensionMismatch {
            expected,
            actual: bad.len(),
        });
    }
    Ok(expected)
}

fn vector_field() -> Arc<Field> {
    Arc::new(Field::new("item", DataType::Float32, false))
}

fn schema(dimension: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(ORDINAL_COLUMN, DataType::UInt64, false),
        Field::new(
            VECTOR_COLUMN,
            DataType::FixedSizeList(vector_field(), dimension),
            false,
        ),
        Field::new(TEXT_COLUMN, DataType::Utf8, false),
        Field::new(METADATA_COLUMN, DataType::Utf8, false),
    ]))
}

/// Vector dimension of a table written by this store
fn dimension_of(schema: &Schema) -> std::result::Result<usize, String> {
    for column in [ORDINAL_COLUMN, TEXT_COLUMN, METADATA_COLUMN] {
        schema
            .field_with_name(column)
            .map_err(|_| format!("missing {} column", column))?;
    }
    match schema.field_with_name(VECTOR_COLUMN).map(Field::data_type) {
        Ok(DataType::FixedSizeList(_, size)) if *size > 0 => usize::try_from(*size)
            .map_err(|_| format!("invalid vector dimension {}", size)),
        Ok(other) => Err(format!("unexpected vector column type {}", other)),
        Err(_) => Err(format!("missing {} column", VECTOR_COLUMN)),
    }
}

/// Rows for `chunks`, numbered from `first_ordinal`
fn record_batch(
    dimension: usize,
    first_ordinal: usize,
    chunks: &[DocumentChunk],
    vectors: &[Vec<f32>],
) -> Result<RecordBatch> {
    let list_size = i32::try_from(dimension)
        .map_err(|_| database_error("Vector dimension too large", dimension))?;

    let ordinals: Vec<u64> = (first_ordinal..first_ordinal + chunks.len())
        .map(|ordinal| ordinal as u64)
        .collect();
    let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
    let metadata = chunks
        .iter()
        .map(|chunk| serde_json::to_string(&chunk.metadata))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RagError::Other(e.into()))?;

    let flat_values: Vec<f32> = vectors.iter().flatten().copied().collect();
    let vector_array = FixedSizeListArray::try_new(
        vector_field(),
        list_size,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| database_error("Failed to create vector array", e))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(UInt64Array::from(ordinals)),
        Arc::new(vector_array),
        Arc::new(StringArray::from(texts)),
        Arc::new(StringArray::from(metadata)),
    ];
    RecordBatch::try_new(schema(list_size), arrays)
        .map_err(|e| database_error("Failed to create record batch", e))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

/// `(ordinal, hit)` for every row of a search result batch
fn parse_hits(batch: &RecordBatch) -> Result<Vec<(u64, SearchHit)>> {
    let ordinals = column::<UInt64Array>(batch, ORDINAL_COLUMN)?;
    let texts = column::<StringArray>(batch, TEXT_COLUMN)?;
    let metadata = column::<StringArray>(batch, METADATA_COLUMN)?;
    let distances = column::<Float32Array>(batch, DISTANCE_COLUMN)?;

    (0..batch.num_rows())
        .map(|row| {
            let chunk_metadata: Metadata = serde_json::from_str(metadata.value(row))
                .map_err(|e| database_error("Invalid chunk metadata", e))?;
            Ok((
                ordinals.value(row),
                SearchHit {
                    chunk: DocumentChunk::new(texts.value(row), chunk_metadata),
                    distance: distances.value(row),
                },
            ))
        })
        .collect()
}

/// `<path><suffix>`, next to `path`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| OsString::from("vector_db"));
    name.push(suffix);
    path.with_file_name(name)
}
