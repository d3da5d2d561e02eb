//! Qdrant-backed hybrid store: one collection with a named dense vector and
//! a named sparse vector, plus keyword payload indexes for filtering.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, NamedVectors, PointId, PointStruct, Query,
    QueryPointsBuilder, ScoredPoint, ScrollPointsBuilder, SparseVectorParamsBuilder,
    SparseVectorsConfigBuilder, UpsertPointsBuilder, Vector, VectorInput, VectorParamsBuilder,
    VectorsConfigBuilder,
};

use crate::error::StoreError;
use crate::record::{ChunkKind, ChunkRecord, IndexedEntry, ScoredEntry, SearchFilter};
use crate::sparse::SparseVector;
use crate::store::HybridStore;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const DENSE_VECTOR: &str = "dense";
const SPARSE_VECTOR: &str = "sparse";
const SCROLL_PAGE: u32 = 256;

/// Hybrid store over a single Qdrant collection.
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
}

impl std::fmt::Debug for QdrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl QdrantStore {
    /// # Errors
    ///
    /// Returns an error if the Qdrant client fails to build.
    pub fn new(url: &str, collection: impl Into<String>) -> Result<Self, StoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            collection: collection.into(),
        })
    }

    async fn query_signal(
        &self,
        query: Query,
        using: &str,
        filter: Option<SearchFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        let glob = filter.as_ref().and_then(|f| f.file_glob.clone());

        let mut builder = QueryPointsBuilder::new(&self.collection)
            .query(query)
            .using(using)
            .limit(limit as u64)
            .with_payload(true);
        if let Some(native) = filter.as_ref().and_then(native_filter) {
            builder = builder.filter(native);
        }

        let response = self
            .client
            .query(builder)
            .await
            .map_err(|e| StoreError::Search(e.to_string()))?;

        let mut hits: Vec<ScoredEntry> = response
            .result
            .iter()
            .filter_map(scored_entry_from_point)
            .collect();

        // Globs have no native Qdrant form; apply them on the decoded hits.
        if let Some(pattern) = glob
            && let Ok(pat) = glob::Pattern::new(&pattern)
        {
            hits.retain(|h| pat.matches(&h.chunk.file));
        }
        Ok(hits)
    }
}

impl HybridStore for QdrantStore {
    fn ensure_ready(&self, vector_size: u64) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let exists = self
                .client
                .collection_exists(&self.collection)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            if exists {
                return Ok(());
            }

            let mut dense_config = VectorsConfigBuilder::default();
            dense_config.add_named_vector_params(
                DENSE_VECTOR,
                VectorParamsBuilder::new(vector_size, Distance::Cosine).build(),
            );
            let mut sparse_config = SparseVectorsConfigBuilder::default();
            sparse_config.add_named_vector_params(SPARSE_VECTOR, SparseVectorParamsBuilder::default());

            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(dense_config)
                        .sparse_vectors_config(sparse_config),
                )
                .await
                .map_err(|e| StoreError::Collection(e.to_string()))?;

            for field in ["file", "language", "kind", "project"] {
                self.client
                    .create_field_index(CreateFieldIndexCollectionBuilder::new(
                        &self.collection,
                        field,
                        FieldType::Keyword,
                    ))
                    .await
                    .map_err(|e| StoreError::Collection(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn upsert(&self, entries: Vec<IndexedEntry>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let points = build_points(&entries)?;
            self.client
                .upsert_points(UpsertPointsBuilder::new(&self.collection, points))
                .await
                .map_err(|e| StoreError::Upsert(e.to_string()))?;
            Ok(())
        })
    }

    fn replace_file(
        &self,
        path: &str,
        entries: Vec<IndexedEntry>,
    ) -> BoxFuture<'_, Result<usize, StoreError>> {
        let path = path.to_owned();
        Box::pin(async move {
            let file_filter = Filter::must([Condition::matches("file", path.clone())]);
            let before = self
                .client
                .count(
                    CountPointsBuilder::new(&self.collection)
                        .filter(file_filter.clone())
                        .exact(true),
                )
                .await
                .map_err(|e| StoreError::Upsert(e.to_string()))?
                .result
                .map_or(0, |r| r.count);

            if entries.is_empty() {
                if before > 0 {
                    self.client
                        .delete_points(
                            DeletePointsBuilder::new(&self.collection).points(file_filter),
                        )
                        .await
                        .map_err(|e| StoreError::Delete(e.to_string()))?;
                }
                return usize::try_from(before).map_err(|e| StoreError::Delete(e.to_string()));
            }

            // New points first: deterministic point ids overwrite in place,
            // so a concurrent reader sees the old chunk set or the new one,
            // never the file missing from the collection.
            let new_ids: Vec<PointId> = entries
                .iter()
                .map(|e| PointId::from(point_id(&e.chunk.id)))
                .collect();
            let points = build_points(&entries)?;
            self.client
                .upsert_points(UpsertPointsBuilder::new(&self.collection, points))
                .await
                .map_err(|e| StoreError::Upsert(e.to_string()))?;

            let stale = Filter {
                must: vec![Condition::matches("file", path.clone())],
                must_not: vec![Condition::has_id(new_ids)],
                ..Filter::default()
            };
            self.client
                .delete_points(DeletePointsBuilder::new(&self.collection).points(stale))
                .await
                .map_err(|e| StoreError::Delete(e.to_string()))?;

            usize::try_from(before).map_err(|e| StoreError::Delete(e.to_string()))
        })
    }

    fn delete_by_file(&self, path: &str) -> BoxFuture<'_, Result<usize, StoreError>> {
        let path = path.to_owned();
        Box::pin(async move {
            let filter = Filter::must([Condition::matches("file", path.clone())]);

            let count = self
                .client
                .count(
                    CountPointsBuilder::new(&self.collection)
                        .filter(filter.clone())
                        .exact(true),
                )
                .await
                .map_err(|e| StoreError::Delete(e.to_string()))?
                .result
                .map_or(0, |r| r.count);

            if count > 0 {
                self.client
                    .delete_points(DeletePointsBuilder::new(&self.collection).points(filter))
                    .await
                    .map_err(|e| StoreError::Delete(e.to_string()))?;
            }
            usize::try_from(count).map_err(|e| StoreError::Delete(e.to_string()))
        })
    }

    fn query_dense(
        &self,
        vector: Vec<f32>,
        filter: Option<SearchFilter>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredEntry>, StoreError>> {
        Box::pin(async move {
            self.query_signal(Query::new_nearest(vector), DENSE_VECTOR, filter, limit)
                .await
        })
    }

    fn query_sparse(
        &self,
        sparse: SparseVector,
        filter: Option<SearchFilter>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredEntry>, StoreError>> {
        Box::pin(async move {
            let (indices, values) = sparse.to_indexed();
            self.query_signal(
                Query::new_nearest(VectorInput::new_sparse(indices, values)),
                SPARSE_VECTOR,
                filter,
                limit,
            )
            .await
        })
    }

    fn indexed_files(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        Box::pin(async {
            let chunks = collect_chunks(self).await?;
            let mut files: Vec<String> = chunks.into_iter().map(|c| c.file).collect();
            files.sort_unstable();
            files.dedup();
            Ok(files)
        })
    }

    fn scroll_chunks(&self) -> BoxFuture<'_, Result<Vec<ChunkRecord>, StoreError>> {
        Box::pin(async { collect_chunks(self).await })
    }

    fn chunk_count(&self) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async {
            let count = self
                .client
                .count(CountPointsBuilder::new(&self.collection).exact(true))
                .await
                .map_err(|e| StoreError::Search(e.to_string()))?
                .result
                .map_or(0, |r| r.count);
            usize::try_from(count).map_err(|e| StoreError::Search(e.to_string()))
        })
    }

    fn healthy(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { self.client.health_check().await.is_ok() })
    }
}

async fn collect_chunks(store: &QdrantStore) -> Result<Vec<ChunkRecord>, StoreError> {
    let mut chunks = Vec::new();
    let mut offset: Option<PointId> = None;

    loop {
        let mut builder = ScrollPointsBuilder::new(&store.collection)
            .with_payload(true)
            .with_vectors(false)
            .limit(SCROLL_PAGE);
        if let Some(ref off) = offset {
            builder = builder.offset(off.clone());
        }

        let response = store
            .client
            .scroll(builder)
            .await
            .map_err(|e| StoreError::Search(e.to_string()))?;

        for point in &response.result {
            if let Some(chunk) = chunk_from_payload(&point.payload) {
                chunks.push(chunk);
            }
        }

        match response.next_page_offset {
            Some(next) => offset = Some(next),
            None => break,
        }
    }
    Ok(chunks)
}

/// Qdrant point ids must be u64 or UUID; derive a deterministic v5 UUID from
/// the chunk id so re-upserting the same chunk overwrites its point.
fn point_id(chunk_id: &str) -> String {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

fn build_points(entries: &[IndexedEntry]) -> Result<Vec<PointStruct>, StoreError> {
    let mut points = Vec::with_capacity(entries.len());
    for entry in entries {
        let payload = encode_payload(entry)?;
        let (indices, values) = entry.sparse.to_indexed();
        let vectors = NamedVectors::default()
            .add_vector(DENSE_VECTOR, Vector::new_dense(entry.dense.clone()))
            .add_vector(SPARSE_VECTOR, Vector::new_sparse(indices, values));
        points.push(PointStruct::new(point_id(&entry.chunk.id), vectors, payload));
    }
    Ok(points)
}

fn native_filter(filter: &SearchFilter) -> Option<Filter> {
    let mut must = Vec::new();
    if let Some(lang) = &filter.language {
        must.push(Condition::matches("language", lang.clone()));
    }
    if let Some(kind) = filter.kind {
        must.push(Condition::matches("kind", kind.id().to_string()));
    }
    if let Some(project) = &filter.project {
        must.push(Condition::matches("project", project.clone()));
    }
    if must.is_empty() {
        None
    } else {
        Some(Filter::must(must))
    }
}

fn encode_payload(
    entry: &IndexedEntry,
) -> Result<std::collections::HashMap<String, qdrant_client::qdrant::Value>, StoreError> {
    let chunk = &entry.chunk;
    serde_json::from_value(serde_json::json!({
        "id": chunk.id,
        "file": chunk.file,
        "language": chunk.language,
        "kind": chunk.kind.id(),
        "name": chunk.name,
        "signature": chunk.signature,
        "start_line": chunk.start_line,
        "end_line": chunk.end_line,
        "start_byte": chunk.start_byte,
        "end_byte": chunk.end_byte,
        "content": chunk.content,
        "dependencies": chunk.dependencies,
        "docstring": chunk.docstring,
        "parent": chunk.parent,
        "part": chunk.part,
        "project": entry.project,
    }))
    .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn scored_entry_from_point(point: &ScoredPoint) -> Option<ScoredEntry> {
    chunk_from_payload(&point.payload).map(|chunk| ScoredEntry {
        chunk,
        score: point.score,
    })
}

fn chunk_from_payload(
    payload: &std::collections::HashMap<String, qdrant_client::qdrant::Value>,
) -> Option<ChunkRecord> {
    let get_str = |key: &str| {
        payload
            .get(key)
            .and_then(qdrant_client::qdrant::Value::as_str)
            .cloned()
    };
    let get_usize = |key: &str| {
        payload
            .get(key)
            .and_then(qdrant_client::qdrant::Value::as_integer)
            .and_then(|v| usize::try_from(v).ok())
    };
    let dependencies: BTreeSet<String> = match payload
        .get("dependencies")
        .and_then(|v| v.kind.as_ref())
    {
        Some(Kind::ListValue(list)) => list
            .values
            .iter()
            .filter_map(|v| match &v.kind {
                Some(Kind::StringValue(s)) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => BTreeSet::new(),
    };

    Some(ChunkRecord {
        id: get_str("id")?,
        file: get_str("file")?,
        language: get_str("language")?,
        kind: ChunkKind::from_id(&get_str("kind")?)?,
        name: get_str("name")?,
        signature: get_str("signature"),
        start_line: get_usize("start_line")?,
        end_line: get_usize("end_line")?,
        start_byte: get_usize("start_byte").unwrap_or(0),
        end_byte: get_usize("end_byte").unwrap_or(0),
        content: get_str("content")?,
        dependencies,
        docstring: get_str("docstring"),
        parent: get_str("parent"),
        part: get_usize("part").and_then(|p| u32::try_from(p).ok()),
    })
}
