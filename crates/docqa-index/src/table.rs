//! LanceDB storage for index records.
//!
//! One table, `chunks`, written in a single batch per save and read back in
//! full on load. Rows carry their insertion ordinal so the original order can
//! be restored whatever order the scan returns them in.
use anyhow::{anyhow, bail, Context, Result};
use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, RecordBatch, RecordBatchIterator, StringArray, UInt64Array};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use std::path::Path;
use std::sync::Arc;

use docqa_core::{Chunk, Meta};

use crate::schema::{build_chunks_schema, CHUNKS_TABLE};

/// A chunk with its embedding, in insertion order.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

pub async fn open_db(dir: &Path) -> Result<Connection> {
    Ok(connect(dir.to_string_lossy().as_ref()).execute().await?)
}

pub async fn write_records(conn: &Connection, records: &[IndexRecord], dim: usize) -> Result<()> {
    let schema = build_chunks_schema(dim as i32);
    let mut ordinals = Vec::with_capacity(records.len());
    let mut contents = Vec::with_capacity(records.len());
    let mut metadata = Vec::with_capacity(records.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(records.len());
    for (i, r) in records.iter().enumerate() {
        if r.vector.len() != dim {
            bail!("record {i} has {} dims, expected {dim}", r.vector.len());
        }
        ordinals.push(i as u64);
        contents.push(r.chunk.text.clone());
        metadata.push(serde_json::to_string(&r.chunk.metadata)?);
        vectors.push(Some(r.vector.iter().map(|&x| Some(x)).collect()));
    }
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(UInt64Array::from(ordinals)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(metadata)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors.into_iter(), dim as i32)),
        ],
    )?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    conn.create_table(CHUNKS_TABLE, reader).execute().await?;
    Ok(())
}

/// Read every record back, sorted by ordinal. Fails unless exactly
/// `expected` rows of `dim` dimensions with ordinals `0..expected` are found.
pub async fn read_records(conn: &Connection, expected: usize, dim: usize) -> Result<Vec<IndexRecord>> {
    let names = conn.table_names().execute().await?;
    if !names.iter().any(|n| n == CHUNKS_TABLE) {
        bail!("table '{CHUNKS_TABLE}' is missing");
    }
    let table = conn.open_table(CHUNKS_TABLE).execute().await?;
    let mut stream = table.query().limit(expected.max(1)).execute().await?;

    let mut rows: Vec<(u64, IndexRecord)> = Vec::with_capacity(expected);
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await? {
        let ordinal_col = batch
            .column_by_name("ordinal")
            .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
            .ok_or_else(|| anyhow!("ordinal column missing"))?;
        let content_col = batch
            .column_by_name("content")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow!("content column missing"))?;
        let meta_col = batch
            .column_by_name("metadata")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow!("metadata column missing"))?;
        let vec_col = batch
            .column_by_name("vector")
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
            .ok_or_else(|| anyhow!("vector column missing"))?;
        for i in 0..batch.num_rows() {
            let metadata: Meta = serde_json::from_str(meta_col.value(i))
                .with_context(|| format!("row {i}: bad metadata JSON"))?;
            let list = vec_col.value(i);
            let vector = list.as_primitive::<Float32Type>().values().to_vec();
            if vector.len() != dim {
                bail!("row {i}: vector has {} dims, expected {dim}", vector.len());
            }
            let chunk = Chunk::new(content_col.value(i), metadata);
            rows.push((ordinal_col.value(i), IndexRecord { chunk, vector }));
        }
    }

    if rows.len() != expected {
        bail!("table holds {} rows, manifest says {expected}", rows.len());
    }
    rows.sort_by_key(|(ordinal, _)| *ordinal);
    for (position, (ordinal, _)) in rows.iter().enumerate() {
        if *ordinal != position as u64 {
            bail!("ordinal {ordinal} out of sequence at position {position}");
        }
    }
    Ok(rows.into_iter().map(|(_, r)| r).collect())
}
