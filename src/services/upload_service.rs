use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use crate::errors::{RowCoercionError, UploadError, UploadResult};
use crate::jobs::worker::{EnqueueAck, WorkerHandle};
use crate::pipeline::{extract_header_row, load, TabularFile, DEFAULT_CHUNK_SIZE};
use crate::services::map_data_service::MapDataService;
use crate::services::table_lifecycle::TableLifecycleManager;

/// Synchronous outcome of a successful upload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReport {
    pub map_data_id: String,
    pub table_name: String,
    /// Applied column manifest, reserved columns included
    pub manifest: Vec<String>,
    pub rows_loaded: usize,
    pub batches: usize,
    pub errors: Vec<RowCoercionError>,
    /// How the resolution job was taken up, if a worker is attached
    pub resolution: Option<EnqueueAck>,
}

/// Upload entry point: header extraction, schema synthesis, row loading,
/// then hand-off to the resolution worker.
#[derive(Clone)]
pub struct UploadService {
    db: DatabaseConnection,
    chunk_size: usize,
    resolver: Option<WorkerHandle>,
}

impl UploadService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            chunk_size: DEFAULT_CHUNK_SIZE,
            resolver: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Enqueue boundary resolution on `resolver` after each successful upload
    pub fn with_resolver(mut self, resolver: WorkerHandle) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub async fn upload_path(
        &self,
        map_data_id: &str,
        path: impl AsRef<Path>,
    ) -> UploadResult<UploadReport> {
        let file = TabularFile::from_path(path.as_ref()).map_err(UploadError::header_extraction)?;
        self.upload(map_data_id, &file).await
    }

    pub async fn upload(&self, map_data_id: &str, file: &TabularFile) -> UploadResult<UploadReport> {
        let record = MapDataService::new(self.db.clone())
            .get(map_data_id)
            .await
            .map_err(UploadError::record_lookup)?;

        info!(
            "Uploading {} ({}) into map data {}",
            file.filename(),
            file.format().as_ref(),
            record.id
        );

        let header = extract_header_row(file).map_err(UploadError::header_extraction)?;

        let ensured = TableLifecycleManager::new(self.db.clone())
            .ensure_table_for(&record, &header.with_reserved_columns())
            .await
            .map_err(UploadError::schema_synthesis)?;

        let loaded = load(
            &self.db,
            &ensured.table_name,
            &ensured.manifest,
            &record.id,
            file,
            self.chunk_size,
        )
        .await?;

        let manifest = ensured.manifest.names();
        let resolution = match &self.resolver {
            Some(resolver) => match resolver.enqueue(&ensured.table_name, manifest.clone()).await {
                Ok(ack) => Some(ack),
                Err(err) => {
                    warn!(
                        "Could not enqueue boundary resolution for {}: {}",
                        ensured.table_name, err
                    );
                    None
                }
            },
            None => None,
        };

        info!(
            "Upload into {} finished: {} rows loaded, {} rows rejected",
            ensured.table_name,
            loaded.rows_loaded,
            loaded.errors.len()
        );

        Ok(UploadReport {
            map_data_id: record.id,
            table_name: ensured.table_name,
            manifest,
            rows_loaded: loaded.rows_loaded,
            batches: loaded.batches,
            errors: loaded.errors,
            resolution,
        })
    }
}
