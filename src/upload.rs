use crate::asset_placement::AssetPlacement;
use crate::model_store::{ModelPatch, ModelRecord, ModelStore, NewModel};
use crate::qr_generator::QrGenerator;
use anyhow::anyhow;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Errors surfaced by the upload sequence
#[derive(Debug, Error)]
pub enum UploadError {
    /// Client sent an incomplete form; no server-side failure occurred
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Placement, persistence or QR generation failed
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl UploadError {
    /// True for errors the client caused (4xx), false for server failures
    pub fn is_client_error(&self) -> bool {
        matches!(self, UploadError::MissingField(_))
    }
}

/// An upload field already written to the spool directory
#[derive(Debug)]
pub struct SpooledUpload {
    /// Temp file holding the uploaded bytes
    pub path: PathBuf,
    /// Filename as sent by the client
    pub original_name: String,
}

/// Raw multipart intake before validation
#[derive(Debug, Default)]
pub struct UploadIntake {
    pub name: Option<String>,
    pub description: Option<String>,
    pub file: Option<SpooledUpload>,
}

/// End-to-end intake sequence for one upload: place the binary, create the
/// record, generate the link code, attach it.
///
/// No step is retried; the first failure aborts the request. An asset that
/// was already placed is not deleted when a later step fails, so a record
/// without a QR URL (or an orphaned binary) is a possible partial outcome.
pub struct UploadOrchestrator {
    store: Arc<ModelStore>,
    placement: Arc<dyn AssetPlacement>,
    qr: QrGenerator,
}

impl UploadOrchestrator {
    pub fn new(store: Arc<ModelStore>, placement: Arc<dyn AssetPlacement>, qr: QrGenerator) -> Self {
        Self { store, placement, qr }
    }

    #[instrument(skip(self, intake))]
    pub async fn process(&self, intake: UploadIntake) -> Result<ModelRecord, UploadError> {
        let file = match intake.file {
            Some(file) => file,
            None => return Err(UploadError::MissingField("file")),
        };

        let name = intake
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let name = match name {
            Some(name) => name,
            None => {
                // The file already hit the spool; never leave it behind
                if let Err(e) = tokio::fs::remove_file(&file.path).await {
                    warn!(error = %e, path = %file.path.display(), "Failed to remove spool file");
                }
                return Err(UploadError::MissingField("name"));
            }
        };

        let description = intake.description.filter(|d| !d.is_empty());

        let result = self.run(name, description, file).await;
        if result.is_err() {
            metrics::counter!("registry.uploads.failed").increment(1);
        }
        result
    }

    async fn run(
        &self,
        name: String,
        description: Option<String>,
        file: SpooledUpload,
    ) -> Result<ModelRecord, UploadError> {
        // 1. Place the binary; the spool file is gone after this either way
        let file_url = self
            .placement
            .place_model(&file.path, &file.original_name)
            .await?;

        // 2. Create the record with the link code still absent
        let record = self
            .store
            .create(NewModel {
                name,
                description,
                file_url,
                qr_code_url: None,
            })
            .await;

        // 3. The record must exist before its viewer URL means anything
        let qr_code_url = self.qr.generate(&record.id).await?;

        // 4. Attach the link code
        let updated = self
            .store
            .update(
                &record.id,
                ModelPatch {
                    qr_code_url: Some(qr_code_url),
                    ..Default::default()
                },
            )
            .await
            .ok_or_else(|| anyhow!("record {} vanished during link-code attachment", record.id))?;

        info!(
            id = %updated.id,
            file_url = %updated.file_url,
            "Upload completed"
        );
        metrics::counter!("registry.uploads.completed").increment(1);

        // 5. Return the completed record
        Ok(updated)
    }
}
