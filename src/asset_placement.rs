use crate::config::{S3Config, StorageConfig};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Which side of the local/remote split a strategy sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementKind {
    Local,
    Remote,
}

/// Durable placement of uploaded binaries and generated images.
///
/// One implementation is selected from configuration at startup and injected
/// everywhere a file needs a home; handlers never inspect the deployment mode
/// themselves.
#[async_trait]
pub trait AssetPlacement: Send + Sync {
    fn kind(&self) -> PlacementKind;

    /// Copy a spooled upload into durable storage and return its retrieval URL.
    ///
    /// The spool file is removed afterward whether or not placement succeeded.
    async fn place_model(&self, spooled: &Path, original_name: &str) -> Result<String>;

    /// Persist generated QR image bytes and return their retrieval URL
    async fn place_qr_image(&self, file_name: &str, bytes: &[u8]) -> Result<String>;
}

/// Destination name combining a millisecond timestamp with the sanitized
/// original filename, e.g. `1710000000000-cube.glb`
pub fn destination_name(original_name: &str) -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), sanitize_file_name(original_name))
}

/// Sanitize a filename for use as a path/key component.
///
/// Keeps alphanumerics, `-`, `_` and `.` (extensions must survive); everything
/// else becomes `_`, and `..` sequences are collapsed to block traversal.
pub fn sanitize_file_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    while sanitized.contains("..") {
        sanitized = sanitized.replace("..", "_.");
    }

    sanitized
}

/// Content type for a stored asset, by file extension
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or_default().to_lowercase();
    match ext.as_str() {
        "glb" => "model/gltf-binary",
        "gltf" => "model/gltf+json",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}

/// Remove a spool file, logging rather than failing when it is already gone
async fn discard_spool(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(error = %e, path = %path.display(), "Failed to remove spool file");
    }
}

/// Placement into web-servable directories on local disk
pub struct LocalPlacement {
    uploads_dir: PathBuf,
    qr_codes_dir: PathBuf,
}

impl LocalPlacement {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            uploads_dir: PathBuf::from(&config.uploads_dir),
            qr_codes_dir: PathBuf::from(&config.qr_codes_dir),
        }
    }
}

#[async_trait]
impl AssetPlacement for LocalPlacement {
    fn kind(&self) -> PlacementKind {
        PlacementKind::Local
    }

    #[instrument(skip(self), fields(original_name = %original_name))]
    async fn place_model(&self, spooled: &Path, original_name: &str) -> Result<String> {
        let dest_name = destination_name(original_name);
        let dest = self.uploads_dir.join(&dest_name);

        let copied = async {
            tokio::fs::create_dir_all(&self.uploads_dir)
                .await
                .context("Failed to create uploads directory")?;
            tokio::fs::copy(spooled, &dest)
                .await
                .context("Failed to copy upload into uploads directory")
        }
        .await;

        discard_spool(spooled).await;
        copied?;

        debug!(dest = %dest.display(), "Model placed on local disk");
        Ok(format!("/uploads/{dest_name}"))
    }

    async fn place_qr_image(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.qr_codes_dir)
            .await
            .context("Failed to create qr-codes directory")?;
        let dest = self.qr_codes_dir.join(file_name);
        tokio::fs::write(&dest, bytes)
            .await
            .context("Failed to write QR image")?;

        Ok(format!("/qr-codes/{file_name}"))
    }
}

/// Placement into an S3-compatible bucket
pub struct S3Placement {
    client: S3Client,
    bucket: String,
    region: String,
    public_url: Option<String>,
}

impl S3Placement {
    pub async fn new(config: &S3Config) -> Result<Self> {
        if config.bucket.is_empty() {
            bail!("s3.bucket must be configured when placement = \"s3\"");
        }

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 placement initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            public_url: config.public_url.clone(),
        })
    }

    /// Public retrieval URL for an object key
    fn object_url(&self, key: &str) -> String {
        match &self.public_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, self.region, key),
        }
    }

    async fn put(&self, key: &str, body: ByteStream, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .metadata("uploaded-at", Utc::now().to_rfc3339())
            .send()
            .await
            .context("Failed to upload object to S3")?;

        Ok(())
    }
}

#[async_trait]
impl AssetPlacement for S3Placement {
    fn kind(&self) -> PlacementKind {
        PlacementKind::Remote
    }

    #[instrument(skip(self), fields(original_name = %original_name))]
    async fn place_model(&self, spooled: &Path, original_name: &str) -> Result<String> {
        let dest_name = destination_name(original_name);
        let key = format!("uploads/{dest_name}");

        let uploaded = async {
            let body = ByteStream::from_path(spooled)
                .await
                .context("Failed to read spooled upload")?;
            self.put(&key, body, content_type_for(&dest_name)).await
        }
        .await;

        discard_spool(spooled).await;
        uploaded?;

        debug!(key = %key, "Model uploaded to S3");
        Ok(self.object_url(&key))
    }

    async fn place_qr_image(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        let key = format!("qr-codes/{file_name}");
        self.put(&key, ByteStream::from(bytes.to_vec()), "image/png").await?;

        Ok(self.object_url(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("cube.glb"), "model/gltf-binary");
        assert_eq!(content_type_for("scene.GLTF"), "model/gltf+json");
        assert_eq!(content_type_for("qr-model_1.png"), "image/png");
        assert_eq!(content_type_for("notes.txt"), "application/octet-stream");
        assert_eq!(content_type_for("no-extension"), "application/octet-stream");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("cube.glb"), "cube.glb");
        assert_eq!(sanitize_file_name("my cube (v2).glb"), "my_cube__v2_.glb");
        assert!(!sanitize_file_name("../../etc/passwd").contains(".."));
        assert!(!sanitize_file_name("a..b..c").contains(".."));
    }

    #[test]
    fn test_destination_name_format() {
        let name = destination_name("cube model.glb");
        let (millis, rest) = name.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(rest, "cube_model.glb");
        assert!(name.ends_with(".glb"));
    }

    fn local_config(dir: &tempfile::TempDir) -> StorageConfig {
        StorageConfig {
            uploads_dir: dir.path().join("uploads").to_string_lossy().into_owned(),
            qr_codes_dir: dir.path().join("qr-codes").to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_local_place_model_copies_and_removes_spool() {
        let dir = tempdir().unwrap();
        let placement = LocalPlacement::new(&local_config(&dir));

        let spool = dir.path().join("spooled.upload");
        tokio::fs::write(&spool, b"glTF-binary-bytes").await.unwrap();

        let url = placement.place_model(&spool, "cube.glb").await.unwrap();
        assert!(url.starts_with("/uploads/"));
        assert!(url.ends_with("-cube.glb"));

        let dest = dir.path().join("uploads").join(url.trim_start_matches("/uploads/"));
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"glTF-binary-bytes");
        assert!(!spool.exists());
    }

    #[tokio::test]
    async fn test_local_place_qr_image_writes_png() {
        let dir = tempdir().unwrap();
        let placement = LocalPlacement::new(&local_config(&dir));

        let url = placement
            .place_qr_image("qr-model_1.png", b"png-bytes")
            .await
            .unwrap();

        assert_eq!(url, "/qr-codes/qr-model_1.png");
        let dest = dir.path().join("qr-codes").join("qr-model_1.png");
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn test_local_placement_kind() {
        let dir = tempdir().unwrap();
        let placement = LocalPlacement::new(&local_config(&dir));
        assert_eq!(placement.kind(), PlacementKind::Local);
    }
}
