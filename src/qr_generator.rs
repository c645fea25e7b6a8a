use crate::asset_placement::{AssetPlacement, PlacementKind};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Rendered QR image width in pixels; sized for reliable phone-camera scans
const QR_IMAGE_WIDTH: u32 = 512;

/// Generates scannable QR images that link a record to its AR viewer page
pub struct QrGenerator {
    base_url: String,
    placement: Arc<dyn AssetPlacement>,
}

impl QrGenerator {
    pub fn new(base_url: impl Into<String>, placement: Arc<dyn AssetPlacement>) -> Self {
        Self {
            base_url: base_url.into(),
            placement,
        }
    }

    /// Browser-facing AR viewer address for a record
    pub fn viewer_url(&self, id: &str) -> String {
        format!("{}/ar/{}", self.base_url.trim_end_matches('/'), id)
    }

    /// Produce and persist the QR image for a record, returning its
    /// retrieval URL.
    ///
    /// When remote placement fails the image is returned inline as a
    /// `data:image/png;base64` URL instead of failing the upload; local
    /// placement failures stay hard errors.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn generate(&self, id: &str) -> Result<String> {
        let viewer_url = self.viewer_url(id);
        let png = encode_png(&viewer_url)?;
        let file_name = format!("qr-{id}.png");

        debug!(viewer_url = %viewer_url, "Generating QR code");

        match self.placement.place_qr_image(&file_name, &png).await {
            Ok(url) => Ok(url),
            Err(e) if self.placement.kind() == PlacementKind::Remote => {
                warn!(error = %e, "Remote QR placement failed, falling back to inline image");
                metrics::counter!("registry.qr.inline_fallbacks").increment(1);
                Ok(format!("data:image/png;base64,{}", STANDARD.encode(&png)))
            }
            Err(e) => Err(e),
        }
    }
}

/// Encode a payload as a black-on-white PNG at error-correction level H,
/// tolerant of partial occlusion on printed labels
fn encode_png(payload: &str) -> Result<Vec<u8>> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::H)
        .map_err(|e| anyhow!("QR encoding failed: {e}"))?;

    let img = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_IMAGE_WIDTH, QR_IMAGE_WIDTH)
        .quiet_zone(true)
        .dark_color(Luma([0u8]))
        .light_color(Luma([255u8]))
        .build();

    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut png, ImageFormat::Png)
        .context("Failed to encode QR image as PNG")?;

    Ok(png.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::path::Path;

    struct FailingPlacement {
        kind: PlacementKind,
    }

    #[async_trait]
    impl AssetPlacement for FailingPlacement {
        fn kind(&self) -> PlacementKind {
            self.kind
        }

        async fn place_model(&self, _spooled: &Path, _original_name: &str) -> Result<String> {
            bail!("placement down")
        }

        async fn place_qr_image(&self, _file_name: &str, _bytes: &[u8]) -> Result<String> {
            bail!("placement down")
        }
    }

    fn generator(kind: PlacementKind) -> QrGenerator {
        QrGenerator::new("http://localhost:3000", Arc::new(FailingPlacement { kind }))
    }

    #[test]
    fn test_viewer_url_format() {
        let qr = generator(PlacementKind::Local);
        assert_eq!(qr.viewer_url("model_7"), "http://localhost:3000/ar/model_7");
    }

    #[test]
    fn test_viewer_url_trims_trailing_slash() {
        let qr = QrGenerator::new(
            "https://models.example.com/",
            Arc::new(FailingPlacement {
                kind: PlacementKind::Local,
            }),
        );
        assert_eq!(qr.viewer_url("model_1"), "https://models.example.com/ar/model_1");
    }

    #[test]
    fn test_encode_png_magic_bytes() {
        let png = encode_png("http://localhost:3000/ar/model_1").unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_inline_image() {
        let url = generator(PlacementKind::Remote).generate("model_1").await.unwrap();
        assert!(url.starts_with("data:image/png;base64,"));

        let decoded = STANDARD
            .decode(url.trim_start_matches("data:image/png;base64,"))
            .unwrap();
        assert_eq!(&decoded[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn test_local_failure_stays_hard_error() {
        assert!(generator(PlacementKind::Local).generate("model_1").await.is_err());
    }
}
