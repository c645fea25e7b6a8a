//! Model Registry Service
//!
//! Backend for a 3D model showcase: clients upload `.glb` assets over HTTP,
//! the service registers them in a flat JSON document, places the binary on
//! local disk or in an S3-compatible bucket, and generates a QR code whose
//! payload is the model's AR viewer URL. Read endpoints serve the registry
//! and the raw asset/image bytes; the AR and orbit viewer pages themselves
//! live in a separate front-end.
//!
//! ## Architecture
//!
//! ```text
//! POST /api/upload-model          Placement              Registry
//! ┌──────────────┐           ┌──────────────┐        ┌──────────────┐
//! │ Upload       │──────────▶│ local disk   │        │ data/        │
//! │ Orchestrator │           │   or S3      │        │ models.json  │
//! └──────────────┘           └──────────────┘        └──────────────┘
//!        │                                                  ▲
//!        ▼                                                  │
//! ┌──────────────┐                                          │
//! │ QR           │──────── qrCodeUrl ───────────────────────┘
//! │ Generator    │
//! └──────────────┘
//!
//! GET /api/models, /api/models/{id}, /uploads/*, /qr-codes/*
//! ```
//!
//! The registry is a single load-modify-save JSON document with no locking;
//! run one writer process against it.

pub mod api;
pub mod asset_placement;
pub mod config;
pub mod model_store;
pub mod qr_generator;
pub mod upload;

pub use api::{create_router, start_api_server, AppState};
pub use asset_placement::{
    content_type_for, AssetPlacement, LocalPlacement, PlacementKind, S3Placement,
};
pub use config::{Config, PlacementMode};
pub use model_store::{ModelPatch, ModelRecord, ModelStore, NewModel};
pub use qr_generator::QrGenerator;
pub use upload::{SpooledUpload, UploadError, UploadIntake, UploadOrchestrator};
