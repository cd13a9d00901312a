//! magazine_enhancer - AI photo enhancement service
//!
//! Face restoration and 2× super-resolution through external model scripts,
//! followed by a deterministic "magazine look" color grade. Originals and
//! results are archived in object storage.

pub mod api;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod face;
pub mod filters;
pub mod grade;
pub mod metrics;
pub mod process;
pub mod storage;
pub mod upscale;
pub mod validation;
pub mod weights;

pub use api::{router, AppState, EnhanceResult, HealthStatus, ServiceSettings};
pub use config::Config;
pub use coordinator::{Enhanced, Enhancer, ModelHandles};
pub use device::Device;
pub use error::{EnhanceError, ModelError, Result, StorageError};
pub use face::FaceRestorer;
pub use grade::{apply_look, apply_look_rgb};
pub use metrics::Metrics;
pub use storage::{BlobStore, StorageGateway};
pub use upscale::{LanczosUpscaler, TileConfig, Upscaler};
