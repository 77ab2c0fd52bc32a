mod routes;

pub mod app;
pub mod config;
pub mod imaging;
pub mod model_service;
pub mod morphology;
pub mod ort_service;
pub mod proxy_service;
pub mod segmentation;
pub mod server;
pub mod telemetry;
pub mod vessel_metrics;

pub use app::start_app;
pub use model_service::{ModelError, ModelService};
pub use segmentation::{SegmentationError, SegmentationService};
pub use server::HttpServer;
