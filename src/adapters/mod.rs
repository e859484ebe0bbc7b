// Adapters layer: concrete implementations for external systems
// (file system, HCC reference CSV, Google Cloud auth, Vertex AI).

pub mod file_loader;
pub mod gcp_auth;
pub mod hcc_lookup;
pub mod storage;
pub mod vertex;
