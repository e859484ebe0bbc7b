use crate::utils::error::Result;
use async_trait::async_trait;

/// Where per-note result documents are written.
pub trait Storage: Send + Sync {
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Human-readable location of `path` inside this storage.
    fn location(&self, path: &str) -> String;
}

/// Turns an assessment/plan section into a list of condition names.
#[async_trait]
pub trait ConditionExtractor: Send + Sync {
    async fn extract_conditions(&self, section: &str) -> Result<Vec<String>>;
}
