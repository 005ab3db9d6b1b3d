use crate::domain::model::StageReport;
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn output_path(&self) -> &str;

    /// Name of a zip archive bundling every output file, when requested.
    fn archive_name(&self) -> Option<&str> {
        None
    }
}

/// One probing job expressed as extract → transform → load.
#[async_trait]
pub trait Pipeline: Send + Sync {
    type Extracted: StageReport + Send;
    type Transformed: StageReport + Send;

    fn name(&self) -> &str;
    async fn extract(&self) -> Result<Self::Extracted>;
    async fn transform(&self, data: Self::Extracted) -> Result<Self::Transformed>;
    /// Writes the outputs and returns the path of the main output file.
    async fn load(&self, result: Self::Transformed) -> Result<String>;
}
