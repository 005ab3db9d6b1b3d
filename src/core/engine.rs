use crate::core::{Pipeline, StageReport};
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

pub struct ProbeEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> ProbeEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub async fn run(&self) -> Result<String> {
        let name = self.pipeline.name().to_string();
        tracing::info!("🚀 Starting {} job", name);

        tracing::info!("Extracting inputs...");
        let extracted = self.pipeline.extract().await?;
        tracing::info!("Extracted {}", extracted.describe());
        self.monitor.log_stage("Extract");

        tracing::info!("Transforming...");
        let transformed = self.pipeline.transform(extracted).await?;
        tracing::info!("Produced {}", transformed.describe());
        self.monitor.log_stage("Transform");

        tracing::info!("Writing outputs...");
        let output_path = self.pipeline.load(transformed).await?;
        self.monitor.log_stage("Load");
        self.monitor.log_final_stats();

        tracing::info!("✅ {} job finished, output at {}", name, output_path);
        Ok(output_path)
    }
}
