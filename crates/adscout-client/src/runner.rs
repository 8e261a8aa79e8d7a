use adscout_core::credentials::CredentialSpec;
use adscout_core::error::AppError;
use adscout_core::pipeline::{PipelineConfig, PipelineExecutor};
use adscout_core::traits::{
    NullContentClassifier, NullPageClassifier, NullWebsiteAnalyzer, ResultStore,
};

use crate::ads_archive::{AdsArchiveClient, AdsArchiveConfig};
use crate::transport::ReqwestTransport;

/// Pipeline wired to the live ads archive. Website probing, enrichment and
/// classification are left to the null implementations.
pub type ArchivePipeline<R> = PipelineExecutor<
    AdsArchiveClient<ReqwestTransport>,
    R,
    NullPageClassifier,
    NullWebsiteAnalyzer,
    NullContentClassifier,
>;

pub fn archive_pipeline<R: ResultStore>(
    credentials: Vec<CredentialSpec>,
    archive: AdsArchiveConfig,
    results: R,
    config: PipelineConfig,
) -> Result<ArchivePipeline<R>, AppError> {
    let config = PipelineConfig {
        page_size: archive.page_size,
        ..config
    };
    let ads = AdsArchiveClient::with_credentials(credentials, archive)?;
    Ok(PipelineExecutor::new(
        ads,
        results,
        NullPageClassifier,
        NullWebsiteAnalyzer,
        NullContentClassifier,
        config,
    ))
}
