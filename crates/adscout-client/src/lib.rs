pub mod ads_archive;
pub mod runner;
pub mod transport;

pub use ads_archive::{AdsArchiveClient, AdsArchiveConfig};
pub use runner::{ArchivePipeline, archive_pipeline};
pub use transport::ReqwestTransport;
