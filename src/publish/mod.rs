//! Artifact aggregation, checksums and release publication.

mod aggregator;
mod checksums;
mod github;

pub use aggregator::{AggregationReport, ArtifactAggregator};
pub use checksums::{ChecksumEntry, ChecksumManifest};
pub use github::{
    GitHubPublisher, ReleaseAsset, ReleasePublisher, ReleaseRecord, UploadOutcome, UploadStatus,
};
