//! Post-join artifact aggregation.

use super::{ChecksumManifest, ReleaseAsset, ReleasePublisher, ReleaseRecord, UploadOutcome};
use crate::build::Artifact;
use crate::error::{PublishError, Result};
use crate::pipeline::{JobOutcome, JobStatus};
use crate::trigger::TriggerFlags;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What aggregation produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationReport {
    /// Succeeded artifacts, now owned by the dist directory
    pub artifacts: Vec<Artifact>,
    /// Checksum manifest path, if any artifact was collected
    pub manifest: Option<PathBuf>,
    /// Per-asset upload results (release mode only)
    pub uploads: Vec<UploadOutcome>,
    /// Whether assets were sent to a release record
    pub published: bool,
}

impl AggregationReport {
    /// Whether every attempted upload succeeded
    pub fn uploads_ok(&self) -> bool {
        self.uploads.iter().all(UploadOutcome::is_ok)
    }
}

/// Collects succeeded artifacts, writes checksums, publishes in release mode.
///
/// Runs once, after every job has reached a terminal state.
pub struct ArtifactAggregator {
    dist_dir: PathBuf,
    checksum_file_name: String,
    publisher: Option<Arc<dyn ReleasePublisher>>,
}

impl ArtifactAggregator {
    /// Aggregator writing into `dist_dir`
    pub fn new(
        dist_dir: impl Into<PathBuf>,
        checksum_file_name: impl Into<String>,
        publisher: Option<Arc<dyn ReleasePublisher>>,
    ) -> Self {
        Self {
            dist_dir: dist_dir.into(),
            checksum_file_name: checksum_file_name.into(),
            publisher,
        }
    }

    /// Aggregate the outcomes of a run.
    ///
    /// Failed and skipped jobs are ignored. Partial success still publishes the
    /// succeeded subset. A cancelled run publishes nothing.
    pub async fn aggregate(
        &self,
        outcomes: &[JobOutcome],
        flags: &TriggerFlags,
        release: Option<&ReleaseRecord>,
        cancel: &CancellationToken,
    ) -> Result<AggregationReport> {
        if cancel.is_cancelled() {
            log::warn!("Run cancelled; skipping aggregation and publication");
            return Ok(AggregationReport::default());
        }

        let succeeded: Vec<&Artifact> = outcomes
            .iter()
            .filter(|o| o.status == JobStatus::Succeeded)
            .filter_map(|o| o.artifact.as_ref())
            .collect();

        if succeeded.is_empty() {
            log::info!("No succeeded artifacts to aggregate");
            return Ok(AggregationReport::default());
        }

        tokio::fs::create_dir_all(&self.dist_dir).await?;

        let mut taken = HashSet::from([self.checksum_file_name.clone()]);
        let mut artifacts = Vec::with_capacity(succeeded.len());
        for artifact in succeeded {
            let name = unique_name(&mut taken, artifact);
            let destination = self.dist_dir.join(&name);
            move_file(&artifact.path, &destination).await?;

            let mut collected = artifact.clone();
            collected.path = destination;
            artifacts.push(collected);
        }

        let files: Vec<PathBuf> = artifacts.iter().map(|a| a.path.clone()).collect();
        let manifest = ChecksumManifest::compute(&files).await?;
        let manifest_path = self.dist_dir.join(&self.checksum_file_name);
        manifest.write(&manifest_path).await?;

        let mut report = AggregationReport {
            artifacts,
            manifest: Some(manifest_path.clone()),
            uploads: Vec::new(),
            published: false,
        };

        if !flags.release {
            log::info!("Not a release run; assets kept in {}", self.dist_dir.display());
            return Ok(report);
        }

        let (Some(publisher), Some(release)) = (&self.publisher, release) else {
            return Err(PublishError::Api {
                reason: "release run without a configured release target".to_string(),
            }
            .into());
        };

        let mut assets: Vec<ReleaseAsset> = report
            .artifacts
            .iter()
            .map(|a| ReleaseAsset {
                path: a.path.clone(),
                name: a.file_name(),
            })
            .collect();
        assets.push(ReleaseAsset {
            path: manifest_path,
            name: self.checksum_file_name.clone(),
        });

        log::info!("Publishing {} asset(s) to release {}", assets.len(), release.tag);
        report.uploads = publisher.upload(release, &assets, cancel).await?;
        report.published = true;
        Ok(report)
    }
}

/// Dist name for `artifact`: its own file name when free, otherwise
/// prefixed with the job and, if that is taken too, a counter.
fn unique_name(taken: &mut HashSet<String>, artifact: &Artifact) -> String {
    let base = artifact.file_name();
    let job = artifact.job_id.dir_name();
    let mut candidate = base.clone();
    let mut attempt = 1u32;
    while !taken.insert(candidate.clone()) {
        candidate = match attempt {
            1 => format!("{}-{}", job, base),
            n => format!("{}-{}-{}", job, n, base),
        };
        attempt += 1;
    }
    candidate
}

async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if from == to {
        return Ok(());
    }
    if tokio::fs::rename(from, to).await.is_err() {
        // Cross-device: copy then remove.
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildError, PipelineError};
    use crate::matrix::{BranchSelection, BuildJob, BuildMatrix, Platform, TargetDescriptor};
    use crate::pipeline::JobStage;
    use crate::trigger::{EventKind, TriggerEvent, classify};
    use std::time::Duration;

    fn jobs(kind: EventKind) -> Vec<BuildJob> {
        BuildMatrix {
            targets: vec![
                TargetDescriptor::new(Platform::Linux),
                TargetDescriptor::new(Platform::Windows),
            ],
            branches: BranchSelection::current(),
        }
        .jobs(classify(&TriggerEvent::new(kind)))
    }

    fn succeeded(job: &BuildJob, dir: &Path, name: &str) -> JobOutcome {
        let path = dir.join(job.id.dir_name()).join(name);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, job.id.as_str()).expect("write");
        let artifact = Artifact {
            job_id: job.id.clone(),
            path,
            version: "6.0.0".to_string(),
            platform: job.target.platform,
            signature: None,
        };
        JobOutcome::succeeded(job.clone(), artifact, Duration::from_secs(1))
    }

    fn failed(job: &BuildJob) -> JobOutcome {
        let error = PipelineError::from(BuildError::Installer {
            target: job.target.platform_id().to_string(),
            reason: "exit code Some(2)".to_string(),
        });
        JobOutcome::ended(job.clone(), JobStatus::Failed, JobStage::Build, &error, Duration::ZERO)
    }

    #[tokio::test]
    async fn only_succeeded_artifacts_are_collected() {
        let work = tempfile::tempdir().expect("tempdir");
        let dist = work.path().join("dist");
        let jobs = jobs(EventKind::PullRequest);
        let outcomes = vec![succeeded(&jobs[0], work.path(), "Spyder-Linux.sh"), failed(&jobs[1])];

        let report = ArtifactAggregator::new(&dist, "Spyder-checksums.txt", None)
            .aggregate(&outcomes, &jobs[0].flags, None, &CancellationToken::new())
            .await
            .expect("aggregate");

        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.artifacts[0].path, dist.join("Spyder-Linux.sh"));
        assert!(!report.published);
        let manifest = std::fs::read_to_string(dist.join("Spyder-checksums.txt")).expect("manifest");
        assert_eq!(manifest.lines().count(), 1);
        assert!(manifest.trim_end().ends_with("  Spyder-Linux.sh"));
    }

    #[tokio::test]
    async fn colliding_names_are_prefixed_with_the_job() {
        let work = tempfile::tempdir().expect("tempdir");
        let dist = work.path().join("dist");
        let jobs = jobs(EventKind::PullRequest);
        let outcomes = vec![
            succeeded(&jobs[0], work.path(), "Spyder.bin"),
            succeeded(&jobs[1], work.path(), "Spyder.bin"),
        ];

        let report = ArtifactAggregator::new(&dist, "sums.txt", None)
            .aggregate(&outcomes, &jobs[0].flags, None, &CancellationToken::new())
            .await
            .expect("aggregate");

        let names: Vec<String> = report.artifacts.iter().map(Artifact::file_name).collect();
        assert_eq!(names[0], "Spyder.bin");
        assert_eq!(names[1], format!("{}-Spyder.bin", jobs[1].id.dir_name()));
    }

    #[tokio::test]
    async fn repeated_collisions_never_overwrite_an_artifact() {
        let work = tempfile::tempdir().expect("tempdir");
        let dist = work.path().join("dist");
        let jobs = BuildMatrix {
            targets: vec![
                TargetDescriptor::new(Platform::MacosArm64),
                TargetDescriptor::new(Platform::Linux),
                TargetDescriptor::new(Platform::Windows),
            ],
            branches: BranchSelection::current(),
        }
        .jobs(classify(&TriggerEvent::new(EventKind::PullRequest)));
        let windows_prefixed = format!("{}-Spyder.bin", jobs[2].id.dir_name());
        let outcomes = vec![
            succeeded(&jobs[1], work.path(), "Spyder.bin"),
            succeeded(&jobs[0], work.path(), &windows_prefixed),
            succeeded(&jobs[2], work.path(), "Spyder.bin"),
            succeeded(&jobs[1], &work.path().join("again"), "sums.txt"),
        ];

        let report = ArtifactAggregator::new(&dist, "sums.txt", None)
            .aggregate(&outcomes, &jobs[0].flags, None, &CancellationToken::new())
            .await
            .expect("aggregate");

        let names: Vec<String> = report.artifacts.iter().map(Artifact::file_name).collect();
        assert_eq!(names[0], "Spyder.bin");
        assert_eq!(names[1], windows_prefixed);
        assert_eq!(names[2], format!("{}-2-Spyder.bin", jobs[2].id.dir_name()));
        assert_eq!(names[3], format!("{}-sums.txt", jobs[1].id.dir_name()));

        for artifact in &report.artifacts {
            let content = std::fs::read_to_string(&artifact.path).expect("collected file");
            assert_eq!(content, artifact.job_id.as_str());
        }
        let manifest = std::fs::read_to_string(dist.join("sums.txt")).expect("manifest");
        assert_eq!(manifest.lines().count(), 4);
    }

    #[tokio::test]
    async fn release_without_publisher_is_an_error() {
        let work = tempfile::tempdir().expect("tempdir");
        let jobs = jobs(EventKind::ReleaseCreated);
        let outcomes = vec![succeeded(&jobs[0], work.path(), "Spyder-Linux.sh")];
        let release = ReleaseRecord {
            tag: "v6.0.0".to_string(),
        };

        let err = ArtifactAggregator::new(work.path().join("dist"), "sums.txt", None)
            .aggregate(&outcomes, &jobs[0].flags, Some(&release), &CancellationToken::new())
            .await
            .expect_err("no publisher");
        assert!(matches!(err, PipelineError::Publish(PublishError::Api { .. })));
    }

    #[tokio::test]
    async fn cancelled_run_collects_nothing() {
        let work = tempfile::tempdir().expect("tempdir");
        let dist = work.path().join("dist");
        let jobs = jobs(EventKind::PullRequest);
        let outcomes = vec![succeeded(&jobs[0], work.path(), "Spyder-Linux.sh")];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = ArtifactAggregator::new(&dist, "sums.txt", None)
            .aggregate(&outcomes, &jobs[0].flags, None, &cancel)
            .await
            .expect("aggregate");
        assert_eq!(report, AggregationReport::default());
        assert!(!dist.exists());
    }
}
