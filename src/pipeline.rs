//! Stage orchestration.
//!
//! The workflow is two named stages run in order:
//!
//! ```text
//! 1. Flatten   mta/<subdir>/*      →  PUBLIC_WEBP/
//! 2. Publish   PUBLIC_WEBP/        →  site/station/ + site/manifest.json
//! ```
//!
//! The publish stage always reads what the flatten stage wrote, so
//! `publish.source` is ignored by [`run`]. Per-file flatten failures are
//! carried into the [`PipelineReport`] and publishing still happens; a fatal
//! flatten error stops before anything is published. An aborted flatten still
//! hands its partial report to [`StageObserver::flatten_finished`].
//! Committing and pushing the hosting repository stay manual.

use crate::config::{ConfigError, StageConfig};
use crate::flatten::{self, FlattenError, FlattenOptions, FlattenReport};
use crate::fs::{FileSystem, LocalFs};
use crate::imaging::{ImageBackend, RustBackend};
use crate::publish::{self, PublishError, PublishEvent, PublishJob, PublishResult};
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::info;

/// A named pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Flatten,
    Publish,
}

impl Stage {
    /// 1-based position in the pipeline.
    pub fn number(self) -> usize {
        match self {
            Stage::Flatten => 1,
            Stage::Publish => 2,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Flatten => write!(f, "flatten"),
            Stage::Publish => write!(f, "publish"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("flatten stage failed: {0}")]
    Flatten(#[from] FlattenError),
    #[error("publish stage failed: {0}")]
    Publish(#[from] PublishError),
}

impl PipelineError {
    /// The stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Flatten(_) => Stage::Flatten,
            PipelineError::Publish(_) => Stage::Publish,
        }
    }
}

/// What a complete run did.
#[derive(Debug)]
pub struct PipelineReport {
    pub flatten: FlattenReport,
    pub publish: PublishResult,
}

impl PipelineReport {
    /// True when neither stage recorded a per-file failure.
    pub fn is_clean(&self) -> bool {
        self.flatten.is_clean() && self.publish.is_clean()
    }
}

/// Everything [`run`] needs, resolved from config up front.
///
/// Resolving before any work means a missing publish setting is reported
/// before a single file has been moved.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub flatten_source: PathBuf,
    pub flatten_dest: PathBuf,
    pub flatten_options: FlattenOptions,
    pub publish: PublishJob,
}

impl PipelinePlan {
    pub fn from_config(config: &StageConfig) -> Result<Self, ConfigError> {
        let flatten_source = config.flatten.require_source()?.to_path_buf();
        let flatten_dest = config.flatten.require_dest()?.to_path_buf();
        let publish =
            PublishJob::from_config_with_source(&config.publish, flatten_dest.clone())?;
        Ok(Self {
            flatten_source,
            flatten_dest,
            flatten_options: FlattenOptions {
                on_error: config.flatten.on_error,
            },
            publish,
        })
    }
}

/// Hooks called as each stage starts, so callers can print headers.
pub trait StageObserver {
    fn stage_started(&mut self, stage: Stage, plan: &PipelinePlan);

    /// Called when flattening ends, including with the partial report of an
    /// aborted run.
    fn flatten_finished(&mut self, _report: &FlattenReport) {}
}

impl StageObserver for () {
    fn stage_started(&mut self, _stage: Stage, _plan: &PipelinePlan) {}
}

/// Run flatten then publish.
pub fn run(
    plan: &PipelinePlan,
    observer: &mut impl StageObserver,
    events: Option<Sender<PublishEvent>>,
) -> Result<PipelineReport, PipelineError> {
    run_with_backend(&RustBackend::new(), plan, observer, events)
}

/// Run the pipeline using a specific backend (allows testing with mock).
pub fn run_with_backend(
    backend: &impl ImageBackend,
    plan: &PipelinePlan,
    observer: &mut impl StageObserver,
    events: Option<Sender<PublishEvent>>,
) -> Result<PipelineReport, PipelineError> {
    let flatten_report = flatten_stage(&LocalFs, plan, observer)?;

    observer.stage_started(Stage::Publish, plan);
    let job = &plan.publish;
    let publish_result =
        publish::publish_with_backend(backend, &job.source, &job.dest, &job.options, events)?;

    Ok(PipelineReport {
        flatten: flatten_report,
        publish: publish_result,
    })
}

fn flatten_stage(
    fs: &impl FileSystem,
    plan: &PipelinePlan,
    observer: &mut impl StageObserver,
) -> Result<FlattenReport, FlattenError> {
    observer.stage_started(Stage::Flatten, plan);
    match flatten::flatten_with_fs(
        fs,
        &plan.flatten_source,
        &plan.flatten_dest,
        &plan.flatten_options,
    ) {
        Ok(report) => {
            info!(
                moved = report.moved.len(),
                skipped = report.skipped.len(),
                failed = report.failures.len(),
                "flatten finished"
            );
            observer.flatten_finished(&report);
            Ok(report)
        }
        Err(e) => {
            if let FlattenError::Aborted { report, .. } = &e {
                observer.flatten_finished(report);
            }
            Err(e)
        }
    }
}
