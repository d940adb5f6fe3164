use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::error::Result;
use crate::join::{join_sources, SourceTables};
use crate::models::{ClassifiedBatch, NotificationBatch, RawRecord, RiskTier};
use crate::notify::{DispatchOutcome, Dispatcher};
use crate::parser::{read_source, SourceInput};
use crate::risk::{classify_all, RiskRules};

pub const ATTENDANCE_FILE: &str = "attendance.csv";
pub const TESTS_FILE: &str = "tests.csv";
pub const FEES_FILE: &str = "fees.csv";

#[derive(Debug, Clone)]
pub struct SourceSet {
    pub attendance: SourceInput,
    pub tests: SourceInput,
    pub fees: SourceInput,
}

impl SourceSet {
    pub fn new(attendance: SourceInput, tests: SourceInput, fees: SourceInput) -> Self {
        Self {
            attendance,
            tests,
            fees,
        }
    }

    /// The fixed file names inside a data directory.
    pub fn well_known(dir: &Path) -> Self {
        Self::new(
            SourceInput::file(dir.join(ATTENDANCE_FILE)),
            SourceInput::file(dir.join(TESTS_FILE)),
            SourceInput::file(dir.join(FEES_FILE)),
        )
    }
}

/// A classified batch plus the background notification started for it.
pub struct BatchRun {
    pub batch: ClassifiedBatch,
    pub notification: JoinHandle<()>,
}

/// Result of an explicitly requested notification.
#[derive(Debug)]
pub struct ManualTrigger {
    pub batch: ClassifiedBatch,
    pub outcome: DispatchOutcome,
}

#[derive(Clone)]
pub struct Pipeline {
    rules: RiskRules,
    dispatcher: Arc<Dispatcher>,
}

impl Pipeline {
    pub fn new(rules: RiskRules, dispatcher: Arc<Dispatcher>) -> Self {
        Self { rules, dispatcher }
    }

    /// Load, join and classify. No notification is sent.
    pub async fn classify_sources(&self, sources: &SourceSet) -> Result<ClassifiedBatch> {
        let tables = load_sources(sources).await?;
        let unified = join_sources(tables);
        let batch = ClassifiedBatch::new(classify_all(&self.rules, unified));

        info!(
            batch = %batch.batch_id,
            students = batch.len(),
            high = batch.count_tier(RiskTier::High),
            medium = batch.count_tier(RiskTier::Medium),
            "batch classified"
        );
        Ok(batch)
    }

    /// Classify and fire the high-risk notification in the background.
    ///
    /// The batch is returned whether or not the notification succeeds.
    pub async fn run(&self, sources: &SourceSet) -> Result<BatchRun> {
        let batch = self.classify_sources(sources).await?;
        let notification = self
            .dispatcher
            .dispatch_detached(NotificationBatch::from_batch(&batch));
        Ok(BatchRun {
            batch,
            notification,
        })
    }

    /// Classify and send the notification in the foreground, surfacing
    /// delivery failure to the caller.
    pub async fn trigger_notification(&self, sources: &SourceSet) -> Result<ManualTrigger> {
        let batch = self.classify_sources(sources).await?;
        let outcome = self
            .dispatcher
            .dispatch(NotificationBatch::from_batch(&batch))
            .await?;
        Ok(ManualTrigger { batch, outcome })
    }
}

/// Read all three sources concurrently and return only once every one of
/// them has finished. The first failure aborts the load.
pub async fn load_sources(sources: &SourceSet) -> Result<SourceTables> {
    let (attendance, tests, fees) = tokio::try_join!(
        load("attendance", sources.attendance.clone()),
        load("tests", sources.tests.clone()),
        load("fees", sources.fees.clone()),
    )?;

    Ok(SourceTables {
        attendance,
        tests,
        fees,
    })
}

async fn load(name: &'static str, input: SourceInput) -> Result<Vec<RawRecord>> {
    tokio::task::spawn_blocking(move || read_source(name, &input)).await?
}
