use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const STUDENT_ID: &str = "student_id";
pub const NAME: &str = "name";
pub const ATTENDANCE_PERCENT: &str = "attendance_percent";
pub const AVERAGE_SCORE: &str = "average_score";
pub const DAYS_OVERDUE: &str = "days_overdue";

/// One data row of a source table, keyed by header name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn student_id(&self) -> Option<&str> {
        self.get(STUDENT_ID)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (field, value) in iter {
            record.insert(field, value);
        }
        record
    }
}

/// Per-student view joined from the attendance, tests and fees sources.
///
/// Fields missing from a source stay `None`; they are never zero-filled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedStudentRecord {
    pub student_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance_percent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_score: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_overdue: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    /// Defined for consumers of the output contract; classification never assigns it.
    None,
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [RiskTier::None, RiskTier::Low, RiskTier::Medium, RiskTier::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::None => "NONE",
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedStudentRecord {
    #[serde(flatten)]
    pub student: UnifiedStudentRecord,
    pub risk: RiskTier,
    #[serde(rename = "flagDetails")]
    pub flag_details: Vec<String>,
}

/// Every classified record produced by one orchestration run, in attendance order.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct ClassifiedBatch {
    #[serde(skip)]
    pub batch_id: Uuid,
    pub students: Vec<ClassifiedStudentRecord>,
}

impl ClassifiedBatch {
    pub fn new(students: Vec<ClassifiedStudentRecord>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            students,
        }
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn count_tier(&self, tier: RiskTier) -> usize {
        self.students.iter().filter(|s| s.risk == tier).count()
    }

    pub fn tier_summary(&self) -> Vec<TierSummary> {
        RiskTier::ALL
            .iter()
            .map(|&tier| TierSummary {
                tier,
                count: self.count_tier(tier),
            })
            .collect()
    }
}

/// The HIGH-risk subset of a batch, handed to the dispatcher as one unit.
///
/// Not `Clone`: dispatching consumes it, so one batch is sent at most once.
#[derive(Debug)]
pub struct NotificationBatch {
    pub batch_id: Uuid,
    pub students: Vec<ClassifiedStudentRecord>,
}

impl NotificationBatch {
    pub fn from_batch(batch: &ClassifiedBatch) -> Self {
        Self {
            batch_id: batch.batch_id,
            students: batch
                .students
                .iter()
                .filter(|s| s.risk == RiskTier::High)
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSummary {
    pub tier: RiskTier,
    pub count: usize,
}
