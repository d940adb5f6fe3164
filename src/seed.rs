use std::path::Path;

use anyhow::Context;

use crate::pipeline::{ATTENDANCE_FILE, FEES_FILE, TESTS_FILE};

const STUDENTS: [(&str, &str, u32, u32, u32); 6] = [
    ("S1001", "Avery Lee", 62, 35, 45),
    ("S1002", "Jules Moreno", 91, 78, 0),
    ("S1003", "Kiara Patel", 70, 82, 12),
    ("S1004", "Noah Brooks", 88, 38, 60),
    ("S1005", "Maya Okafor", 96, 91, 3),
    ("S1006", "Theo Lindqvist", 55, 44, 31),
];

/// Write a small, realistic set of the three source tables into `dir`.
pub fn write_sample(dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let mut attendance = csv::Writer::from_path(dir.join(ATTENDANCE_FILE))?;
    let mut tests = csv::Writer::from_path(dir.join(TESTS_FILE))?;
    let mut fees = csv::Writer::from_path(dir.join(FEES_FILE))?;

    attendance.write_record(["student_id", "name", "attendance_percent"])?;
    tests.write_record(["student_id", "average_score"])?;
    fees.write_record(["student_id", "days_overdue"])?;

    for (id, name, attendance_percent, average_score, days_overdue) in STUDENTS {
        attendance.write_record([id, name, attendance_percent.to_string().as_str()])?;
        tests.write_record([id, average_score.to_string().as_str()])?;
        fees.write_record([id, days_overdue.to_string().as_str()])?;
    }

    attendance.flush()?;
    tests.flush()?;
    fees.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::join_sources;
    use crate::models::RiskTier;
    use crate::pipeline::{load_sources, SourceSet};
    use crate::risk::{classify_all, RiskRules};

    #[tokio::test]
    async fn sample_covers_every_tier() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path()).unwrap();

        let tables = load_sources(&SourceSet::well_known(dir.path())).await.unwrap();
        let classified = classify_all(&RiskRules::default(), join_sources(tables));

        assert_eq!(classified.len(), STUDENTS.len());
        for tier in [RiskTier::Low, RiskTier::Medium, RiskTier::High] {
            assert!(classified.iter().any(|s| s.risk == tier), "no {tier} student");
        }
    }
}
