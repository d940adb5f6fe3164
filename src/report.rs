use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{ClassifiedBatch, ClassifiedStudentRecord, RiskTier};

pub const DIGEST_HEADER: [&str; 6] = [
    "student_id",
    "name",
    "attendance_percent",
    "average_score",
    "days_overdue",
    "risk",
];

/// Students ordered by tier (highest first), then by number of flags, keeping
/// input order among equals.
pub fn ranked(batch: &ClassifiedBatch) -> Vec<&ClassifiedStudentRecord> {
    let mut students: Vec<&ClassifiedStudentRecord> = batch.students.iter().collect();
    students.sort_by(|a, b| {
        b.risk
            .cmp(&a.risk)
            .then_with(|| b.flag_details.len().cmp(&a.flag_details.len()))
    });
    students
}

pub fn describe(record: &ClassifiedStudentRecord) -> String {
    let name = record.student.name.as_deref().unwrap_or("unnamed");
    if record.flag_details.is_empty() {
        format!("{} ({}) {}", name, record.student.student_id, record.risk)
    } else {
        format!(
            "{} ({}) {}: {}",
            name,
            record.student.student_id,
            record.risk,
            record.flag_details.join(", ")
        )
    }
}

pub fn build_report(source_label: &str, generated_at: DateTime<Utc>, batch: &ClassifiedBatch) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Dropout Early Warning Report");
    let _ = writeln!(
        output,
        "Generated for {} at {}",
        source_label,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if batch.is_empty() {
        let _ = writeln!(output, "No students in this batch.");
    } else {
        for summary in batch.tier_summary().iter().rev() {
            if summary.tier == RiskTier::None && summary.count == 0 {
                continue;
            }
            let share = summary.count as f64 * 100.0 / batch.len() as f64;
            let _ = writeln!(
                output,
                "- {}: {} students ({:.1}%)",
                summary.tier, summary.count, share
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Attention");

    let flagged: Vec<_> = ranked(batch)
        .into_iter()
        .filter(|s| matches!(s.risk, RiskTier::High | RiskTier::Medium))
        .collect();

    if flagged.is_empty() {
        let _ = writeln!(output, "No students flagged in this batch.");
    } else {
        for student in flagged {
            let _ = writeln!(output, "- {}", describe(student));
        }
    }

    output
}

/// The MEDIUM and HIGH students as CSV, in batch order. Absent fields are empty cells.
pub fn weekly_digest(batch: &ClassifiedBatch) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(DIGEST_HEADER)?;

    for record in batch
        .students
        .iter()
        .filter(|s| matches!(s.risk, RiskTier::High | RiskTier::Medium))
    {
        let s = &record.student;
        writer.write_record([
            s.student_id.as_str(),
            s.name.as_deref().unwrap_or_default(),
            s.attendance_percent.as_deref().unwrap_or_default(),
            s.average_score.as_deref().unwrap_or_default(),
            s.days_overdue.as_deref().unwrap_or_default(),
            record.risk.as_str(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
