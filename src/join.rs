//! One unified record per attendance row, in attendance order. Tests and fees
//! rows are matched first-wins by `student_id`; a faster index must keep that.

use tracing::warn;

use crate::models::{
    RawRecord, UnifiedStudentRecord, ATTENDANCE_PERCENT, AVERAGE_SCORE, DAYS_OVERDUE, NAME,
};

/// The three completed source tables of one run.
#[derive(Debug, Default)]
pub struct SourceTables {
    pub attendance: Vec<RawRecord>,
    pub tests: Vec<RawRecord>,
    pub fees: Vec<RawRecord>,
}

/// Consume the source tables and build the unified records.
pub fn join_sources(tables: SourceTables) -> Vec<UnifiedStudentRecord> {
    let SourceTables {
        attendance,
        tests,
        fees,
    } = tables;

    let mut unified = Vec::with_capacity(attendance.len());

    for (row, att) in attendance.iter().enumerate() {
        let Some(student_id) = att.student_id() else {
            warn!(row = row + 1, "attendance row has no student_id, skipping");
            continue;
        };

        let test = first_match(&tests, student_id);
        let fee = first_match(&fees, student_id);

        let name = att
            .get(NAME)
            .or_else(|| test.and_then(|t| t.get(NAME)))
            .or_else(|| fee.and_then(|f| f.get(NAME)));

        unified.push(UnifiedStudentRecord {
            student_id: student_id.to_string(),
            name: name.map(str::to_string),
            attendance_percent: att.get(ATTENDANCE_PERCENT).map(str::to_string),
            average_score: test.and_then(|t| t.get(AVERAGE_SCORE)).map(str::to_string),
            days_overdue: fee.and_then(|f| f.get(DAYS_OVERDUE)).map(str::to_string),
        });
    }

    unified
}

fn first_match<'a>(rows: &'a [RawRecord], student_id: &str) -> Option<&'a RawRecord> {
    rows.iter().find(|r| r.student_id() == Some(student_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[(&str, &str)]) -> RawRecord {
        fields.iter().map(|&(k, v)| (k, v)).collect()
    }

    #[test]
    fn output_follows_attendance_cardinality_and_order() {
        let tables = SourceTables {
            attendance: vec![
                row(&[("student_id", "3"), ("attendance_percent", "80")]),
                row(&[("student_id", "1"), ("attendance_percent", "70")]),
                row(&[("student_id", "2"), ("attendance_percent", "95")]),
            ],
            tests: vec![row(&[("student_id", "9"), ("average_score", "50")])],
            fees: vec![row(&[("student_id", "8"), ("days_overdue", "3")])],
        };

        let unified = join_sources(tables);
        let ids: Vec<&str> = unified.iter().map(|u| u.student_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
    }

    #[test]
    fn fields_are_copied_from_matching_rows() {
        let tables = SourceTables {
            attendance: vec![row(&[
                ("student_id", "1"),
                ("name", "Avery Lee"),
                ("attendance_percent", "60"),
            ])],
            tests: vec![row(&[("student_id", "1"), ("average_score", "30")])],
            fees: vec![row(&[("student_id", "1"), ("days_overdue", "45")])],
        };

        let unified = join_sources(tables);
        assert_eq!(
            unified[0],
            UnifiedStudentRecord {
                student_id: "1".to_string(),
                name: Some("Avery Lee".to_string()),
                attendance_percent: Some("60".to_string()),
                average_score: Some("30".to_string()),
                days_overdue: Some("45".to_string()),
            }
        );
    }

    #[test]
    fn first_matching_secondary_row_wins() {
        let tables = SourceTables {
            attendance: vec![row(&[("student_id", "1"), ("attendance_percent", "88")])],
            tests: vec![
                row(&[("student_id", "1"), ("average_score", "35")]),
                row(&[("student_id", "1"), ("average_score", "90")]),
            ],
            fees: vec![
                row(&[("student_id", "2"), ("days_overdue", "60")]),
                row(&[("student_id", "1"), ("days_overdue", "10")]),
                row(&[("student_id", "1"), ("days_overdue", "99")]),
            ],
        };

        let unified = join_sources(tables);
        assert_eq!(unified[0].average_score.as_deref(), Some("35"));
        assert_eq!(unified[0].days_overdue.as_deref(), Some("10"));
    }

    #[test]
    fn attendance_only_student_keeps_secondary_fields_absent() {
        let tables = SourceTables {
            attendance: vec![row(&[("student_id", "2"), ("attendance_percent", "90")])],
            ..Default::default()
        };

        let unified = join_sources(tables);
        assert_eq!(unified.len(), 1);
        assert_eq!(unified[0].average_score, None);
        assert_eq!(unified[0].days_overdue, None);
        assert_eq!(unified[0].name, None);
    }

    #[test]
    fn name_falls_back_to_secondary_sources() {
        let tables = SourceTables {
            attendance: vec![row(&[("student_id", "4"), ("attendance_percent", "91")])],
            tests: vec![row(&[("student_id", "4"), ("name", "Kiara Patel"), ("average_score", "70")])],
            fees: vec![row(&[("student_id", "4"), ("name", "K. Patel")])],
        };

        let unified = join_sources(tables);
        assert_eq!(unified[0].name.as_deref(), Some("Kiara Patel"));
    }

    #[test]
    fn attendance_name_beats_secondary_names() {
        let tables = SourceTables {
            attendance: vec![row(&[("student_id", "6"), ("name", "Noor Haddad")])],
            tests: vec![row(&[("student_id", "6"), ("name", "N. Haddad")])],
            fees: vec![row(&[("student_id", "6"), ("name", "Haddad")])],
        };

        let unified = join_sources(tables);
        assert_eq!(unified[0].name.as_deref(), Some("Noor Haddad"));
    }

    #[test]
    fn rows_without_identifier_are_skipped() {
        let tables = SourceTables {
            attendance: vec![
                row(&[("attendance_percent", "50")]),
                row(&[("student_id", "5"), ("attendance_percent", "50")]),
            ],
            tests: vec![row(&[("average_score", "10")])],
            ..Default::default()
        };

        let unified = join_sources(tables);
        assert_eq!(unified.len(), 1);
        assert_eq!(unified[0].student_id, "5");
        assert_eq!(unified[0].average_score, None);
    }
}
