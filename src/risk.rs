use serde::Deserialize;

use crate::models::{ClassifiedStudentRecord, RiskTier, UnifiedStudentRecord};

/// Thresholds for the three risk rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RiskRules {
    /// Attendance strictly below this percentage raises a flag.
    pub attendance_below: i64,
    /// Average score strictly below this raises a flag.
    pub score_below: i64,
    /// More overdue days than this raises a flag.
    pub overdue_above: i64,
}

impl Default for RiskRules {
    fn default() -> Self {
        Self {
            attendance_below: 75,
            score_below: 40,
            overdue_above: 30,
        }
    }
}

/// Classify one student. Rules run in a fixed order (attendance, score,
/// fees) and each adds at most one flag.
pub fn classify(rules: &RiskRules, student: UnifiedStudentRecord) -> ClassifiedStudentRecord {
    let mut flag_details = Vec::new();

    if let Some(value) = triggered(&student.attendance_percent, |n| n < rules.attendance_below) {
        flag_details.push(format!("Low attendance: {value}%"));
    }
    if let Some(value) = triggered(&student.average_score, |n| n < rules.score_below) {
        flag_details.push(format!("Low score: {value}"));
    }
    if let Some(value) = triggered(&student.days_overdue, |n| n > rules.overdue_above) {
        flag_details.push(format!("Fee overdue: {value} days"));
    }

    ClassifiedStudentRecord {
        risk: tier_for(flag_details.len()),
        student,
        flag_details,
    }
}

pub fn classify_all(
    rules: &RiskRules,
    students: Vec<UnifiedStudentRecord>,
) -> Vec<ClassifiedStudentRecord> {
    students.into_iter().map(|s| classify(rules, s)).collect()
}

/// Zero flags is LOW, not NONE.
pub fn tier_for(flags: usize) -> RiskTier {
    match flags {
        0 => RiskTier::Low,
        1 => RiskTier::Medium,
        _ => RiskTier::High,
    }
}

fn triggered<'a>(field: &'a Option<String>, check: impl Fn(i64) -> bool) -> Option<&'a str> {
    let value = field.as_deref()?;
    leading_int(value).filter(|&n| check(n)).map(|_| value)
}

/// Parse the integer at the start of `value`: leading whitespace (a BOM
/// included), an optional sign, an optional `0x` prefix, then as many digits as
/// follow. Returns `None` when no digit is found. Out-of-range values saturate.
pub fn leading_int(value: &str) -> Option<i64> {
    let mut rest = value.trim_start_matches(|c: char| c.is_whitespace() || c == '\u{feff}');

    let negative = match rest.as_bytes().first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };

    let radix = match rest.get(..2) {
        Some("0x") | Some("0X") => {
            rest = &rest[2..];
            16
        }
        _ => 10,
    };

    let mut parsed: Option<i64> = None;
    for c in rest.chars() {
        let Some(digit) = c.to_digit(radix) else {
            break;
        };
        let acc = parsed.unwrap_or(0);
        parsed = Some(acc.saturating_mul(radix as i64).saturating_add(digit as i64));
    }

    parsed.map(|n| if negative { -n } else { n })
}
