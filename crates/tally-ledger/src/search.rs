//! Student search patterns.
//!
//! Queries are turned into SQL `LIKE` patterns: lowercased, with `-`, `.` and
//! spaces acting as word separators that match any run of characters. The
//! in-memory store evaluates the same pattern with [`like_match`] so both
//! backends agree on what matches.
use crate::model::Student;

const ANY: u8 = b'%';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPattern(String);

impl SearchPattern {
    pub fn from_query(query: &str) -> Self {
        let term: String = query
            .to_lowercase()
            .chars()
            .map(|c| if matches!(c, '-' | '.' | ' ') { '%' } else { c })
            .collect();
        Self(format!("%{term}%"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Enabled-ness is not considered here; stores filter on it separately.
    pub fn matches(&self, student: &Student) -> bool {
        like_match(&self.0, &student.first_name.to_lowercase())
            || like_match(&self.0, &student.last_name.to_lowercase())
            || like_match(&self.0, &student.student_id.to_string())
    }
}

/// `LIKE` evaluation where `%` matches any run of bytes (including none).
///
/// `_` is treated literally; queries never produce it as a wildcard.
pub fn like_match(pattern: &str, value: &str) -> bool {
    let (pattern, value) = (pattern.as_bytes(), value.as_bytes());
    let (mut p_idx, mut v_idx) = (0usize, 0usize);
    let (mut star_idx, mut match_idx) = (None, 0usize);

    while v_idx < value.len() {
        if p_idx < pattern.len() && pattern[p_idx] == ANY {
            star_idx = Some(p_idx);
            match_idx = v_idx;
            p_idx += 1;
            continue;
        }

        if p_idx < pattern.len() && pattern[p_idx] == value[v_idx] {
            p_idx += 1;
            v_idx += 1;
            continue;
        }

        // Backtrack: let the last `%` swallow one more byte.
        if let Some(star) = star_idx {
            p_idx = star + 1;
            match_idx += 1;
            v_idx = match_idx;
            continue;
        }

        return false;
    }

    while p_idx < pattern.len() && pattern[p_idx] == ANY {
        p_idx += 1;
    }

    p_idx == pattern.len()
}
