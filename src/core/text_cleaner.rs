pub const ASSESSMENT_MARKER: &str = "assessment/plan";

/// Text after the first `Assessment/Plan` marker (any case), trimmed.
/// Notes without the marker are returned unchanged.
pub fn extract_assessment_section(text: &str) -> &str {
    // ASCII 小寫不改變位元組長度，索引可直接套回原文
    let lower = text.to_ascii_lowercase();
    match lower.find(ASSESSMENT_MARKER) {
        Some(idx) => text[idx + ASSESSMENT_MARKER.len()..].trim(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_after_marker() {
        let note = "HPI: stable.\nASSESSMENT/PLAN:\n  1. Diabetes\n  2. CKD stage 3  \n";
        assert_eq!(
            extract_assessment_section(note),
            ":\n  1. Diabetes\n  2. CKD stage 3"
        );
    }

    #[test]
    fn test_marker_is_case_insensitive() {
        assert_eq!(
            extract_assessment_section("Assessment/Plan Hypertension"),
            "Hypertension"
        );
    }

    #[test]
    fn test_first_marker_wins() {
        assert_eq!(
            extract_assessment_section("assessment/plan A assessment/plan B"),
            "A assessment/plan B"
        );
    }

    #[test]
    fn test_missing_marker_returns_full_text() {
        let note = "  Chief complaint: cough  ";
        assert_eq!(extract_assessment_section(note), note);
    }

    #[test]
    fn test_non_ascii_text_before_marker() {
        assert_eq!(
            extract_assessment_section("Résumé — Assessment/Plan: COPD"),
            ": COPD"
        );
    }
}
