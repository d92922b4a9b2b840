//! Heuristic pass/fail signals derived from extracted page text.

/// Words a finished market report is expected to mention.
pub const DEFAULT_REPORT_KEYWORDS: [&str; 6] = ["报告", "总结", "趋势", "支撑", "阻力", "技术"];

/// Length in characters of the longest text, `0` when there is none.
pub fn longest_len(texts: &[String]) -> usize {
    texts
        .iter()
        .map(|text| text.chars().count())
        .max()
        .unwrap_or(0)
}

/// Whether any text contains any keyword. Empty keywords never match.
pub fn contains_keywords<S: AsRef<str>>(texts: &[String], keywords: &[S]) -> bool {
    texts.iter().any(|text| {
        keywords
            .iter()
            .map(AsRef::as_ref)
            .filter(|keyword| !keyword.is_empty())
            .any(|keyword| text.contains(keyword))
    })
}

/// A click on the second card counts as handled when the card became
/// selected or the first card was de-emphasized.
pub fn interaction_responsive(
    first_class: Option<&str>,
    second_class: Option<&str>,
    selected_marker: &str,
    dimmed_marker: &str,
) -> bool {
    let has = |class: Option<&str>, marker: &str| {
        !marker.is_empty() && class.is_some_and(|class| class.contains(marker))
    };
    has(second_class, selected_marker) || has(first_class, dimmed_marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn longest_len_counts_characters() {
        assert_eq!(longest_len(&[]), 0);
        assert_eq!(longest_len(&texts(&["", "abc", "黄金趋势"])), 4);
    }

    #[test]
    fn keywords_match_anywhere_in_any_text() {
        let keywords = DEFAULT_REPORT_KEYWORDS;
        assert!(!contains_keywords(&[], &keywords));
        assert!(!contains_keywords(&texts(&["", "gold is flat"]), &keywords));
        assert!(contains_keywords(&texts(&["", "短期趋势向上"]), &keywords));
        assert!(!contains_keywords(&texts(&["anything"]), &[""]));
    }

    #[test]
    fn either_marker_signals_a_response() {
        let check = |first, second| interaction_responsive(first, second, "opacity-100", "opacity-40");
        assert!(check(None, Some("trace-card opacity-100")));
        assert!(check(Some("trace-card opacity-40"), Some("trace-card")));
        assert!(!check(Some("trace-card"), Some("trace-card")));
        assert!(!check(None, None));
    }
}
