/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Strip markdown code fences from a model response.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_never_splits_a_character() {
        let comment = "Más vivienda, por favor";
        let truncated = truncate_to_char_boundary(comment, 2);
        assert_eq!(truncated, "M");
        assert_eq!(truncate_to_char_boundary(comment, 100), comment);
    }

    #[test]
    fn fences_are_removed_from_opinion_json() {
        let fenced = "```json\n{\"opinion\": \"support\"}\n```";
        assert_eq!(strip_code_blocks(fenced), "{\"opinion\": \"support\"}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  Opinion: oppose "), "Opinion: oppose");
    }
}
