//! Output formatting: truncation, exit-code suffix, no-output sentinel.

/// Character budget for returned output.
pub const OUTPUT_BUDGET: usize = 60_000;
/// Fixed marker inserted where the middle of an oversized output was cut.
pub const TRUNCATION_MARKER: &str = "\n\n[... MIDDLE OF OUTPUT TRUNCATED ...]\n\n";
/// Substituted when a command produced nothing but whitespace.
pub const NO_OUTPUT_SENTINEL: &str = "(no output)";

/// Truncate oversized output, keeping the head and tail around a fixed
/// marker.
///
/// Trailing line-ending characters are trimmed before the length check. An
/// output over budget keeps the first 40% and last 60% of the budget, so the
/// result is exactly `OUTPUT_BUDGET` characters plus the marker.
pub fn truncate_output(text: &str) -> String {
    let trimmed = text.trim_end_matches(['\r', '\n']);
    let char_count = trimmed.chars().count();
    if char_count <= OUTPUT_BUDGET {
        return trimmed.to_string();
    }

    let head_chars = OUTPUT_BUDGET * 2 / 5;
    let tail_chars = OUTPUT_BUDGET - head_chars;
    let head_end = byte_offset_of_char(trimmed, head_chars);
    let tail_start = byte_offset_of_char(trimmed, char_count - tail_chars);
    format!(
        "{}{}{}",
        &trimmed[..head_end],
        TRUNCATION_MARKER,
        &trimmed[tail_start..]
    )
}

/// Byte offset of the `n`-th character (clamped to the end).
fn byte_offset_of_char(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map_or(text.len(), |(at, _)| at)
}

/// Append the human-readable exit-code suffix for nonzero exit codes.
pub fn with_exit_code(text: &str, exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) if code != 0 => format!("{text}\n\nCommand exited with code {code}"),
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_only_loses_trailing_newlines() {
        assert_eq!(truncate_output("hello\n"), "hello");
        assert_eq!(truncate_output("hello\r\n\r\n"), "hello");
        assert_eq!(truncate_output("keep\ninternal\n\nnewlines\n"), "keep\ninternal\n\nnewlines");
    }

    #[test]
    fn oversized_output_is_cut_in_the_middle() {
        let input = "x".repeat(OUTPUT_BUDGET + 5_000);
        let truncated = truncate_output(&input);
        assert_eq!(
            truncated.chars().count(),
            OUTPUT_BUDGET + TRUNCATION_MARKER.len()
        );
        assert_eq!(truncated.matches("MIDDLE OF OUTPUT TRUNCATED").count(), 1);
    }

    #[test]
    fn head_and_tail_shares_are_40_60() {
        let head = "a".repeat(30_000);
        let tail = "b".repeat(40_000);
        let truncated = truncate_output(&format!("{head}{tail}"));
        let marker_at = truncated.find(TRUNCATION_MARKER).expect("marker");
        assert_eq!(marker_at, 24_000);
        assert!(truncated[..marker_at].chars().all(|ch| ch == 'a'));
        assert_eq!(truncated.len() - (marker_at + TRUNCATION_MARKER.len()), 36_000);
    }

    #[test]
    fn truncation_is_char_boundary_safe() {
        let input = "é".repeat(OUTPUT_BUDGET + 10);
        let truncated = truncate_output(&input);
        assert_eq!(
            truncated.chars().count(),
            OUTPUT_BUDGET + TRUNCATION_MARKER.len()
        );
    }

    #[test]
    fn exit_code_suffix_only_for_nonzero() {
        assert_eq!(with_exit_code("ok", Some(0)), "ok");
        assert_eq!(with_exit_code("ok", None), "ok");
        assert_eq!(
            with_exit_code("boom", Some(2)),
            "boom\n\nCommand exited with code 2"
        );
    }
}
