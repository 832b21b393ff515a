//! Splitting long replies into post-sized parts.
//!
//! Greedy line packing: lines accumulate into the current part while the
//! part (plus the joining newline) stays within the limit. Lengths are
//! counted in Unicode scalar values, not bytes, since the post-length
//! limit is a character limit.

/// Splits `text` on newlines and greedily packs the lines into parts of at
/// most `max_part_len` characters.
///
/// A single line longer than the limit becomes its own oversized part; it
/// is never split mid-line. Joining the parts back with `\n` reproduces
/// the input exactly.
pub fn split_text(text: &str, max_part_len: usize) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split('\n') {
        let line_len = line.chars().count();

        if current.is_empty() {
            current.push_str(line);
            current_len = line_len;
        } else if current_len + 1 + line_len <= max_part_len {
            current.push('\n');
            current.push_str(line);
            current_len += 1 + line_len;
        } else {
            parts.push(std::mem::take(&mut current));
            current.push_str(line);
            current_len = line_len;
        }
    }

    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_part() {
        assert_eq!(split_text("hello\nworld", 100), vec!["hello\nworld"]);
    }

    #[test]
    fn packs_lines_up_to_the_limit() {
        // "aaa\nbbb" is 7 chars, "aaa\nbbb\nccc" would be 11
        let parts = split_text("aaa\nbbb\nccc", 8);
        assert_eq!(parts, vec!["aaa\nbbb", "ccc"]);
    }

    #[test]
    fn rejoined_parts_reproduce_the_input() {
        let text = "one\ntwo\nthree\nfour\nfive\nsix";
        let parts = split_text(text, 10);
        assert_eq!(parts.join("\n"), text);
        for part in &parts {
            assert!(part.chars().count() <= 10);
        }
    }

    #[test]
    fn overlong_line_passes_through_unsplit() {
        let text = "short\nthis line is much longer than the limit\nend";
        let parts = split_text(text, 10);
        assert_eq!(parts.join("\n"), text);
        assert!(parts.contains(&"this line is much longer than the limit".to_string()));
    }

    #[test]
    fn counts_characters_not_bytes() {
        // Four 3-byte characters per line; two lines fit in 9 chars
        let parts = split_text("ありがとう\nありがとう", 11);
        assert_eq!(parts, vec!["ありがとう\nありがとう"]);
    }

    #[test]
    fn empty_input_yields_one_empty_part() {
        assert_eq!(split_text("", 10), vec![""]);
    }

    #[test]
    fn preserves_blank_lines() {
        let text = "a\n\nb";
        assert_eq!(split_text(text, 100).join("\n"), text);
    }
}
