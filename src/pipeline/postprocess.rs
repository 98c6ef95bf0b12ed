//! Deterministic cleanup of model output before it reaches a content item.
//!
//! Vision models wrap answers in code fences, emit CRLF, pad lines and
//! invent image links even when told not to. Each rule below is a pure
//! `&str → String` pass; [`clean_response`] runs them in a fixed order
//! (line endings before trimming, fences before table repair).

use once_cell::sync::Lazy;
use regex::Regex;

/// Normalise one raw model answer.
///
/// The result has no leading or trailing blank lines, so the assembler can
/// place it under a heading without extra spacing logic.
pub fn clean_response(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_outer_fence(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_line_ends(&s);
    let s = collapse_blank_lines(&s);
    let s = insert_missing_table_separator(&s);
    let s = drop_placeholder_images(&s);
    s.trim_matches('\n').to_string()
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// Any info string: models answer math pages with ```latex and tables with
// ```markdown.
static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\n(.*?)\n?```$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'],
        "",
    )
}

fn trim_line_ends(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.len() > 1
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|')
        && t.contains('-')
        && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// A pipe table whose first row is not followed by `|---|` gets one, sized
/// to the header's column count.
fn insert_missing_table_separator(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 2);
    let mut prev_in_table = false;

    for (i, line) in lines.iter().enumerate() {
        out.push((*line).to_string());
        let starts_table = is_table_row(line) && !prev_in_table && !is_separator_row(line);
        prev_in_table = is_table_row(line);
        if !starts_table {
            continue;
        }
        let next = lines.get(i + 1).copied();
        if next.is_some_and(is_table_row) && !next.is_some_and(is_separator_row) {
            let columns = line.trim().trim_matches('|').split('|').count().max(1);
            out.push(format!("|{}", " --- |".repeat(columns)));
        }
    }
    out.join("\n")
}

static RE_IMAGE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

/// Image links in transcribed text point at files that do not exist; keep
/// only absolute http(s) URLs and turn the rest into an italic caption.
fn drop_placeholder_images(input: &str) -> String {
    RE_IMAGE_LINK
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            let url = caps[2].trim();
            let real = (url.starts_with("http://") || url.starts_with("https://"))
                && !["example.com", "placeholder.com", "placehold.it", "dummyimage.com"]
                    .iter()
                    .any(|d| url.contains(d));
            if real {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fence_with_any_language() {
        assert_eq!(strip_outer_fence("```latex\n$x$\n```"), "$x$");
        assert_eq!(strip_outer_fence("```\nplain\n```"), "plain");
        assert_eq!(strip_outer_fence("no fence"), "no fence");
    }

    #[test]
    fn inner_fences_survive() {
        let input = "Intro\n```\ncode\n```\nOutro";
        assert_eq!(clean_response(input), input);
    }

    #[test]
    fn crlf_and_trailing_spaces() {
        assert_eq!(clean_response("a  \r\nb\rc\t"), "a\nb\nc");
    }

    #[test]
    fn blank_runs_collapse_to_one_empty_line() {
        assert_eq!(clean_response("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn invisible_characters_removed() {
        assert_eq!(clean_response("\u{FEFF}he\u{200B}llo"), "hello");
    }

    #[test]
    fn missing_separator_is_inserted() {
        let out = clean_response("| A | B |\n| 1 | 2 |");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "| --- | --- |");
    }

    #[test]
    fn well_formed_table_unchanged() {
        let table = "| A | B |\n|---|---|\n| 1 | 2 |";
        assert_eq!(clean_response(table), table);
    }

    #[test]
    fn placeholder_images_become_captions() {
        assert_eq!(clean_response("![Chart](chart.png)"), "*Chart*");
        assert_eq!(clean_response("x ![](image-url) y"), "x  y");
        let real = "![Fig](https://arxiv.org/fig1.png)";
        assert_eq!(clean_response(real), real);
    }

    #[test]
    fn whitespace_only_is_empty() {
        assert_eq!(clean_response("  \n\n \r\n"), "");
    }
}
