//! Output formatting of rewritten documents.

use std::sync::LazyLock;

use regex::Regex;

/// Elements whose text content is whitespace-sensitive.
static PRESERVED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<pre\b.*?</pre\s*>|<textarea\b.*?</textarea\s*>|<script\b.*?</script\s*>|<style\b.*?</style\s*>",
    )
    .expect("preserved-element pattern is a valid regex")
});

/// A comment or a complete tag, quoted attribute values included.
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<!--.*?-->|<(?:"[^"]*"|'[^']*'|[^'">])*>"#)
        .expect("tag pattern is a valid regex")
});

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is a valid regex"));

/// Apply the build's formatting to a document.
///
/// With `minify` set whitespace is collapsed; otherwise the text passes
/// through unchanged.
pub fn format_document(source: &str, minify: bool) -> String {
    if minify {
        minify_html(source)
    } else {
        source.to_string()
    }
}

/// Collapse every whitespace run in text content to a single space.
///
/// Tags are copied as written, so attribute values keep their whitespace, and
/// `pre`, `textarea`, `script` and `style` blocks are left untouched. A run
/// between two tags shrinks to one space rather than disappearing, which keeps
/// the gap between inline elements.
pub fn minify_html(source: &str) -> String {
    let mut output = String::with_capacity(source.len());
    let mut last = 0;

    for preserved in PRESERVED.find_iter(source) {
        collapse_into(&mut output, &source[last..preserved.start()]);
        output.push_str(preserved.as_str());
        last = preserved.end();
    }
    collapse_into(&mut output, &source[last..]);

    output.trim().to_string()
}

fn collapse_into(output: &mut String, segment: &str) {
    let mut last = 0;
    for tag in TAG.find_iter(segment) {
        output.push_str(&WHITESPACE_RUN.replace_all(&segment[last..tag.start()], " "));
        output.push_str(tag.as_str());
        last = tag.end();
    }
    output.push_str(&WHITESPACE_RUN.replace_all(&segment[last..], " "));
}
