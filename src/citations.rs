// src/citations.rs
use html_escape::{encode_double_quoted_attribute, encode_text};
use regex::Regex;
use std::sync::OnceLock;

fn marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("citation marker pattern is valid"))
}

/// Only absolute http(s) links are rendered.
fn linkable(url: &str) -> Option<&str> {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();
    (lower.starts_with("https://") || lower.starts_with("http://")).then_some(url)
}

/// Renders `text` as HTML with `[n]` markers turned into superscript links
/// to the n-th URL (1-based). The text itself is escaped. Markers pointing
/// past the end of `urls` or at a non-http(s) URL are removed.
pub fn inline_citations<S: AsRef<str>>(text: &str, urls: &[S]) -> String {
    let mut html = String::with_capacity(text.len());
    let mut last = 0;
    for caps in marker().captures_iter(text) {
        let (Some(whole), Some(digits)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        html.push_str(&encode_text(&text[last..whole.start()]));
        last = whole.end();

        let n = digits.as_str().parse::<usize>().unwrap_or(0);
        let url = n
            .checked_sub(1)
            .and_then(|i| urls.get(i))
            .and_then(|u| linkable(u.as_ref()));
        if let Some(url) = url {
            html.push_str(&format!(
                r#"<sup><a href="{}" target="_blank" rel="noopener noreferrer">[{}]</a></sup>"#,
                encode_double_quoted_attribute(url),
                n
            ));
        }
    }
    html.push_str(&encode_text(&text[last..]));
    html
}
