//! HTML → plain text for emails that only ship an HTML part.
//!
//! Block-level tags become line breaks so line-oriented rules (labels,
//! property-name lines) keep working. `<script>`/`<style>` bodies are dropped.

use regex::{Captures, Regex};
use std::sync::LazyLock;

const BLOCK_TAGS: &[&str] = &[
    "br", "p", "div", "tr", "li", "ul", "ol", "table", "h1", "h2", "h3", "h4", "h5", "h6",
    "section", "header", "footer", "hr",
];

pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut chars = html.chars();
    let mut skip_until: Option<&'static str> = None;

    while let Some(ch) = chars.next() {
        if ch != '<' {
            if skip_until.is_none() {
                out.push(ch);
            }
            continue;
        }

        let mut tag = String::new();
        for c in chars.by_ref() {
            if c == '>' {
                break;
            }
            tag.push(c);
        }
        let tag = tag.trim().to_lowercase();
        let closing = tag.starts_with('/');
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();

        if let Some(end) = skip_until {
            if closing && name == end {
                skip_until = None;
            }
            continue;
        }

        match name.as_str() {
            "script" if !closing => skip_until = Some("script"),
            "style" if !closing => skip_until = Some("style"),
            "td" | "th" => out.push(' '),
            n if BLOCK_TAGS.contains(&n) => out.push('\n'),
            _ => {}
        }
    }

    decode_entities(&out)
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").expect("static regex")
});

/// Named entities platforms actually send, plus `&#NNN;` / `&#xHH;`.
/// Unknown names are left as written. One pass, so `&amp;lt;` stays `&lt;`.
fn decode_entities(s: &str) -> String {
    ENTITY
        .replace_all(s, |caps: &Captures<'_>| {
            let body = &caps[1];
            let decoded = match body.strip_prefix('#') {
                Some(num) => {
                    let code = match num.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => num.parse().ok(),
                    };
                    match code {
                        Some(160) => Some(' '),
                        Some(code) => char::from_u32(code).filter(|c| *c != '\0'),
                        None => None,
                    }
                }
                None => match body {
                    "nbsp" => Some(' '),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "amp" => Some('&'),
                    "ndash" => Some('–'),
                    "mdash" => Some('—'),
                    "rsquo" => Some('’'),
                    "lsquo" => Some('‘'),
                    "rarr" => Some('→'),
                    _ => None,
                },
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}
