use crate::error::{MailError, Result};
use regex::{Captures, Regex};

/// Attributes whose values are loaded or followed as URLs
const URL_ATTRIBUTES: [&str; 9] = [
    "href",
    "src",
    "action",
    "formaction",
    "background",
    "poster",
    "lowsrc",
    "dynsrc",
    "xlink:href",
];

const SCRIPT_SCHEMES: [&str; 3] = ["javascript:", "vbscript:", "data:text/html"];

/// Cleans HTML before it is exposed to readers.
pub trait HtmlSanitizer: Send + Sync {
    fn sanitize(&self, html: &str) -> String;
}

/// Strips scripts, embedded frames, inline event handlers and script URLs.
/// Every remaining start tag is rebuilt from its parsed attributes; markup is
/// otherwise left alone.
pub struct BasicSanitizer {
    blocks: Regex,
    void_tags: Regex,
    start_tags: Regex,
    attributes: Regex,
    char_refs: Regex,
}

impl BasicSanitizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            blocks: compile(r"(?is)<(script|style|iframe|object)\b.*?</(script|style|iframe|object)\s*>")?,
            void_tags: compile(r"(?is)<(script|iframe|object|embed|link|meta|base)\b[^>]*>")?,
            start_tags: compile(
                r#"(?s)<([A-Za-z][A-Za-z0-9:-]*)((?:[^>"']|"[^"]*"|'[^']*'|["'])*)>"#,
            )?,
            attributes: compile(r#"(?s)([^\s"'>/=]+)(?:\s*=\s*("[^"]*"|'[^']*'|[^\s>"']+))?"#)?,
            char_refs: compile(r"(?i)&(#x[0-9a-f]+|#[0-9]+|colon|tab|newline);?")?,
        })
    }

    fn clean_tag(&self, name: &str, attribute_text: &str) -> String {
        let mut tag = format!("<{}", name);

        for caps in self.attributes.captures_iter(attribute_text) {
            let attr = &caps[1];
            let lower = attr.to_ascii_lowercase();
            if lower.starts_with("on") {
                continue;
            }

            match caps.get(2).map(|v| v.as_str()) {
                None => {
                    tag.push(' ');
                    tag.push_str(attr);
                }
                Some(value)
                    if URL_ATTRIBUTES.contains(&lower.as_str()) && self.is_script_url(value) =>
                {
                    tag.push_str(&format!(" {}=\"#\"", attr));
                }
                Some(value) if value.starts_with('"') || value.starts_with('\'') => {
                    tag.push_str(&format!(" {}={}", attr, value));
                }
                Some(value) => tag.push_str(&format!(" {}=\"{}\"", attr, value)),
            }
        }

        if attribute_text.trim_end().ends_with('/') {
            tag.push_str(" /");
        }
        tag.push('>');
        tag
    }

    /// Character references and embedded whitespace do not hide a scheme.
    fn is_script_url(&self, value: &str) -> bool {
        let value = value.trim_matches(|c| c == '"' || c == '\'');
        let decoded = self
            .char_refs
            .replace_all(value, |caps: &Captures| decode_char_ref(&caps[1]));
        let normalized = decoded
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_control())
            .collect::<String>()
            .to_ascii_lowercase();

        SCRIPT_SCHEMES
            .iter()
            .any(|scheme| normalized.starts_with(scheme))
    }
}

impl HtmlSanitizer for BasicSanitizer {
    fn sanitize(&self, html: &str) -> String {
        if html.is_empty() {
            return String::new();
        }

        let cleaned = self.blocks.replace_all(html, "");
        let cleaned = self.void_tags.replace_all(&cleaned, "");
        let cleaned = self
            .start_tags
            .replace_all(&cleaned, |caps: &Captures| self.clean_tag(&caps[1], &caps[2]));
        cleaned.into_owned()
    }
}

fn decode_char_ref(reference: &str) -> String {
    let reference = reference.to_ascii_lowercase();
    let code = match reference.as_str() {
        "colon" => Some(':' as u32),
        "tab" => Some('\t' as u32),
        "newline" => Some('\n' as u32),
        r if r.starts_with("#x") => u32::from_str_radix(&r[2..], 16).ok(),
        r => r[1..].parse().ok(),
    };

    code.and_then(char::from_u32)
        .map(String::from)
        .unwrap_or_default()
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| MailError::Config(format!("sanitizer pattern: {}", e)))
}
