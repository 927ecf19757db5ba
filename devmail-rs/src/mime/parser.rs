use crate::error::{MailError, Result};
use crate::model::EmailAddress;
use base64::{engine::general_purpose, Engine as _};
use tracing::debug;

use super::date::parse_date;
use super::types::{Headers, MimePart, ParsedEmail};

/// Nested multiparts deeper than this are ignored
const MAX_MULTIPART_DEPTH: usize = 8;

/// MIME message parser
pub struct MimeParser;

impl MimeParser {
    /// Parse a raw email message into structured parts.
    ///
    /// Fails on an empty message or a malformed top-level header block.
    /// Problems inside individual parts are skipped.
    pub fn parse(message: &[u8]) -> Result<ParsedEmail> {
        if message.iter().all(u8::is_ascii_whitespace) {
            return Err(MailError::Parse("empty message".to_string()));
        }

        let (header_block, body) = Self::split_headers_body(message);
        let headers = Self::parse_headers(header_block, true)?;

        let mut parsed = ParsedEmail {
            subject: headers.get("Subject").unwrap_or_default().to_string(),
            from: Self::addresses(&headers, "From"),
            to: Self::addresses(&headers, "To"),
            cc: Self::addresses(&headers, "Cc"),
            bcc: Self::addresses(&headers, "Bcc"),
            date: headers.get("Date").and_then(parse_date),
            ..Default::default()
        };

        let content_type = headers.get("Content-Type");
        let media_type = content_type
            .map(Self::media_type)
            .unwrap_or_else(|| "text/plain".to_string());

        match content_type.and_then(|ct| Self::extract_parameter(ct, "boundary")) {
            Some(boundary) if media_type.starts_with("multipart/") => {
                Self::walk_multipart(&mut parsed, &boundary, body, 0);
            }
            _ => {
                let decoded = Self::decode_body(headers.get("Content-Transfer-Encoding"), body);
                let text = Self::body_text(&decoded);
                if media_type.starts_with("text/html") {
                    parsed.html_body = Some(text);
                } else {
                    parsed.text_body = Some(text);
                }
            }
        }

        parsed.headers = headers;
        Ok(parsed)
    }

    fn addresses(headers: &Headers, name: &str) -> Vec<EmailAddress> {
        headers
            .get(name)
            .map(EmailAddress::parse_list)
            .unwrap_or_default()
    }

    /// Split at the first empty line. A message without one is all headers.
    fn split_headers_body(message: &[u8]) -> (&[u8], &[u8]) {
        let mut offset = 0;
        for line in message.split_inclusive(|&b| b == b'\n') {
            if line == b"\n" || line == b"\r\n" {
                return (&message[..offset], &message[offset + line.len()..]);
            }
            offset += line.len();
        }
        (message, &message[message.len()..])
    }

    /// Text bodies are stored without surrounding whitespace.
    fn body_text(decoded: &[u8]) -> String {
        String::from_utf8_lossy(decoded).trim().to_string()
    }

    /// Parse a header block, unfolding continuation lines.
    ///
    /// In strict mode a line that is neither a field nor a continuation is an
    /// error; otherwise it is skipped.
    fn parse_headers(header_block: &[u8], strict: bool) -> Result<Headers> {
        let headers_str = String::from_utf8_lossy(header_block);
        let mut headers = Headers::default();
        let mut current: Option<(String, String)> = None;

        for line in headers_str.lines() {
            if line.is_empty() {
                continue;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                match current.as_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                    None if strict => {
                        return Err(MailError::Parse(format!(
                            "continuation without header: {}",
                            line.trim()
                        )));
                    }
                    None => {}
                }
                continue;
            }

            let field = line
                .split_once(':')
                .map(|(name, value)| (name.trim(), value.trim()))
                .filter(|(name, _)| !name.is_empty() && !name.contains(char::is_whitespace));

            match field {
                Some((name, value)) => {
                    if let Some((n, v)) = current.take() {
                        headers.push(n, v);
                    }
                    current = Some((name.to_string(), value.to_string()));
                }
                None if strict => {
                    return Err(MailError::Parse(format!("malformed header line: {}", line)));
                }
                None => debug!("Skipping malformed part header: {}", line),
            }
        }

        if let Some((n, v)) = current {
            headers.push(n, v);
        }

        Ok(headers)
    }

    fn media_type(content_type: &str) -> String {
        content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase()
    }

    /// Extract a parameter value from a header (e.g. `filename="file.txt"`)
    fn extract_parameter(header: &str, param_name: &str) -> Option<String> {
        header.split(';').skip(1).find_map(|part| {
            let (name, value) = part.split_once('=')?;
            if name.trim().eq_ignore_ascii_case(param_name) {
                Some(value.trim().trim_matches('"').trim_matches('\'').to_string())
            } else {
                None
            }
        })
    }

    /// Bodies between boundary delimiters. Preamble and epilogue are dropped;
    /// an unterminated final part runs to the end of the input.
    fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
        let delimiter = format!("--{}", boundary);
        let mut sections = Vec::new();
        let mut start: Option<usize> = None;
        let mut offset = 0;

        for line in body.split_inclusive(|&b| b == b'\n') {
            if let Some(rest) = line.strip_prefix(delimiter.as_bytes()) {
                let closing = rest.starts_with(b"--");
                if closing || rest.iter().all(u8::is_ascii_whitespace) {
                    if let Some(begin) = start {
                        let end = Self::strip_line_break(body, begin, offset);
                        sections.push(&body[begin..end]);
                    }
                    if closing {
                        return sections;
                    }
                    start = Some(offset + line.len());
                }
            }

            offset += line.len();
        }

        if let Some(begin) = start {
            sections.push(&body[begin..]);
        }
        sections
    }

    /// The line break before a delimiter belongs to the delimiter.
    fn strip_line_break(body: &[u8], begin: usize, end: usize) -> usize {
        let section = &body[begin..end];
        if section.ends_with(b"\r\n") {
            end - 2
        } else if section.ends_with(b"\n") {
            end - 1
        } else {
            end
        }
    }

    fn walk_multipart(parsed: &mut ParsedEmail, boundary: &str, body: &[u8], depth: usize) {
        if depth >= MAX_MULTIPART_DEPTH {
            debug!("Multipart nesting too deep, ignoring boundary {}", boundary);
            return;
        }

        for section in Self::split_multipart(body, boundary) {
            let (part_header_block, part_body) = Self::split_headers_body(section);
            let part_headers = match Self::parse_headers(part_header_block, false) {
                Ok(headers) => headers,
                Err(e) => {
                    debug!("Skipping part: {}", e);
                    continue;
                }
            };

            let raw_content_type = part_headers.get("Content-Type");
            let content_type = raw_content_type
                .map(Self::media_type)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "text/plain".to_string());

            if content_type.starts_with("multipart/") {
                if let Some(nested) =
                    raw_content_type.and_then(|ct| Self::extract_parameter(ct, "boundary"))
                {
                    Self::walk_multipart(parsed, &nested, part_body, depth + 1);
                }
                continue;
            }

            let disposition_header = part_headers.get("Content-Disposition");

            let part = MimePart {
                disposition: disposition_header.map(Self::media_type),
                filename: disposition_header
                    .and_then(|d| Self::extract_parameter(d, "filename"))
                    .or_else(|| raw_content_type.and_then(|ct| Self::extract_parameter(ct, "name"))),
                content_id: part_headers
                    .get("Content-ID")
                    .map(|cid| cid.trim().trim_matches(|c| c == '<' || c == '>').to_string())
                    .filter(|cid| !cid.is_empty()),
                raw_content_type: raw_content_type.map(str::to_string),
                body: Self::decode_body(part_headers.get("Content-Transfer-Encoding"), part_body),
                content_type,
            };

            Self::categorize_part(parsed, part);
        }
    }

    /// Text and HTML parts become the body, later parts overwriting earlier
    /// ones. Attachment dispositions and parts with a Content-ID are kept as
    /// attachments. Anything else is dropped.
    fn categorize_part(parsed: &mut ParsedEmail, part: MimePart) {
        let is_attachment = part.is_attachment_disposition();

        if part.content_type == "text/plain" && !is_attachment {
            parsed.text_body = Some(Self::body_text(&part.body));
        } else if part.content_type == "text/html" && !is_attachment {
            parsed.html_body = Some(Self::body_text(&part.body));
        } else if is_attachment || part.has_content_id() {
            parsed.attachments.push(part);
        } else {
            debug!("Dropping part of type {}", part.content_type);
        }
    }

    /// Decode a body per its Content-Transfer-Encoding. Undecodable content is
    /// returned unchanged.
    fn decode_body(encoding: Option<&str>, body: &[u8]) -> Vec<u8> {
        let encoding = encoding.unwrap_or_default().trim().to_lowercase();

        match encoding.as_str() {
            "base64" => Self::decode_base64(body).unwrap_or_else(|e| {
                debug!("Keeping undecodable base64 body: {}", e);
                body.to_vec()
            }),
            "quoted-printable" => Self::decode_quoted_printable(body),
            _ => body.to_vec(),
        }
    }

    fn decode_base64(content: &[u8]) -> Result<Vec<u8>> {
        let cleaned: Vec<u8> = content
            .iter()
            .filter(|&&b| !b.is_ascii_whitespace())
            .copied()
            .collect();

        general_purpose::STANDARD
            .decode(&cleaned)
            .map_err(|e| MailError::Parse(format!("Base64 decode error: {}", e)))
    }

    fn decode_quoted_printable(content: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(content.len());
        let mut i = 0;

        while i < content.len() {
            let byte = content[i];
            if byte != b'=' {
                result.push(byte);
                i += 1;
                continue;
            }

            // Soft line break
            match content.get(i + 1..) {
                Some([b'\r', b'\n', ..]) => {
                    i += 3;
                    continue;
                }
                Some([b'\n', ..]) => {
                    i += 2;
                    continue;
                }
                _ => {}
            }

            let decoded = content
                .get(i + 1..i + 3)
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());

            match decoded {
                Some(b) => {
                    result.push(b);
                    i += 3;
                }
                None => {
                    result.push(b'=');
                    i += 1;
                }
            }
        }

        result
    }
}
