//! RFC 5322 rendering of a stored [`Message`].

use std::fmt::Write;

use base64::Engine;
use postbox_common::Message;

use crate::{ErrorKind, TransportError};

/// Longest run of input bytes per encoded-word, so that each word stays
/// within the 75 character limit of RFC 2047.
const ENCODED_WORD_BYTES: usize = 45;

const BASE64_LINE: usize = 76;

/// The bare address an SMTP envelope needs, from `user@host` or `Name <user@host>`
///
/// # Errors
///
/// If the address cannot be parsed or holds anything but a single mailbox.
pub fn envelope_address(address: &str) -> crate::Result<String> {
    mailparse::addrparse(address)
        .ok()
        .and_then(|list| list.extract_single_info())
        .map(|info| info.addr)
        .filter(|addr| !addr.is_empty() && !addr.contains(['\r', '\n', '<', '>']))
        .ok_or_else(|| {
            TransportError::new(
                ErrorKind::InvalidMessage,
                format!("Invalid address '{address}'"),
            )
        })
}

/// Render the full message text, headers and body, with CRLF line endings
#[must_use]
pub fn render(message: &Message, domain: &str) -> String {
    let mut out = String::new();

    header(&mut out, "Date", &message.created_at.to_rfc2822());
    header(&mut out, "From", &message.from_address);
    header(&mut out, "To", &message.to_address);
    header(&mut out, "Subject", &encode_header(&message.subject));
    header(&mut out, "Message-ID", &format!("<{}@{domain}>", message.id));
    header(&mut out, "MIME-Version", "1.0");

    match &message.html_body {
        None => {
            text_part(&mut out, "text/plain", &message.body);
        }
        Some(html) => {
            let boundary = format!("=_postbox_{}", message.id);
            header(
                &mut out,
                "Content-Type",
                &format!("multipart/alternative; boundary=\"{boundary}\""),
            );
            out.push_str("\r\n");

            for (mime, body) in [("text/plain", &message.body), ("text/html", html)] {
                let _ = write!(out, "--{boundary}\r\n");
                text_part(&mut out, mime, body);
                out.push_str("\r\n");
            }
            let _ = write!(out, "--{boundary}--\r\n");
        }
    }

    out
}

fn header(out: &mut String, name: &str, value: &str) {
    // A header value may never introduce a new header line
    let value: String = value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    let _ = write!(out, "{name}: {value}\r\n");
}

/// Content headers, a blank line, then the body
fn text_part(out: &mut String, mime: &str, body: &str) {
    header(out, "Content-Type", &format!("{mime}; charset=utf-8"));

    if body.is_ascii() {
        header(out, "Content-Transfer-Encoding", "7bit");
        out.push_str("\r\n");
        for line in body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
    } else {
        header(out, "Content-Transfer-Encoding", "base64");
        out.push_str("\r\n");
        let encoded = base64::engine::general_purpose::STANDARD.encode(body);
        for line in encoded.as_bytes().chunks(BASE64_LINE) {
            out.push_str(&String::from_utf8_lossy(line));
            out.push_str("\r\n");
        }
    }
}

/// RFC 2047 `B` encoding for header values that are not plain ASCII
#[must_use]
pub fn encode_header(value: &str) -> String {
    if value.is_ascii() && !value.contains("=?") {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (index, c) in value.char_indices() {
        if index + c.len_utf8() - start > ENCODED_WORD_BYTES {
            words.push(&value[start..end]);
            start = index;
        }
        end = index + c.len_utf8();
    }
    words.push(&value[start..end]);

    words
        .into_iter()
        .map(|word| {
            format!(
                "=?utf-8?b?{}?=",
                base64::engine::general_purpose::STANDARD.encode(word)
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}
