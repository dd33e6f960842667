//! SMTP reply parsing.

use std::fmt;

use super::error::{ClientError, Result};

/// A single line of an SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine<'a> {
    pub code: u16,
    /// `false` when the code is followed by `-`, meaning more lines follow.
    pub is_last: bool,
    pub text: &'a str,
}

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All reply text, one line per line of the reply.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx, e.g. `354` after `DATA`
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// 4xx
    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// 5xx
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Whether any line of the reply starts with `keyword`, ignoring case.
    ///
    /// Used to look for EHLO capabilities such as `AUTH`.
    #[must_use]
    pub fn advertises(&self, keyword: &str) -> bool {
        self.lines.iter().any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
        })
    }

    /// Parse one reply line, without its line ending.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Parse` if the line doesn't look like `NNN text` or `NNN-text`.
    pub fn parse_line(line: &str) -> Result<ResponseLine<'_>> {
        let code = line
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|code| (100..600).contains(code))
            .ok_or_else(|| ClientError::Parse(format!("Invalid status code in '{line}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(&c) => {
                return Err(ClientError::Parse(format!(
                    "Invalid separator character: '{}'",
                    char::from(c)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            text: line.get(4..).unwrap_or_default(),
        })
    }

    /// Parse a complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it took up, or `None` if the
    /// buffer does not yet hold a complete reply.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Parse` if the reply is malformed.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let line = std::str::from_utf8(raw)?.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let parsed = Self::parse_line(line)?;
            match code {
                None => code = Some(parsed.code),
                Some(expected) if expected != parsed.code => {
                    return Err(ClientError::Parse(format!(
                        "Status code mismatch in multi-line response: expected {expected}, got {}",
                        parsed.code
                    )));
                }
                Some(_) => {}
            }

            lines.push(parsed.text.to_string());

            if parsed.is_last {
                return Ok(Some((Self::new(parsed.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.lines.join(" "))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_single_line() {
        assert_eq!(
            Response::parse_line("220 mail.example.com ESMTP").unwrap(),
            ResponseLine {
                code: 220,
                is_last: true,
                text: "mail.example.com ESMTP",
            }
        );
        assert_eq!(
            Response::parse_line("250-PIPELINING").unwrap(),
            ResponseLine {
                code: 250,
                is_last: false,
                text: "PIPELINING",
            }
        );
        assert!(Response::parse_line("250").unwrap().is_last);
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(Response::parse_line("25").is_err());
        assert!(Response::parse_line("abc hello").is_err());
        assert!(Response::parse_line("250_hello").is_err());
        assert!(Response::parse_line("999 nope").is_err());
        assert!(Response::parse_line("2\u{e9}0 nope").is_err());
    }

    #[test]
    fn test_parse_multi_line() {
        let buffer = b"250-mail.example.com\r\n250-AUTH PLAIN LOGIN\r\n250 8BITMIME\r\n354 extra";
        let (response, consumed) = Response::parse(buffer).unwrap().unwrap();

        assert_eq!(response.code, 250);
        assert_eq!(
            response.lines,
            vec!["mail.example.com", "AUTH PLAIN LOGIN", "8BITMIME"]
        );
        assert_eq!(&buffer[consumed..], b"354 extra");
        assert!(response.advertises("auth"));
        assert!(!response.advertises("STARTTLS"));
    }

    #[test]
    fn test_parse_incomplete() {
        assert!(Response::parse(b"250-first\r\n250 sec").unwrap().is_none());
        assert!(Response::parse(b"").unwrap().is_none());
    }

    #[test]
    fn test_parse_code_mismatch() {
        assert!(Response::parse(b"250-first\r\n550 second\r\n").is_err());
    }

    #[test]
    fn test_classes() {
        assert!(Response::new(250, vec![]).is_success());
        assert!(Response::new(354, vec![]).is_intermediate());
        assert!(Response::new(451, vec![]).is_temporary_error());
        assert!(Response::new(550, vec![]).is_permanent_error());
        assert_eq!(
            Response::new(550, vec!["No such".into(), "user".into()]).to_string(),
            "550 No such user"
        );
    }
}
