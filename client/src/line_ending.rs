//! Line-ending conversion for pasted text

use pasteport_shared::Error;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineEnding {
    /// Leave text untouched
    #[default]
    Keep,
    Lf,
    Crlf,
}

impl FromStr for LineEnding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "keep" | "none" => Ok(LineEnding::Keep),
            "lf" | "LF" => Ok(LineEnding::Lf),
            "crlf" | "CRLF" => Ok(LineEnding::Crlf),
            other => Err(Error::Config(format!("unknown line ending '{}'", other))),
        }
    }
}

/// Rewrite every `\r\n`, lone `\r` and lone `\n` to the requested ending
pub fn convert(text: &str, ending: LineEnding) -> String {
    let newline = match ending {
        LineEnding::Keep => return text.to_string(),
        LineEnding::Lf => "\n",
        LineEnding::Crlf => "\r\n",
    };

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str(newline);
            }
            '\n' => out.push_str(newline),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_lf() {
        assert_eq!(convert("a\r\nb\rc\nd", LineEnding::Lf), "a\nb\nc\nd");
        assert_eq!(convert("\r\n\r\n", LineEnding::Lf), "\n\n");
    }

    #[test]
    fn test_to_crlf() {
        assert_eq!(convert("a\nb\rc\r\nd", LineEnding::Crlf), "a\r\nb\r\nc\r\nd");
        assert_eq!(convert("\nstart", LineEnding::Crlf), "\r\nstart");
        assert_eq!(convert("end\r", LineEnding::Crlf), "end\r\n");
        assert_eq!(convert("\n\n", LineEnding::Crlf), "\r\n\r\n");
    }

    #[test]
    fn test_keep() {
        assert_eq!(convert("a\r\nb\n", LineEnding::Keep), "a\r\nb\n");
    }

    #[test]
    fn test_parse() {
        assert_eq!("LF".parse::<LineEnding>().unwrap(), LineEnding::Lf);
        assert_eq!("crlf".parse::<LineEnding>().unwrap(), LineEnding::Crlf);
        assert!("cr".parse::<LineEnding>().is_err());
    }
}
