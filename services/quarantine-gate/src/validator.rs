//! Content policy for image layers.
//!
//! A layer conforms when it looks like a Bicep source file. The check is a
//! heuristic over the start of the text only:
//!
//! - a declaration keyword (`metadata`, `targetScope`, `resource`, `module`,
//!   `output`) at the very start of the content, after optional whitespace,
//!   passes immediately;
//! - otherwise at least two lines starting with `param` or `var` within the
//!   first [`WEAK_SIGNAL_CHARS`] characters pass;
//! - anything else, including empty content, fails.
//!
//! The strong check is anchored at the start of the whole content, not at the
//! start of each line: a declaration keyword on a later line does not count.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Number of characters the weak check looks at.
pub const WEAK_SIGNAL_CHARS: usize = 1024;

/// Number of blob bytes read per layer, enough for [`WEAK_SIGNAL_CHARS`] UTF-8 characters.
pub const PREFIX_BYTES: usize = 4 * WEAK_SIGNAL_CHARS;

static STRONG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(metadata|targetScope|resource|module|output)\s").expect("valid pattern")
});

static WEAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(param|var)\s").expect("valid pattern"));

/// Whether a layer conforms to the content policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// The layer conforms.
    Pass,
    /// The layer does not conform.
    Fail,
}

impl Verdict {
    /// True for [`Verdict::Pass`].
    pub fn is_pass(self) -> bool {
        self == Verdict::Pass
    }
}

/// Classify layer content.
pub fn validate(content: &str) -> Verdict {
    if STRONG.is_match(content) {
        return Verdict::Pass;
    }

    let head = match content.char_indices().nth(WEAK_SIGNAL_CHARS) {
        Some((end, _)) => &content[..end],
        None => content,
    };

    if WEAK.find_iter(head).take(2).count() >= 2 {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}

/// A layer prefix that is not UTF-8 text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("layer content is not UTF-8 text (invalid byte at offset {valid_up_to})")]
pub struct ValidatorInputError {
    /// Length of the valid UTF-8 run before the invalid byte.
    pub valid_up_to: usize,
}

/// Decode a blob prefix read from the registry with a read limit of `limit` bytes.
///
/// A prefix that filled the limit may end inside a multi-byte character, that
/// character is dropped. A shorter prefix is the whole blob, so an incomplete
/// trailing character is invalid like any other invalid UTF-8.
pub fn decode_prefix(bytes: &[u8], limit: usize) -> Result<&str, ValidatorInputError> {
    let truncated = bytes.len() >= limit;

    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) if truncated && err.error_len().is_none() => {
            std::str::from_utf8(&bytes[..err.valid_up_to()]).map_err(|err| ValidatorInputError {
                valid_up_to: err.valid_up_to(),
            })
        }
        Err(err) => Err(ValidatorInputError {
            valid_up_to: err.valid_up_to(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_signal_at_start() {
        assert_eq!(validate("resource foo 'Type@v1' = {}"), Verdict::Pass);
        assert_eq!(validate("targetScope = 'subscription'"), Verdict::Pass);
        assert_eq!(validate("\n\n  metadata description = 'x'"), Verdict::Pass);
        assert_eq!(validate("output id string = foo.id"), Verdict::Pass);
    }

    #[test]
    fn strong_signal_needs_trailing_whitespace() {
        assert_eq!(validate("resources"), Verdict::Fail);
        assert_eq!(validate("module"), Verdict::Fail);
    }

    #[test]
    fn strong_signal_only_at_offset_zero() {
        let content = indoc::indoc! {"
            // storage account
            resource sa 'Microsoft.Storage/storageAccounts@2023-01-01' = {}
        "};
        assert_eq!(validate(content), Verdict::Fail);
    }

    #[test]
    fn strong_signal_ignores_length() {
        let content = format!("module m './m.bicep' = {{}}\n{}", "x".repeat(1 << 20));
        assert_eq!(validate(&content), Verdict::Pass);
    }

    #[test]
    fn weak_signal() {
        assert_eq!(validate("param x string"), Verdict::Fail);
        assert_eq!(validate("var x = 1\nvar y = 2"), Verdict::Pass);
        assert_eq!(validate("param location string\n  var name = 'a'"), Verdict::Pass);
        assert_eq!(validate("// header\nparam a int\nparam b int\n"), Verdict::Pass);
    }

    #[test]
    fn weak_signal_is_bounded() {
        let content = format!("// {}\nparam a int\nparam b int\n", "x".repeat(WEAK_SIGNAL_CHARS));
        assert_eq!(validate(&content), Verdict::Fail);

        let content = format!("param a int\n// {}\nparam b int\n", "é".repeat(WEAK_SIGNAL_CHARS));
        assert_eq!(validate(&content), Verdict::Fail);
    }

    #[test]
    fn weak_keyword_mid_line() {
        assert_eq!(validate("x = 1 var a = 1\ny = 2 var b = 2"), Verdict::Fail);
    }

    #[test]
    fn empty_content() {
        assert_eq!(validate(""), Verdict::Fail);
        assert_eq!(validate("   \n\t"), Verdict::Fail);
    }

    #[test]
    fn binary_content() {
        assert_eq!(validate("\u{1f}\u{8b}\u{8}\u{0}"), Verdict::Fail);
    }

    #[test]
    fn decode_truncated_character() {
        let bytes = "ab€".as_bytes();
        assert_eq!(decode_prefix(&bytes[..3], 3).unwrap(), "ab");
        assert_eq!(decode_prefix(bytes, 3).unwrap(), "ab€");
        assert_eq!(decode_prefix(bytes, PREFIX_BYTES).unwrap(), "ab€");
    }

    #[test]
    fn decode_incomplete_character_at_end_of_blob() {
        let bytes = "ab€".as_bytes();
        let err = decode_prefix(&bytes[..3], PREFIX_BYTES).unwrap_err();
        assert_eq!(err.valid_up_to, 2);
    }

    #[test]
    fn decode_invalid_bytes() {
        let err = decode_prefix(&[b'a', 0xff, b'b'], PREFIX_BYTES).unwrap_err();
        assert_eq!(err.valid_up_to, 1);
    }
}
