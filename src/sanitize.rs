//! ANSI escape sequence removal for captured build output.

use regex::bytes::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// CSI/OSC sequences (7-bit `ESC` or 8-bit `CSI` introducer), including
/// BEL-terminated title sequences.
static ANSI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[\x1b\x{9b}][\[\]()#;?]*(?:(?:(?:[a-zA-Z\d]*(?:;[a-zA-Z\d]*)*)?\x07)|(?:(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PRZcf-ntqry=><~]))",
    )
    .expect("invalid ANSI pattern")
});

/// Strip terminal escape sequences from `input`.
///
/// Input without escape sequences is returned borrowed and unchanged.
pub fn strip_ansi(input: &[u8]) -> Cow<'_, [u8]> {
    ANSI_PATTERN.replace_all(input, &b""[..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_unchanged() {
        let input = b"Step 1/4 : FROM rust:1.80\n";
        let output = strip_ansi(input);
        assert!(matches!(output, Cow::Borrowed(_)));
        assert_eq!(&*output, &input[..]);
    }

    #[test]
    fn color_codes_are_removed() {
        assert_eq!(&*strip_ansi(b"\x1b[31mRED\x1b[0m"), b"RED");
        assert_eq!(
            &*strip_ansi(b"\x1b[1;32mok\x1b[0m: build \x1b[33mwarn\x1b[0m"),
            b"ok: build warn"
        );
    }

    #[test]
    fn cursor_movement_is_removed() {
        assert_eq!(&*strip_ansi(b"\x1b[2J\x1b[HHello"), b"Hello");
        assert_eq!(&*strip_ansi(b"50%\x1b[1A\x1b[2K100%"), b"50%100%");
    }

    #[test]
    fn window_title_sequence_is_removed() {
        assert_eq!(&*strip_ansi(b"\x1b]0;title\x07done"), b"done");
    }

    #[test]
    fn non_utf8_bytes_pass_through() {
        let input = b"\xff\xfe\x1b[0mtail";
        assert_eq!(&*strip_ansi(input), b"\xff\xfetail");
    }
}
