// Line discipline for the C45 protocol.
//
// Every message, in either direction, is a single line terminated by `\n`
// whose first three characters are the frame prefix `C45`. This module owns
// the prefix, the bounds, and the one subtle rule of the protocol: exact
// token matching. A token such as `C45PI` only classifies a line when the
// character after it is end-of-line or whitespace. Without that rule a
// handshake from a player named `PIOTR` (`C45PIOTR\n`) would be swallowed as
// a keep-alive.

/// Three-character prefix carried by every protocol line.
pub const FRAME_PREFIX: &str = "C45";

/// Maximum accepted line length, including the terminator. Lines longer than
/// this are truncated by the transport and then fail classification.
pub const MAX_LINE: usize = 256;

/// Maximum player name length in bytes.
pub const MAX_NAME_LEN: usize = 63;

/// True if `line` matches `token` exactly: the line starts with the token and
/// the next character (if any) is whitespace or a line terminator.
pub fn matches_token(line: &str, token: &str) -> bool {
    match line.strip_prefix(token) {
        Some(rest) => rest.is_empty() || rest.starts_with([' ', '\t', '\r', '\n']),
        None => false,
    }
}

/// If `line` matches `token`, return the argument text after it, with
/// surrounding whitespace and the line terminator removed.
pub fn token_args<'a>(line: &'a str, token: &str) -> Option<&'a str> {
    if matches_token(line, token) {
        Some(line[token.len()..].trim_matches([' ', '\t', '\r', '\n']))
    } else {
        None
    }
}

/// Strip the `C45` prefix and the trailing terminator, returning the payload.
/// Returns `None` when the prefix is absent.
pub fn strip_frame(line: &str) -> Option<&str> {
    line.strip_prefix(FRAME_PREFIX)
        .map(|payload| payload.trim_end_matches(['\r', '\n', ' ', '\t']))
}
