//! Redis wire framing.
//!
//! The replication channel and the trysync handshake both speak the Redis
//! array protocol: requests are multi-bulk frames, replies are simple
//! strings, errors, or bulk strings. This module owns serialization of
//! argument vectors and the minimal reply parsing the handshake needs —
//! the first token of a reply, lowercased, is all the protocol decision
//! ever looks at.

use nom::{
    branch::alt,
    bytes::complete::{tag, take, take_until},
    character::complete,
    sequence::terminated,
    IResult,
};

/// Serialize an argument vector into a multi-bulk frame.
///
/// `["set", "k", "v"]` becomes `*3\r\n$3\r\nset\r\n$1\r\nk\r\n$1\r\nv\r\n`.
pub fn serialize_command<S: AsRef<str>>(args: &[S]) -> Vec<u8> {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = write!(out, "*{}\r\n", args.len());
    for arg in args {
        let arg = arg.as_ref();
        let _ = write!(out, "${}\r\n{}\r\n", arg.len(), arg);
    }
    out.into_bytes()
}

fn crlf(input: &str) -> IResult<&str, &str> {
    tag("\r\n")(input)
}

fn line(input: &str) -> IResult<&str, &str> {
    terminated(take_until("\r\n"), crlf)(input)
}

fn simple_string(input: &str) -> IResult<&str, &str> {
    let (input, _) = tag("+")(input)?;
    line(input)
}

fn error_reply(input: &str) -> IResult<&str, &str> {
    let (input, _) = tag("-")(input)?;
    line(input)
}

fn bulk_string(input: &str) -> IResult<&str, &str> {
    let (input, _) = tag("$")(input)?;
    let (input, len) = terminated(complete::u32, crlf)(input)?;
    terminated(take(len as usize), crlf)(input)
}

/// Extract the payload of a single reply frame. Falls back to treating
/// the first line as an inline reply.
fn reply_payload(input: &str) -> IResult<&str, &str> {
    alt((simple_string, error_reply, bulk_string, line))(input)
}

/// The first whitespace-delimited token of a reply, lowercased.
///
/// `+OK\r\n`, `$2\r\nOK\r\n`, and inline `OK\r\n` all yield `"ok"`;
/// `-ERR not ready\r\n` yields `"err"`.
pub fn first_reply_token(reply: &str) -> Option<String> {
    let (_, payload) = reply_payload(reply).ok()?;
    payload
        .split_whitespace()
        .next()
        .map(|token| token.to_ascii_lowercase())
}

/// Whether a buffered reply is complete enough to hand to
/// [`first_reply_token`]. Bulk replies span two lines; everything else
/// is one.
pub fn reply_complete(buf: &[u8]) -> bool {
    if !buf.ends_with(b"\r\n") {
        return false;
    }
    if buf.first() == Some(&b'$') {
        buf.windows(2).filter(|w| *w == b"\r\n").count() >= 2
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_set() {
        let frame = serialize_command(&["set", "k", "v"]);
        assert_eq!(frame, b"*3\r\n$3\r\nset\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn test_serialize_del() {
        let frame = serialize_command(&["del", "mykey"]);
        assert_eq!(frame, b"*2\r\n$3\r\ndel\r\n$5\r\nmykey\r\n");
    }

    #[test]
    fn test_serialize_trysync() {
        let frame = serialize_command(&["internaltrysync", "10.0.0.1", "9221", "3", "120"]);
        let text = String::from_utf8(frame).unwrap();
        assert!(text.starts_with("*5\r\n$15\r\ninternaltrysync\r\n"));
        assert!(text.contains("$8\r\n10.0.0.1\r\n"));
        assert!(text.ends_with("$3\r\n120\r\n"));
    }

    #[test]
    fn test_serialize_empty_value() {
        let frame = serialize_command(&["set", "k", ""]);
        assert_eq!(frame, b"*3\r\n$3\r\nset\r\n$1\r\nk\r\n$0\r\n\r\n");
    }

    #[test]
    fn test_token_simple_string() {
        assert_eq!(first_reply_token("+OK\r\n"), Some("ok".to_string()));
        assert_eq!(first_reply_token("+Ok\r\n"), Some("ok".to_string()));
    }

    #[test]
    fn test_token_bulk_string() {
        assert_eq!(first_reply_token("$2\r\nOK\r\n"), Some("ok".to_string()));
        assert_eq!(first_reply_token("$2\r\nok\r\n"), Some("ok".to_string()));
    }

    #[test]
    fn test_token_error_reply() {
        assert_eq!(
            first_reply_token("-ERR not ready\r\n"),
            Some("err".to_string())
        );
    }

    #[test]
    fn test_token_inline() {
        assert_eq!(first_reply_token("ok\r\n"), Some("ok".to_string()));
        assert_eq!(first_reply_token("wait 3 0\r\n"), Some("wait".to_string()));
    }

    #[test]
    fn test_token_multiword_payload() {
        assert_eq!(first_reply_token("+OK synced\r\n"), Some("ok".to_string()));
    }

    #[test]
    fn test_token_empty_payload() {
        assert_eq!(first_reply_token("+\r\n"), None);
    }

    #[test]
    fn test_token_garbage() {
        assert_eq!(first_reply_token(""), None);
        assert_eq!(first_reply_token("no terminator"), None);
    }

    #[test]
    fn test_reply_complete_simple() {
        assert!(reply_complete(b"+OK\r\n"));
        assert!(reply_complete(b"-ERR nope\r\n"));
        assert!(!reply_complete(b"+OK"));
        assert!(!reply_complete(b""));
    }

    #[test]
    fn test_reply_complete_bulk() {
        assert!(!reply_complete(b"$2\r\n"));
        assert!(reply_complete(b"$2\r\nok\r\n"));
    }
}
