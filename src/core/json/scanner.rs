//! Purpose: Token-atomic JSON lexer and a resumable per-value grammar scan.
//! Exports: `TokenKind`, `Token`, `Lexed`, `LexError`, `next_token`, `ScanState`, `Scan`, `mirror`.
//! Role: Grammar layer under the JSON decoder; works on a borrowed byte window only.
//! Invariants: A token is either fully present in the window or not consumed at all.
//! Invariants: `ScanState` owns no borrowed data; it survives window compaction via `shift`.
//! Notes: `//` and `/* */` comments are trivia; trailing commas are accepted and flagged.
use std::fmt;

use crate::core::cancel::CancelToken;
use crate::core::options::CANCEL_POLL_CHARS;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    BeginArray,
    EndArray,
    BeginObject,
    EndObject,
    Colon,
    Comma,
    String,
    Number,
    True,
    False,
    Null,
}

impl TokenKind {
    pub fn starts_value(self) -> bool {
        matches!(
            self,
            TokenKind::BeginArray
                | TokenKind::BeginObject
                | TokenKind::String
                | TokenKind::Number
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// A comment was skipped right before this token.
    pub after_comment: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LexError {
    pub pos: usize,
    pub message: String,
}

impl LexError {
    fn new(pos: usize, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.message, self.pos)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Lexed {
    Token(Token),
    /// The window ends inside a token or trivia; nothing was consumed.
    Incomplete,
    /// Only trivia remains and the input is exhausted.
    End,
    Invalid(LexError),
}

/// Lex the token at or after `pos`.
pub fn next_token(buf: &[u8], pos: usize, eof: bool) -> Lexed {
    let (start, after_comment) = match skip_trivia(buf, pos, eof) {
        Ok(found) => found,
        Err(lexed) => return lexed,
    };
    let Some(&byte) = buf.get(start) else {
        return if eof { Lexed::End } else { Lexed::Incomplete };
    };
    let single = |kind| {
        Lexed::Token(Token {
            kind,
            start,
            end: start + 1,
            after_comment,
        })
    };
    let lexed = match byte {
        b'[' => return single(TokenKind::BeginArray),
        b']' => return single(TokenKind::EndArray),
        b'{' => return single(TokenKind::BeginObject),
        b'}' => return single(TokenKind::EndObject),
        b':' => return single(TokenKind::Colon),
        b',' => return single(TokenKind::Comma),
        b'"' => lex_string(buf, start, eof),
        b'-' | b'0'..=b'9' => lex_number(buf, start, eof),
        b't' => lex_literal(buf, start, eof, b"true", TokenKind::True),
        b'f' => lex_literal(buf, start, eof, b"false", TokenKind::False),
        b'n' => lex_literal(buf, start, eof, b"null", TokenKind::Null),
        other => Err(Some(LexError::new(
            start,
            format!("unexpected character {:?}", char::from(other)),
        ))),
    };
    match lexed {
        Ok((kind, end)) => Lexed::Token(Token {
            kind,
            start,
            end,
            after_comment,
        }),
        Err(None) => Lexed::Incomplete,
        Err(Some(err)) => Lexed::Invalid(err),
    }
}

/// `Err(None)` means more input is needed.
type LexResult = Result<(TokenKind, usize), Option<LexError>>;

fn need_more(eof: bool, pos: usize, message: &str) -> Option<LexError> {
    if eof {
        Some(LexError::new(pos, message))
    } else {
        None
    }
}

fn skip_trivia(buf: &[u8], mut pos: usize, eof: bool) -> Result<(usize, bool), Lexed> {
    let mut comment = false;
    loop {
        match buf.get(pos) {
            Some(b' ' | b'\t' | b'\n' | b'\r') => pos += 1,
            Some(b'/') => {
                comment = true;
                match buf.get(pos + 1) {
                    Some(b'/') => match find_byte(buf, pos + 2, b'\n') {
                        Some(newline) => pos = newline + 1,
                        None if eof => pos = buf.len(),
                        None => return Err(Lexed::Incomplete),
                    },
                    Some(b'*') => match find_block_end(buf, pos + 2) {
                        Some(end) => pos = end,
                        None if eof => {
                            return Err(Lexed::Invalid(LexError::new(pos, "unterminated comment")));
                        }
                        None => return Err(Lexed::Incomplete),
                    },
                    Some(_) => {
                        return Err(Lexed::Invalid(LexError::new(pos, "unexpected character '/'")));
                    }
                    None if eof => {
                        return Err(Lexed::Invalid(LexError::new(pos, "unexpected character '/'")));
                    }
                    None => return Err(Lexed::Incomplete),
                }
            }
            _ => return Ok((pos, comment)),
        }
    }
}

/// End of the whitespace and complete comments at `pos`; stops before a partial comment.
pub fn trivia_end(buf: &[u8], mut pos: usize) -> usize {
    loop {
        match buf.get(pos) {
            Some(b' ' | b'\t' | b'\n' | b'\r') => pos += 1,
            Some(b'/') => {
                let end = match buf.get(pos + 1) {
                    Some(b'/') => find_byte(buf, pos + 2, b'\n').map(|newline| newline + 1),
                    Some(b'*') => find_block_end(buf, pos + 2),
                    _ => None,
                };
                match end {
                    Some(end) => pos = end,
                    None => return pos,
                }
            }
            _ => return pos,
        }
    }
}

fn find_byte(buf: &[u8], from: usize, needle: u8) -> Option<usize> {
    buf.get(from..)?
        .iter()
        .position(|byte| *byte == needle)
        .map(|offset| from + offset)
}

fn find_block_end(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|pair| pair == b"*/")
        .map(|offset| from + offset + 2)
}

fn lex_string(buf: &[u8], start: usize, eof: bool) -> LexResult {
    let mut idx = start + 1;
    loop {
        match buf.get(idx) {
            None => return Err(need_more(eof, start, "unterminated string")),
            Some(b'"') => return Ok((TokenKind::String, idx + 1)),
            Some(b'\\') => match buf.get(idx + 1) {
                None => return Err(need_more(eof, start, "unterminated string")),
                Some(b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't') => idx += 2,
                Some(b'u') => {
                    let digits = buf.get(idx + 2..idx + 6);
                    match digits {
                        Some(hex) if hex.iter().all(u8::is_ascii_hexdigit) => idx += 6,
                        Some(_) => return Err(Some(LexError::new(idx, "invalid unicode escape"))),
                        None => {
                            let tail = &buf[idx + 2..];
                            if !tail.iter().all(u8::is_ascii_hexdigit) {
                                return Err(Some(LexError::new(idx, "invalid unicode escape")));
                            }
                            return Err(need_more(eof, start, "unterminated string"));
                        }
                    }
                }
                Some(_) => return Err(Some(LexError::new(idx, "invalid escape"))),
            },
            Some(byte) if *byte < 0x20 => {
                return Err(Some(LexError::new(idx, "control character in string")));
            }
            Some(_) => idx += 1,
        }
    }
}

fn lex_number(buf: &[u8], start: usize, eof: bool) -> LexResult {
    let at = |idx: usize| buf.get(idx).copied();
    let digits_from = |mut idx: usize| {
        while matches!(at(idx), Some(b'0'..=b'9')) {
            idx += 1;
        }
        idx
    };
    let mut idx = start;
    if at(idx) == Some(b'-') {
        idx += 1;
    }
    match at(idx) {
        None => return Err(need_more(eof, start, "incomplete number")),
        Some(b'0') => idx += 1,
        Some(b'1'..=b'9') => idx = digits_from(idx + 1),
        Some(_) => return Err(Some(LexError::new(idx, "invalid number"))),
    }
    if at(idx) == Some(b'.') {
        let first = idx + 1;
        idx = digits_from(first);
        if idx == first {
            return match at(idx) {
                None => Err(need_more(eof, start, "incomplete number")),
                Some(_) => Err(Some(LexError::new(idx, "invalid number"))),
            };
        }
    }
    if matches!(at(idx), Some(b'e' | b'E')) {
        idx += 1;
        if matches!(at(idx), Some(b'+' | b'-')) {
            idx += 1;
        }
        let first = idx;
        idx = digits_from(first);
        if idx == first {
            return match at(idx) {
                None => Err(need_more(eof, start, "incomplete number")),
                Some(_) => Err(Some(LexError::new(idx, "invalid number"))),
            };
        }
    }
    if at(idx).is_none() && !eof {
        // The number may continue in the next chunk.
        return Err(None);
    }
    Ok((TokenKind::Number, idx))
}

fn lex_literal(buf: &[u8], start: usize, eof: bool, word: &[u8], kind: TokenKind) -> LexResult {
    let available = &buf[start..buf.len().min(start + word.len())];
    if available != &word[..available.len()] {
        return Err(Some(LexError::new(start, "invalid literal")));
    }
    if available.len() < word.len() {
        return Err(need_more(eof, start, "invalid literal"));
    }
    Ok((kind, start + word.len()))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Frame {
    Array,
    Object,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum Expect {
    #[default]
    Value,
    ArrayItem {
        first: bool,
    },
    ObjectKey {
        first: bool,
    },
    Colon,
    CommaOrClose,
}

/// Outcome of advancing a `ScanState`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Scan {
    Complete { end: usize },
    Incomplete,
    Invalid(LexError),
    TooDeep,
    Cancelled,
}

/// Resumable scan of one JSON value, starting at a checkpoint.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanState {
    pos: usize,
    stack: Vec<Frame>,
    expect: Expect,
    started: bool,
    normalized: bool,
    /// Inside a string being skipped in place; carries the pending-escape flag.
    open_string: Option<bool>,
}

impl ScanState {
    pub fn new(start: usize) -> Self {
        Self {
            pos: start,
            ..Self::default()
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Comments or trailing commas occurred inside the value.
    pub fn normalized(&self) -> bool {
        self.normalized
    }

    /// Follow the window moving `by` bytes towards its front.
    pub fn shift(&mut self, by: usize) {
        self.pos = self.pos.saturating_sub(by);
    }

    /// Start skipping the string at the checkpoint without ever holding it
    /// whole; later `advance` calls consume its body chunk by chunk. Only
    /// meaningful for values that are being discarded. Returns false when the
    /// checkpoint is not at a string.
    pub fn open_oversized_string(&mut self, buf: &[u8]) -> bool {
        if self.open_string.is_some() {
            return false;
        }
        let mut pos = self.pos;
        while matches!(buf.get(pos), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            pos += 1;
        }
        if buf.get(pos) != Some(&b'"') {
            return false;
        }
        self.started = true;
        self.pos = pos + 1;
        self.open_string = Some(false);
        true
    }

    pub fn advance(
        &mut self,
        buf: &[u8],
        eof: bool,
        depth_limit: Option<usize>,
        cancel: Option<&CancelToken>,
    ) -> Scan {
        if let Some(escaped) = self.open_string {
            match skip_string_body(buf, self.pos, escaped) {
                Ok(end) => {
                    self.open_string = None;
                    let token = Token {
                        kind: TokenKind::String,
                        start: end - 1,
                        end,
                        after_comment: false,
                    };
                    if let Some(done) = self.apply(token, depth_limit) {
                        return done;
                    }
                }
                Err(_) if eof => {
                    return Scan::Invalid(LexError::new(buf.len(), "unterminated string"));
                }
                Err(escaped) => {
                    self.open_string = Some(escaped);
                    self.pos = buf.len();
                    return Scan::Incomplete;
                }
            }
        }

        let mut tokens = 0usize;
        loop {
            tokens += 1;
            if tokens % CANCEL_POLL_CHARS == 0 && cancel.is_some_and(CancelToken::is_cancelled) {
                return Scan::Cancelled;
            }
            let token = match next_token(buf, self.pos, eof) {
                Lexed::Token(token) => token,
                Lexed::Incomplete => return Scan::Incomplete,
                Lexed::End => {
                    return Scan::Invalid(LexError::new(buf.len(), "unexpected end of input"));
                }
                Lexed::Invalid(err) => return Scan::Invalid(err),
            };
            if token.after_comment && self.started {
                self.normalized = true;
            }
            self.started = true;
            if let Some(done) = self.apply(token, depth_limit) {
                return done;
            }
        }
    }

    /// Feed one token to the grammar; `Some` ends this `advance` call.
    fn apply(&mut self, token: Token, depth_limit: Option<usize>) -> Option<Scan> {
        let mut opened = false;
        let mut closed = false;
        match (self.expect, token.kind) {
            (Expect::Value | Expect::ArrayItem { .. }, kind) if kind.starts_value() => match kind {
                TokenKind::BeginArray => {
                    self.stack.push(Frame::Array);
                    self.expect = Expect::ArrayItem { first: true };
                    opened = true;
                }
                TokenKind::BeginObject => {
                    self.stack.push(Frame::Object);
                    self.expect = Expect::ObjectKey { first: true };
                    opened = true;
                }
                _ => closed = true,
            },
            (Expect::ArrayItem { first }, TokenKind::EndArray) => {
                self.normalized |= !first;
                self.stack.pop();
                closed = true;
            }
            (Expect::ObjectKey { .. }, TokenKind::String) => self.expect = Expect::Colon,
            (Expect::ObjectKey { first }, TokenKind::EndObject) => {
                self.normalized |= !first;
                self.stack.pop();
                closed = true;
            }
            (Expect::Colon, TokenKind::Colon) => self.expect = Expect::Value,
            (Expect::CommaOrClose, TokenKind::Comma) => {
                self.expect = match self.stack.last() {
                    Some(Frame::Object) => Expect::ObjectKey { first: false },
                    _ => Expect::ArrayItem { first: false },
                };
            }
            (Expect::CommaOrClose, TokenKind::EndArray)
                if self.stack.last() == Some(&Frame::Array) =>
            {
                self.stack.pop();
                closed = true;
            }
            (Expect::CommaOrClose, TokenKind::EndObject)
                if self.stack.last() == Some(&Frame::Object) =>
            {
                self.stack.pop();
                closed = true;
            }
            _ => return Some(Scan::Invalid(LexError::new(token.start, "unexpected token"))),
        }
        self.pos = token.end;

        if opened && depth_limit.is_some_and(|limit| self.stack.len() > limit) {
            return Some(Scan::TooDeep);
        }
        if closed {
            if self.stack.is_empty() {
                return Some(Scan::Complete { end: token.end });
            }
            self.expect = Expect::CommaOrClose;
        }
        None
    }
}

/// Find the closing quote of a string body starting at `pos`; `Err` carries
/// the escape flag to resume with once more input arrives.
fn skip_string_body(buf: &[u8], pos: usize, mut escaped: bool) -> Result<usize, bool> {
    for (offset, byte) in buf.get(pos..).unwrap_or_default().iter().enumerate() {
        if escaped {
            escaped = false;
        } else if *byte == b'\\' {
            escaped = true;
        } else if *byte == b'"' {
            return Ok(pos + offset + 1);
        }
    }
    Err(escaped)
}

/// Re-emit a complete value without comments or trailing commas.
pub fn mirror(bytes: &[u8]) -> Result<Vec<u8>, LexError> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    loop {
        match next_token(bytes, pos, true) {
            Lexed::End => return Ok(out),
            Lexed::Token(token) => {
                if matches!(token.kind, TokenKind::EndArray | TokenKind::EndObject)
                    && out.last() == Some(&b',')
                {
                    out.pop();
                }
                out.extend_from_slice(&bytes[token.start..token.end]);
                pos = token.end;
            }
            Lexed::Invalid(err) => return Err(err),
            Lexed::Incomplete => return Err(LexError::new(pos, "unexpected end of input")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Lexed, Scan, ScanState, TokenKind, mirror, next_token, trivia_end};
    use crate::core::cancel::CancelToken;
    use crate::core::options::CANCEL_POLL_CHARS;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let bytes = input.as_bytes();
        let mut pos = 0;
        let mut out = Vec::new();
        while let Lexed::Token(token) = next_token(bytes, pos, true) {
            out.push(token.kind);
            pos = token.end;
        }
        out
    }

    #[test]
    fn lexes_all_token_kinds_and_skips_comments() {
        assert_eq!(
            kinds("[ {\"a\" : -1.5e3} , true, false, null // tail\n /* x */ ]"),
            vec![
                TokenKind::BeginArray,
                TokenKind::BeginObject,
                TokenKind::String,
                TokenKind::Colon,
                TokenKind::Number,
                TokenKind::EndObject,
                TokenKind::Comma,
                TokenKind::True,
                TokenKind::Comma,
                TokenKind::False,
                TokenKind::Comma,
                TokenKind::Null,
                TokenKind::EndArray,
            ]
        );
    }

    #[test]
    fn partial_tokens_are_incomplete_until_eof() {
        for partial in ["\"abc", "\"a\\", "\"\\u12", "12", "-", "1.", "1e", "tr", "/", "/* x"] {
            assert_eq!(
                next_token(partial.as_bytes(), 0, false),
                Lexed::Incomplete,
                "{partial}"
            );
        }
        assert!(matches!(next_token(b"12", 0, true), Lexed::Token(_)));
        assert!(matches!(next_token(b"tr", 0, true), Lexed::Invalid(_)));
        assert_eq!(next_token(b"  // c", 0, true), Lexed::End);
    }

    #[test]
    fn rejects_malformed_tokens() {
        for bad in ["01x", "\"a\\q\"", "trux", "+1", "\"\u{1}\""] {
            let lexed = next_token(bad.as_bytes(), 0, true);
            let invalid = matches!(lexed, Lexed::Invalid(_))
                || matches!(lexed, Lexed::Token(token) if token.end < bad.len());
            assert!(invalid, "{bad}");
        }
    }

    #[test]
    fn scan_resumes_across_windows() {
        let full = br#"{"a":[1,2,{"b":"x"}],"c":null} tail"#;
        let mut state = ScanState::new(0);
        let mut end = None;
        for cut in 1..=full.len() {
            match state.advance(&full[..cut], false, None, None) {
                Scan::Complete { end: found } => {
                    end = Some(found);
                    break;
                }
                Scan::Incomplete => continue,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(end, Some(30));
        assert!(!state.normalized());
    }

    #[test]
    fn scan_flags_trailing_commas_and_inner_comments() {
        let mut state = ScanState::new(0);
        assert_eq!(
            state.advance(b"[1,2,]", true, None, None),
            Scan::Complete { end: 6 }
        );
        assert!(state.normalized());

        let mut state = ScanState::new(0);
        assert_eq!(
            state.advance(b"{\"a\":1 /* c */}", true, None, None),
            Scan::Complete { end: 15 }
        );
        assert!(state.normalized());
    }

    #[test]
    fn cancellation_is_polled_while_scanning_a_large_value() {
        let input = format!("[{}1]", "1,".repeat(CANCEL_POLL_CHARS));
        let bytes = input.as_bytes();
        let token = CancelToken::new();
        token.cancel();
        let mut state = ScanState::new(0);
        assert_eq!(state.advance(bytes, true, None, Some(&token)), Scan::Cancelled);
        assert!(state.pos() < bytes.len());
        assert_eq!(
            state.advance(bytes, true, None, None),
            Scan::Complete { end: bytes.len() }
        );
    }

    #[test]
    fn trivia_end_stops_before_partial_comments() {
        assert_eq!(trivia_end(b"  \n // done\n 1", 0), 13);
        assert_eq!(trivia_end(b" /* open", 0), 1);
        assert_eq!(trivia_end(b"\t// open", 0), 1);
        assert_eq!(trivia_end(b"x", 0), 0);
    }

    #[test]
    fn scan_rejects_mismatched_closers() {
        let mut state = ScanState::new(0);
        assert!(matches!(state.advance(b"[1}", true, None, None), Scan::Invalid(_)));
        let mut state = ScanState::new(0);
        assert!(matches!(state.advance(b"{1:2}", true, None, None), Scan::Invalid(_)));
    }

    #[test]
    fn depth_limit_trips_and_scan_can_continue() {
        let input = b"[[[1]]]";
        let mut state = ScanState::new(0);
        assert_eq!(state.advance(input, true, Some(2), None), Scan::TooDeep);
        assert_eq!(state.depth(), 3);
        assert_eq!(state.advance(input, true, None, None), Scan::Complete { end: 7 });
    }

    #[test]
    fn oversized_strings_are_skipped_in_place() {
        let mut state = ScanState::new(0);
        assert_eq!(state.advance(b"[\"abc", false, None, None), Scan::Incomplete);
        assert!(state.open_oversized_string(b"[\"abc"));
        assert_eq!(state.advance(b"[\"abc", false, None, None), Scan::Incomplete);
        assert_eq!(state.pos(), 5);
        state.shift(5);
        assert_eq!(state.advance(b"d\\", false, None, None), Scan::Incomplete);
        state.shift(2);
        assert_eq!(
            state.advance(b"\"e\", 1]", true, None, None),
            Scan::Complete { end: 7 }
        );
    }

    #[test]
    fn mirror_strips_comments_and_trailing_commas() {
        let out = mirror(b"{ \"a\" : [1, 2, ] , // c\n \"b\": {\"x\":1,}, }").expect("mirror");
        assert_eq!(out, br#"{"a":[1,2],"b":{"x":1}}"#.to_vec());
    }
}
