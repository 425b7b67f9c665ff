//! HTTP request parsing
//!
//! `RequestParser` is an incremental finite-state machine over the request
//! line and header section. Bytes may be fed in arbitrarily sized pieces; a
//! token split across two calls is handled the same as one delivered whole.
//!
//! The parser deviates from RFC7230 in the following ways:
//!
//! - header line folding (obs-fold) is rejected
//! - the HTTP version in the request line is optional and not validated
//! - the request target is only checked for allowed characters
//!
//! Bytes are mapped 1:1 to ISO-8859-1 code points; no multi-byte decoding
//! happens at this layer.

use super::Headers;

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    StartMethod,
    Method,
    RequestPath,
    QueryString,
    HttpVersion,
    RequestLineCR,
    FieldNameStart,
    FieldName,
    FieldValueLeadingSpace,
    FieldValue,
    FieldCR,
    FinalCR,
    Error,
    Finished,
}

impl State {
    /// Error and Finished are absorbing
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Error | State::Finished)
    }
}

/// Byte classes the transition function is defined over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// Tab, obs-text (0x80-0xFF) and the printable delimiters that are only
    /// legal inside a field value: `"` `<` `>` `\` `{` `}`
    FieldText,
    /// Valid in a token but not in a request target: `^` `` ` `` `|`
    Token,
    /// Valid in a request target but not in a token
    Url,
    /// Valid in both tokens and request targets
    Common,
    Colon,
    Space,
    Question,
    CR,
    LF,
    /// Every other control byte, including NUL and DEL
    Control,
}

const fn build_symbol_table() -> [Symbol; 256] {
    let mut table = [Symbol::FieldText; 256];

    let mut i = 0;
    while i < 32 {
        table[i] = Symbol::Control;
        i += 1;
    }
    table[0x7f] = Symbol::Control;
    table[b'\t' as usize] = Symbol::FieldText;

    let token_only = b"^`|";
    let mut i = 0;
    while i < token_only.len() {
        table[token_only[i] as usize] = Symbol::Token;
        i += 1;
    }

    let url_only = b"(),/;=@[]";
    let mut i = 0;
    while i < url_only.len() {
        table[url_only[i] as usize] = Symbol::Url;
        i += 1;
    }

    let common = b"!#$%&'*+-.0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz~";
    let mut i = 0;
    while i < common.len() {
        table[common[i] as usize] = Symbol::Common;
        i += 1;
    }

    table[b':' as usize] = Symbol::Colon;
    table[b' ' as usize] = Symbol::Space;
    table[b'?' as usize] = Symbol::Question;
    table[b'\r' as usize] = Symbol::CR;
    table[b'\n' as usize] = Symbol::LF;
    table
}

static SYMBOLS: [Symbol; 256] = build_symbol_table();

/// Classify a byte
pub fn classify(b: u8) -> Symbol {
    SYMBOLS[b as usize]
}

/// Work performed when a transition is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Push,
    EndMethod,
    EndPath,
    EndQuery,
    EndVersion,
    EndFieldName,
    EndFieldValue,
    Halt,
}

/// The transition function: `(state, symbol) -> (action, next state)`
///
/// Every pair not listed leads to `Error`. Terminal states have no outgoing
/// transitions.
pub fn transition(state: State, symbol: Symbol) -> (Action, State) {
    use Action as A;
    use State as S;
    use Symbol::*;

    match (state, symbol) {
        (S::StartMethod | S::Method, Token | Common) => (A::Push, S::Method),
        (S::Method, Space) => (A::EndMethod, S::RequestPath),

        (S::RequestPath, Url | Common | Colon) => (A::Push, S::RequestPath),
        (S::RequestPath, Space) => (A::EndPath, S::HttpVersion),
        (S::RequestPath, Question) => (A::EndPath, S::QueryString),
        (S::RequestPath, CR) => (A::EndPath, S::RequestLineCR),

        (S::QueryString, Url | Common | Colon | Question) => (A::Push, S::QueryString),
        (S::QueryString, Space) => (A::EndQuery, S::HttpVersion),
        (S::QueryString, CR) => (A::EndQuery, S::RequestLineCR),

        (S::HttpVersion, Url | Common | Colon) => (A::Push, S::HttpVersion),
        (S::HttpVersion, CR) => (A::EndVersion, S::RequestLineCR),

        (S::RequestLineCR, LF) => (A::None, S::FieldNameStart),

        (S::FieldNameStart | S::FieldName, Token | Common) => (A::Push, S::FieldName),
        (S::FieldNameStart, CR) => (A::None, S::FinalCR),
        (S::FieldName, Colon) => (A::EndFieldName, S::FieldValueLeadingSpace),

        (S::FieldValueLeadingSpace, Space) => (A::None, S::FieldValueLeadingSpace),
        (S::FieldValueLeadingSpace | S::FieldValue, FieldText | Token | Url | Common | Colon | Question) => {
            (A::Push, S::FieldValue)
        }
        (S::FieldValue, Space) => (A::Push, S::FieldValue),
        (S::FieldValueLeadingSpace | S::FieldValue, CR) => (A::EndFieldValue, S::FieldCR),

        (S::FieldCR, LF) => (A::None, S::FieldNameStart),
        (S::FinalCR, LF) => (A::Halt, S::Finished),

        (S::Error | S::Finished, _) => panic!("no transitions out of terminal state {:?}", state),
        _ => (A::Halt, S::Error),
    }
}

/// The request line and header section of a fully parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub version: Option<String>,
    pub headers: Headers,
}

/// Incremental HTTP request-line and header parser
///
/// Usage: feed data to [`parse`](RequestParser::parse) until
/// [`is_error`](RequestParser::is_error) or
/// [`is_finished`](RequestParser::is_finished) is true, then take the result
/// with [`into_head`](RequestParser::into_head) or call
/// [`reset`](RequestParser::reset) before the next request.
#[derive(Debug, Clone)]
pub struct RequestParser {
    state: State,
    buffer: String,
    method: Option<String>,
    path: Option<String>,
    query: Option<String>,
    version: Option<String>,
    field_name: Option<String>,
    headers: Headers,
}

impl RequestParser {
    /// Create a new request parser
    pub fn new() -> Self {
        RequestParser {
            state: State::StartMethod,
            buffer: String::new(),
            method: None,
            path: None,
            query: None,
            version: None,
            field_name: None,
            headers: Headers::new(),
        }
    }

    /// Return the parser to its initial state
    pub fn reset(&mut self) {
        *self = RequestParser::new();
    }

    /// Feed bytes to the parser
    ///
    /// Returns the number of bytes consumed. This is all of `data` unless the
    /// parser reached `Error` or `Finished`, in which case it stops right
    /// after the byte that caused the transition; anything after it belongs
    /// to the request body or the next pipelined request.
    ///
    /// # Panics
    ///
    /// Panics if the parser is already in a terminal state.
    pub fn parse(&mut self, data: &[u8]) -> usize {
        assert!(
            !self.state.is_terminal(),
            "RequestParser reused in terminal state {:?}; reset it first",
            self.state
        );

        for (i, &b) in data.iter().enumerate() {
            let (action, next) = transition(self.state, classify(b));
            self.state = next;

            match action {
                Action::None => {}
                Action::Push => self.buffer.push(char::from(b)),
                Action::EndMethod => self.method = Some(self.take_buffer()),
                Action::EndPath => self.path = Some(self.take_buffer()),
                Action::EndQuery => self.query = Some(self.take_buffer()),
                Action::EndVersion => self.version = Some(self.take_buffer()),
                Action::EndFieldName => self.field_name = Some(self.take_buffer()),
                Action::EndFieldValue => {
                    let value = self.take_buffer();
                    if let Some(name) = self.field_name.take() {
                        self.headers.merge(&name, &value);
                    }
                }
                Action::Halt => return i + 1,
            }
        }
        data.len()
    }

    fn take_buffer(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    /// The input was rejected
    pub fn is_error(&self) -> bool {
        self.state == State::Error
    }

    /// A complete request head has been parsed
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Headers parsed so far
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Consume a finished parser, returning the parsed request head
    ///
    /// Returns `None` unless the parser is in the `Finished` state.
    pub fn into_head(self) -> Option<RequestHead> {
        if !self.is_finished() {
            return None;
        }
        Some(RequestHead {
            method: self.method?,
            path: self.path?,
            query: self.query,
            version: self.version,
            headers: self.headers,
        })
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}
