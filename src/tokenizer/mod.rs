//=====================================================
// File: tokenizer/mod.rs
//=====================================================
// Goal: Teal lexer
// Objective: Turn source text into a lazy stream of located tokens, keeping
//            line breaks as structural tokens for the terminator pass
//=====================================================

pub mod normalize;

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::diagnostic::Diagnostic;

pub use normalize::Normalizer;

/// All token types produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Structure
    Attribute,
    Term,
    /// Line break run. Consumed by the normalizer, never seen by the parser.
    Nl,

    // Names
    Symbol,
    Id,

    // Keywords
    Fn,
    Lambda,
    If,
    Elif,
    Else,
    Async,
    Await,
    True,
    False,
    Null,

    // Values
    Number,
    String,

    // Operators
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Eq,
    Set,
    Gt,
    Lt,

    // Punctuation
    LParen,
    RParen,
    Comma,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
}

impl TokenKind {
    /// Tokens after which a `+`/`-` is a binary operator rather than a sign.
    pub fn ends_expression(self) -> bool {
        matches!(
            self,
            TokenKind::Id
                | TokenKind::Number
                | TokenKind::String
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
        )
    }

    /// Tokens that can begin an expression.
    pub fn starts_expression(self) -> bool {
        matches!(
            self,
            TokenKind::Attribute
                | TokenKind::Symbol
                | TokenKind::Id
                | TokenKind::Fn
                | TokenKind::Lambda
                | TokenKind::If
                | TokenKind::Async
                | TokenKind::Await
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
                | TokenKind::Number
                | TokenKind::String
                | TokenKind::LParen
                | TokenKind::LBrace
                | TokenKind::LBracket
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Attribute => "attribute",
            TokenKind::Term => "terminator",
            TokenKind::Nl => "line break",
            TokenKind::Symbol => "symbol",
            TokenKind::Id => "identifier",
            TokenKind::Fn => "`fn`",
            TokenKind::Lambda => "`lambda`",
            TokenKind::If => "`if`",
            TokenKind::Elif => "`elif`",
            TokenKind::Else => "`else`",
            TokenKind::Async => "`async`",
            TokenKind::Await => "`await`",
            TokenKind::True => "`true`",
            TokenKind::False => "`false`",
            TokenKind::Null => "`null`",
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::Add => "`+`",
            TokenKind::Sub => "`-`",
            TokenKind::Mul => "`*`",
            TokenKind::Div => "`/`",
            TokenKind::And => "`&&`",
            TokenKind::Or => "`||`",
            TokenKind::Eq => "`==`",
            TokenKind::Set => "`=`",
            TokenKind::Gt => "`>`",
            TokenKind::Lt => "`<`",
            TokenKind::LParen => "`(`",
            TokenKind::RParen => "`)`",
            TokenKind::Comma => "`,`",
            TokenKind::LBrace => "`{`",
            TokenKind::RBrace => "`}`",
            TokenKind::LBracket => "`[`",
            TokenKind::RBracket => "`]`",
            TokenKind::Colon => "`:`",
        };
        f.write_str(text)
    }
}

static KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    HashMap::from([
        ("fn", TokenKind::Fn),
        ("lambda", TokenKind::Lambda),
        ("if", TokenKind::If),
        ("elif", TokenKind::Elif),
        ("else", TokenKind::Else),
        ("async", TokenKind::Async),
        ("await", TokenKind::Await),
        ("true", TokenKind::True),
        ("false", TokenKind::False),
        ("null", TokenKind::Null),
    ])
});

/// A token with its raw text and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text. Attributes hold only the text between the brackets.
    pub value: String,
    /// 1-based line of the first character.
    pub line: usize,
    /// Byte offset of the first character.
    pub index: usize,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>, line: usize, index: usize) -> Self {
        Self {
            kind,
            value: value.into(),
            line,
            index,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Nl | TokenKind::Term => write!(f, "{}", self.kind),
            _ => write!(f, "{} `{}`", self.kind, self.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{diagnostic}")]
pub struct LexError {
    pub character: char,
    pub index: usize,
    pub diagnostic: Diagnostic,
}

/// Lazy lexer over one source unit. Stops after the first error.
pub struct Lexer<'a> {
    filename: &'a str,
    source: &'a str,
    pos: usize,
    line: usize,
    prev_ends_expression: bool,
    failed: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(filename: &'a str, source: &'a str) -> Self {
        Self {
            filename,
            source,
            pos: 0,
            line: 1,
            prev_ends_expression: false,
            failed: false,
        }
    }

    pub fn filename(&self) -> &'a str {
        self.filename
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.source[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn error(&mut self, character: char, index: usize, message: String) -> LexError {
        self.failed = true;
        LexError {
            character,
            index,
            diagnostic: Diagnostic::at(self.filename, self.source, index, message),
        }
    }

    fn take_while(&mut self, accept: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !accept(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.source[start..self.pos]
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            self.take_while(|c| c == ' ' || c == '\t' || c == '\r');
            let rest = self.rest();
            if rest.starts_with("//") {
                self.take_while(|c| c != '\n');
            } else if rest.starts_with("/*") {
                let start = self.pos;
                match rest[2..].find("*/") {
                    Some(end) => {
                        let comment = &rest[..end + 4];
                        self.line += comment.matches('\n').count();
                        self.pos += comment.len();
                    }
                    None => {
                        return Err(self.error('/', start, "unterminated block comment".into()));
                    }
                }
            } else {
                return Ok(());
            }
        }
    }

    fn lex_token(&mut self) -> Option<Result<Token, LexError>> {
        if let Err(err) = self.skip_trivia() {
            return Some(Err(err));
        }
        let start = self.pos;
        let line = self.line;
        let c = self.peek()?;
        let token = |kind, value: &str| Token::new(kind, value, line, start);

        let result = match c {
            '#' if self.peek_second() == Some('[') => self.lex_attribute(start),
            '\n' => {
                let run = self.take_while(|c| c == '\n');
                self.line += run.len();
                Ok(token(TokenKind::Nl, run))
            }
            'a'..='z' | '_' => {
                let word = self.take_while(|c| c.is_ascii_alphanumeric() || "_?.".contains(c));
                let kind = KEYWORDS.get(word).copied().unwrap_or(TokenKind::Id);
                Ok(token(kind, word))
            }
            ':' if matches!(self.peek_second(), Some('a'..='z')) => {
                self.pos += 1;
                self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
                Ok(token(TokenKind::Symbol, &self.source[start..self.pos]))
            }
            '0'..='9' => Ok(token(TokenKind::Number, self.lex_number())),
            '+' | '-'
                if !self.prev_ends_expression
                    && matches!(self.peek_second(), Some('0'..='9')) =>
            {
                self.pos += 1;
                self.lex_number();
                Ok(token(TokenKind::Number, &self.source[start..self.pos]))
            }
            '"' => self.lex_string(start),
            ';' => Ok(token(TokenKind::Term, self.take_while(|c| c == ';'))),
            _ => match self.lex_operator() {
                Some((kind, len)) => {
                    self.pos += len;
                    Ok(token(kind, &self.source[start..self.pos]))
                }
                None => Err(self.error(c, start, format!("Illegal character `{c}`"))),
            },
        };
        if let Ok(token) = &result {
            self.prev_ends_expression = token.kind.ends_expression();
        }
        Some(result)
    }

    fn lex_number(&mut self) -> &'a str {
        let start = self.pos;
        self.take_while(|c| c.is_ascii_digit());
        self.take_while(|c| c.is_ascii_digit() || c == '.');
        &self.source[start..self.pos]
    }

    fn lex_attribute(&mut self, start: usize) -> Result<Token, LexError> {
        let line = self.line;
        let text = self.take_while(|c| c != '\n').trim_end_matches(&['\r', ' ', '\t'][..]);
        if !text.ends_with(']') {
            return Err(self.error('#', start, "attribute must end with `]`".into()));
        }
        if self.peek() == Some('\n') {
            self.pos += 1;
            self.line += 1;
        }
        let tag = &text[2..text.len() - 1];
        Ok(Token::new(TokenKind::Attribute, tag, line, start))
    }

    fn lex_string(&mut self, start: usize) -> Result<Token, LexError> {
        let line = self.line;
        self.pos += 1;
        let mut escaped = false;
        while let Some(c) = self.peek() {
            self.pos += c.len_utf8();
            match c {
                '\n' => self.line += 1,
                '\\' if !escaped => {
                    escaped = true;
                    continue;
                }
                '"' if !escaped => {
                    return Ok(Token::new(
                        TokenKind::String,
                        &self.source[start..self.pos],
                        line,
                        start,
                    ));
                }
                _ => {}
            }
            escaped = false;
        }
        Err(self.error('"', start, "unterminated string literal".into()))
    }

    fn lex_operator(&self) -> Option<(TokenKind, usize)> {
        let rest = self.rest();
        let two = [
            ("&&", TokenKind::And),
            ("||", TokenKind::Or),
            ("==", TokenKind::Eq),
        ];
        if let Some((_, kind)) = two.iter().find(|(text, _)| rest.starts_with(text)) {
            return Some((*kind, 2));
        }
        let kind = match rest.chars().next()? {
            '+' => TokenKind::Add,
            '-' => TokenKind::Sub,
            '*' => TokenKind::Mul,
            '/' => TokenKind::Div,
            '=' => TokenKind::Set,
            '>' => TokenKind::Gt,
            '<' => TokenKind::Lt,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ':' => TokenKind::Colon,
            _ => return None,
        };
        Some((kind, 1))
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        self.lex_token()
    }
}

/// Raw token stream, line breaks included.
pub fn tokenize(filename: &str, source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(filename, source).collect()
}

/// Token stream as the parser sees it: line breaks replaced by terminators.
pub fn tokenize_normalized(filename: &str, source: &str) -> Result<Vec<Token>, LexError> {
    Normalizer::new(Lexer::new(filename, source)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize("test.tl", source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        use TokenKind::*;
        assert_eq!(
            kinds("fn lambda if elif else async await true false null foo? a.b _x"),
            vec![Fn, Lambda, If, Elif, Else, Async, Await, True, False, Null, Id, Id, Id]
        );
    }

    #[test]
    fn sign_binds_only_where_an_operand_is_expected() {
        use TokenKind::*;
        assert_eq!(kinds("1-2"), vec![Number, Sub, Number]);
        assert_eq!(kinds("x - -2"), vec![Id, Sub, Number]);
        assert_eq!(kinds("f(-1.5)"), vec![Id, LParen, Number, RParen]);
        let tokens = tokenize("t.tl", "(+3)").unwrap();
        assert_eq!(tokens[1].value, "+3");
    }

    #[test]
    fn symbols_and_colons() {
        use TokenKind::*;
        assert_eq!(kinds(":name"), vec![Symbol]);
        assert_eq!(kinds("{1: 2}"), vec![LBrace, Number, Colon, Number, RBrace]);
    }

    #[test]
    fn sign_after_symbol_starts_a_number() {
        use TokenKind::*;
        let tokens = tokenize("t.tl", "f(:a -1)").unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![Id, LParen, Symbol, Number, RParen]);
        assert_eq!(tokens[3].value, "-1");
    }

    #[test]
    fn operators_prefer_longest_match() {
        use TokenKind::*;
        assert_eq!(kinds("a == b = c && d || e"), vec![Id, Eq, Id, Set, Id, And, Id, Or, Id]);
        assert_eq!(kinds("a;;;b"), vec![Id, Term, Id]);
    }

    #[test]
    fn comments_are_dropped_but_count_lines() {
        let tokens = tokenize("t.tl", "a /* one\ntwo */ b // tail\nc").unwrap();
        let lines: Vec<(TokenKind, usize)> = tokens.iter().map(|t| (t.kind, t.line)).collect();
        assert_eq!(
            lines,
            vec![
                (TokenKind::Id, 1),
                (TokenKind::Id, 2),
                (TokenKind::Nl, 2),
                (TokenKind::Id, 3)
            ]
        );
    }

    #[test]
    fn attribute_swallows_its_line_break() {
        let tokens = tokenize("t.tl", "#[export]\nfn main() {}").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Attribute);
        assert_eq!(tokens[0].value, "export");
        assert_eq!(tokens[1].kind, TokenKind::Fn);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn strings_keep_raw_text_and_track_lines() {
        let tokens = tokenize("t.tl", "\"a \\\"b\\\"\nc\" x").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].value, "\"a \\\"b\\\"\nc\"");
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn illegal_character_reports_position() {
        let err = tokenize("bad.tl", "fn main() {\n  x $ 1\n}").unwrap_err();
        assert_eq!(err.character, '$');
        assert_eq!(err.diagnostic.line, 2);
        assert_eq!(err.diagnostic.column, 5);
        assert_eq!(err.diagnostic.source_line, "  x $ 1");
        assert_eq!(err.diagnostic.filename, "bad.tl");
    }

    #[test]
    fn uppercase_start_is_illegal() {
        let err = tokenize("t.tl", "Foo").unwrap_err();
        assert_eq!(err.character, 'F');
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize("t.tl", "x = \"abc").unwrap_err();
        assert_eq!(err.character, '"');
        assert_eq!(err.diagnostic.column, 5);
    }
}
