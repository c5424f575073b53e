//=============================================
// teal/parser.rs
//=============================================
// Goal: Teal operator-precedence parser
// Objective: Turn the normalized token stream into located AST nodes,
//            failing fast on the first unexpected token
//=============================================

//=============================================
//            Section 1: Imports
//=============================================

use std::collections::VecDeque;

use thiserror::Error;

use crate::ast::{BinOp, Literal, Location, Node, NodeKind};
use crate::diagnostic::{Diagnostic, index_column, line_of, line_text};
use crate::tokenizer::{LexError, Lexer, Normalizer, Token, TokenKind};

//=============================================
//            Section 2: Parse Errors
//=============================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("{diagnostic}")]
    UnexpectedToken {
        expected: String,
        found: Token,
        diagnostic: Diagnostic,
    },
    #[error("{diagnostic}")]
    UnexpectedEndOfInput {
        expected: String,
        diagnostic: Diagnostic,
    },
    #[error("{diagnostic}")]
    InvalidSyntax { diagnostic: Diagnostic },
}

impl ParseError {
    pub fn diagnostic(&self) -> &Diagnostic {
        match self {
            ParseError::Lex(err) => &err.diagnostic,
            ParseError::UnexpectedToken { diagnostic, .. }
            | ParseError::UnexpectedEndOfInput { diagnostic, .. }
            | ParseError::InvalidSyntax { diagnostic } => diagnostic,
        }
    }

    pub fn line(&self) -> usize {
        self.diagnostic().line
    }

    pub fn column(&self) -> usize {
        self.diagnostic().column
    }
}

//=============================================
//            Section 3: Operator Table
//=============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
    NonAssoc,
}

/// Binding power of each binary operator, loosest first.
fn binary_operator(kind: TokenKind) -> Option<(BinOp, u8, Assoc)> {
    let entry = match kind {
        TokenKind::Lt => (BinOp::Lt, 1, Assoc::NonAssoc),
        TokenKind::Gt => (BinOp::Gt, 1, Assoc::NonAssoc),
        TokenKind::Or => (BinOp::Or, 2, Assoc::Right),
        TokenKind::And => (BinOp::And, 3, Assoc::Right),
        TokenKind::Eq => (BinOp::Eq, 4, Assoc::NonAssoc),
        TokenKind::Set => (BinOp::Set, 4, Assoc::NonAssoc),
        TokenKind::Add => (BinOp::Add, 5, Assoc::Left),
        TokenKind::Sub => (BinOp::Sub, 5, Assoc::Left),
        TokenKind::Mul => (BinOp::Mul, 6, Assoc::Left),
        TokenKind::Div => (BinOp::Div, 6, Assoc::Left),
        _ => return None,
    };
    Some(entry)
}

const MAX_EXPRESSION_DEPTH: usize = 256;

//=============================================
//            Section 4: Parser State
//=============================================

pub struct Parser<'a> {
    filename: &'a str,
    source: &'a str,
    tokens: Box<dyn Iterator<Item = Result<Token, LexError>> + 'a>,
    lookahead: VecDeque<Token>,
    lex_error: Option<LexError>,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new<I>(filename: &'a str, source: &'a str, tokens: I) -> Self
    where
        I: Iterator<Item = Result<Token, LexError>> + 'a,
    {
        Self {
            filename,
            source,
            tokens: Box::new(tokens),
            lookahead: VecDeque::with_capacity(2),
            lex_error: None,
            depth: 0,
        }
    }

    /// Parse every top-level expression of the source unit.
    pub fn parse(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();
        loop {
            self.skip_terms();
            if self.peek_kind().is_none() {
                break;
            }
            nodes.push(self.expression()?);
            self.end_statement()?;
        }
        if let Some(err) = self.lex_error.take() {
            return Err(err.into());
        }
        Ok(nodes)
    }

    //=============================================
    //            Section 5: Token Navigation
    //=============================================

    fn fill(&mut self, count: usize) {
        while self.lookahead.len() < count && self.lex_error.is_none() {
            match self.tokens.next() {
                Some(Ok(token)) => self.lookahead.push_back(token),
                Some(Err(err)) => self.lex_error = Some(err),
                None => break,
            }
        }
    }

    fn peek(&mut self) -> Option<&Token> {
        self.fill(1);
        self.lookahead.front()
    }

    fn peek_kind(&mut self) -> Option<TokenKind> {
        self.peek().map(|token| token.kind)
    }

    fn peek_kind_at(&mut self, offset: usize) -> Option<TokenKind> {
        self.fill(offset + 1);
        self.lookahead.get(offset).map(|token| token.kind)
    }

    fn check(&mut self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn advance(&mut self) -> Option<Token> {
        self.fill(1);
        self.lookahead.pop_front()
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        match self.advance() {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(self.unexpected(token, expected)),
            None => Err(self.end_of_input(expected)),
        }
    }

    /// Terminators next to brackets and separators carry no meaning.
    fn skip_terms(&mut self) {
        while self.eat(TokenKind::Term) {}
    }

    fn end_statement(&mut self) -> Result<(), ParseError> {
        match self.peek_kind() {
            None | Some(TokenKind::Term) => {
                self.advance();
                Ok(())
            }
            Some(_) => {
                let token = self.advance();
                Err(self.unexpected_or_end(token, "end of expression"))
            }
        }
    }

    fn location(&self, token: &Token) -> Location {
        Location {
            filename: self.filename.to_string(),
            line: line_of(self.source, token.index),
            column: index_column(self.source, token.index),
            source_line: line_text(self.source, token.index).to_string(),
        }
    }

    fn unexpected(&self, token: Token, expected: &str) -> ParseError {
        let message = format!("expected {expected}, found {token}");
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            diagnostic: Diagnostic::at(self.filename, self.source, token.index, message),
            found: token,
        }
    }

    fn end_of_input(&mut self, expected: &str) -> ParseError {
        if let Some(err) = self.lex_error.take() {
            return err.into();
        }
        let message = format!("unexpected end of input, expected {expected}");
        ParseError::UnexpectedEndOfInput {
            expected: expected.to_string(),
            diagnostic: Diagnostic::at(self.filename, self.source, self.source.len(), message),
        }
    }

    fn unexpected_or_end(&mut self, token: Option<Token>, expected: &str) -> ParseError {
        match token {
            Some(token) => self.unexpected(token, expected),
            None => self.end_of_input(expected),
        }
    }

    fn invalid(&self, index: usize, message: impl Into<String>) -> ParseError {
        ParseError::InvalidSyntax {
            diagnostic: Diagnostic::at(self.filename, self.source, index, message),
        }
    }

    //=============================================
    //            Section 6: Expressions
    //=============================================

    fn expression(&mut self) -> Result<Node, ParseError> {
        self.binary(0)
    }

    fn binary(&mut self, min_power: u8) -> Result<Node, ParseError> {
        let mut left = self.unary()?;
        let mut chained: Option<u8> = None;
        while let Some((op, power, assoc)) = self.peek_kind().and_then(binary_operator) {
            if power < min_power {
                break;
            }
            let Some(token) = self.advance() else { break };
            if assoc == Assoc::NonAssoc && chained == Some(power) {
                return Err(self.invalid(
                    token.index,
                    format!("operator `{}` cannot be chained", op.as_str()),
                ));
            }
            let next_power = match assoc {
                Assoc::Right => power,
                Assoc::Left | Assoc::NonAssoc => power + 1,
            };
            let right = self.binary(next_power)?;
            let loc = left.loc.clone();
            left = Node::new(
                NodeKind::Binop {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                loc,
            );
            chained = (assoc == Assoc::NonAssoc).then_some(power);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Node, ParseError> {
        self.depth += 1;
        if self.depth > MAX_EXPRESSION_DEPTH {
            let end = self.source.len();
            let index = self.peek().map_or(end, |token| token.index);
            return Err(self.invalid(index, "expression nested too deeply"));
        }
        let node = self.prefix();
        self.depth -= 1;
        node
    }

    fn prefix(&mut self) -> Result<Node, ParseError> {
        match self.peek_kind() {
            Some(kind @ (TokenKind::Async | TokenKind::Await)) => {
                let Some(token) = self.advance() else {
                    return Err(self.end_of_input("expression"));
                };
                let loc = self.location(&token);
                let operand = Box::new(self.unary()?);
                let kind = if kind == TokenKind::Async {
                    NodeKind::Async(operand)
                } else {
                    NodeKind::Await(operand)
                };
                Ok(Node::new(kind, loc))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node, ParseError> {
        let kind = match self.peek_kind() {
            Some(kind) => kind,
            None => return Err(self.end_of_input("expression")),
        };
        match kind {
            TokenKind::Attribute | TokenKind::Fn => return self.definition(),
            TokenKind::Lambda => return self.lambda(),
            TokenKind::If => return self.conditional(),
            TokenKind::LBracket => return self.list_literal(),
            TokenKind::LBrace => return self.hash_literal(),
            _ => {}
        }

        let Some(token) = self.advance() else {
            return Err(self.end_of_input("expression"));
        };
        let loc = self.location(&token);
        let node = match token.kind {
            TokenKind::Number => NodeKind::Literal(self.decode_number(&token)?),
            TokenKind::String => NodeKind::Literal(Literal::String(decode_string(&token.value))),
            TokenKind::True => NodeKind::Literal(Literal::Boolean(true)),
            TokenKind::False => NodeKind::Literal(Literal::Boolean(false)),
            TokenKind::Null => NodeKind::Literal(Literal::Null),
            TokenKind::Symbol => NodeKind::Symbol(token.value[1..].to_string()),
            TokenKind::Id if self.check(TokenKind::LParen) => {
                let callee = Node::new(NodeKind::Id(token.value.clone()), loc.clone());
                let args = self.arguments()?;
                NodeKind::Call {
                    callee: Box::new(callee),
                    args,
                }
            }
            TokenKind::Id => NodeKind::Id(token.value),
            TokenKind::LParen => {
                self.skip_terms();
                let inner = self.expression()?;
                self.skip_terms();
                self.expect(TokenKind::RParen, "`)`")?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected(token, "expression")),
        };
        Ok(Node::new(node, loc))
    }

    fn decode_number(&self, token: &Token) -> Result<Literal, ParseError> {
        let text = token.value.as_str();
        let literal = if text.contains('.') {
            text.parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Literal::Float)
        } else {
            text.parse::<i64>().ok().map(Literal::Integer)
        };
        literal.ok_or_else(|| self.invalid(token.index, format!("invalid number `{text}`")))
    }

    //=============================================
    //            Section 7: Calls and Literals
    //=============================================

    fn arguments(&mut self) -> Result<Vec<Node>, ParseError> {
        self.expect(TokenKind::LParen, "`(`")?;
        let mut args = Vec::new();
        self.skip_terms();
        while !self.eat(TokenKind::RParen) {
            args.push(self.argument()?);
            self.skip_terms();
            if self.eat(TokenKind::Comma) {
                self.skip_terms();
                continue;
            }
            self.expect(TokenKind::RParen, "`,` or `)`")?;
            break;
        }
        Ok(args)
    }

    fn argument(&mut self) -> Result<Node, ParseError> {
        let keyword = self.check(TokenKind::Symbol)
            && self
                .peek_kind_at(1)
                .is_some_and(TokenKind::starts_expression);
        if keyword {
            let Some(token) = self.advance() else {
                return Err(self.end_of_input("argument"));
            };
            let loc = self.location(&token);
            let symbol = Node::new(NodeKind::Symbol(token.value[1..].to_string()), loc.clone());
            let value = self.expression()?;
            return Ok(Node::new(
                NodeKind::Argument {
                    symbol: Some(Box::new(symbol)),
                    value: Box::new(value),
                },
                loc,
            ));
        }
        let value = self.expression()?;
        Ok(positional(value))
    }

    /// `[a, b]` is sugar for `list(a, b)`.
    fn list_literal(&mut self) -> Result<Node, ParseError> {
        let open = self.expect(TokenKind::LBracket, "`[`")?;
        let loc = self.location(&open);
        let mut items = Vec::new();
        self.skip_terms();
        while !self.eat(TokenKind::RBracket) {
            items.push(positional(self.expression()?));
            self.skip_terms();
            if self.eat(TokenKind::Comma) {
                self.skip_terms();
                continue;
            }
            self.expect(TokenKind::RBracket, "`,` or `]`")?;
            break;
        }
        Ok(builtin_call("list", items, loc))
    }

    /// `{k: v}` is sugar for `hash(k, v)`.
    fn hash_literal(&mut self) -> Result<Node, ParseError> {
        let open = self.expect(TokenKind::LBrace, "`{`")?;
        let loc = self.location(&open);
        let mut items = Vec::new();
        self.skip_terms();
        while !self.eat(TokenKind::RBrace) {
            items.push(positional(self.expression()?));
            self.skip_terms();
            self.expect(TokenKind::Colon, "`:`")?;
            self.skip_terms();
            items.push(positional(self.expression()?));
            self.skip_terms();
            if self.eat(TokenKind::Comma) {
                self.skip_terms();
                continue;
            }
            self.expect(TokenKind::RBrace, "`,` or `}`")?;
            break;
        }
        Ok(builtin_call("hash", items, loc))
    }

    //=============================================
    //            Section 8: Functions and Blocks
    //=============================================

    fn definition(&mut self) -> Result<Node, ParseError> {
        let mut attribute = None;
        let start = if self.check(TokenKind::Attribute) {
            let token = self.expect(TokenKind::Attribute, "attribute")?;
            attribute = Some(token.value.clone());
            self.skip_terms();
            self.expect(TokenKind::Fn, "`fn` after attribute")?;
            token
        } else {
            self.expect(TokenKind::Fn, "`fn`")?
        };
        let loc = self.location(&start);
        let name = self.expect(TokenKind::Id, "function name")?.value;
        let params = self.parameters()?;
        let body = self.block()?;
        Ok(Node::new(
            NodeKind::Definition {
                name,
                params,
                body: Box::new(body),
                attribute,
            },
            loc,
        ))
    }

    fn lambda(&mut self) -> Result<Node, ParseError> {
        let token = self.expect(TokenKind::Lambda, "`lambda`")?;
        let loc = self.location(&token);
        let params = self.parameters()?;
        let body = self.block()?;
        Ok(Node::new(
            NodeKind::Lambda {
                params,
                body: Box::new(body),
            },
            loc,
        ))
    }

    fn parameters(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(TokenKind::LParen, "`(`")?;
        let mut params: Vec<String> = Vec::new();
        self.skip_terms();
        while !self.eat(TokenKind::RParen) {
            let token = self.expect(TokenKind::Id, "parameter name")?;
            if params.contains(&token.value) {
                return Err(self.invalid(
                    token.index,
                    format!("duplicate parameter `{}`", token.value),
                ));
            }
            params.push(token.value);
            self.skip_terms();
            if self.eat(TokenKind::Comma) {
                self.skip_terms();
                continue;
            }
            self.expect(TokenKind::RParen, "`,` or `)`")?;
            break;
        }
        Ok(params)
    }

    fn block(&mut self) -> Result<Node, ParseError> {
        let open = self.expect(TokenKind::LBrace, "`{`")?;
        let loc = self.location(&open);
        let mut items = Vec::new();
        loop {
            self.skip_terms();
            if self.eat(TokenKind::RBrace) {
                break;
            }
            if self.peek_kind().is_none() {
                return Err(self.end_of_input("`}`"));
            }
            items.push(self.expression()?);
            if !self.check(TokenKind::RBrace) {
                self.expect(TokenKind::Term, "terminator or `}`")?;
            }
        }
        if items.is_empty() {
            return Err(self.invalid(open.index, "empty block"));
        }
        Ok(Node::new(NodeKind::Progn(items), loc))
    }

    /// `if c {..} elif c {..} else {..}`; each `elif` nests in the else slot.
    fn conditional(&mut self) -> Result<Node, ParseError> {
        let Some(token) = self.advance() else {
            return Err(self.end_of_input("`if`"));
        };
        let loc = self.location(&token);
        let cond = self.expression()?;
        let then = self.block()?;
        if self.check(TokenKind::Term)
            && matches!(
                self.peek_kind_at(1),
                Some(TokenKind::Elif | TokenKind::Else)
            )
        {
            self.advance();
        }
        let else_ = match self.peek_kind() {
            Some(TokenKind::Elif) => Some(Box::new(self.conditional()?)),
            Some(TokenKind::Else) => {
                self.advance();
                Some(Box::new(self.block()?))
            }
            _ => None,
        };
        Ok(Node::new(
            NodeKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                else_,
            },
            loc,
        ))
    }
}

fn positional(value: Node) -> Node {
    let loc = value.loc.clone();
    Node::new(
        NodeKind::Argument {
            symbol: None,
            value: Box::new(value),
        },
        loc,
    )
}

fn builtin_call(name: &str, args: Vec<Node>, loc: Location) -> Node {
    let callee = Node::new(NodeKind::Id(name.to_string()), loc.clone());
    Node::new(
        NodeKind::Call {
            callee: Box::new(callee),
            args,
        },
        loc,
    )
}

/// Strip the quotes and resolve `\n \t \r \\ \"`; other escapes are kept verbatim.
fn decode_string(raw: &str) -> String {
    let inner = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Lex, normalize and parse one source unit.
pub fn parse_source(filename: &str, source: &str) -> Result<Vec<Node>, ParseError> {
    let tokens = Normalizer::new(Lexer::new(filename, source));
    Parser::new(filename, source, tokens).parse()
}
