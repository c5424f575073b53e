//=====================================================
// File: tokenizer/normalize.rs
//=====================================================
// Goal: Statement-terminator insertion between lexer and parser
// Objective: Drop line-break tokens and insert synthetic TERMs at line ends
//            and around closing braces, so `;` only separates expressions
//            sharing a line
//=====================================================

use std::collections::VecDeque;

use super::{LexError, Token, TokenKind};

pub struct Normalizer<I> {
    tokens: I,
    current: Option<Token>,
    last: Option<TokenKind>,
    ready: VecDeque<Token>,
    started: bool,
    finished: bool,
}

impl<I> Normalizer<I>
where
    I: Iterator<Item = Result<Token, LexError>>,
{
    pub fn new(tokens: I) -> Self {
        Self {
            tokens,
            current: None,
            last: None,
            ready: VecDeque::with_capacity(2),
            started: false,
            finished: false,
        }
    }

    fn emit(&mut self, token: Token) {
        self.last = Some(token.kind);
        self.ready.push_back(token);
    }

    /// Advance by one input token, queueing at most two output tokens.
    fn step(&mut self) -> Result<(), LexError> {
        if !self.started {
            self.started = true;
            self.current = self.tokens.next().transpose()?;
        }
        let Some(token) = self.current.take() else {
            self.finished = true;
            return Ok(());
        };
        // End of input behaves like a trailing line break.
        let next = self.tokens.next().transpose()?;
        let next_kind = next.as_ref().map_or(TokenKind::Nl, |t| t.kind);
        let kind = token.kind;

        let separator = Token::new(TokenKind::Term, ";", token.line, token.index);
        match kind {
            TokenKind::Nl => {}
            TokenKind::Term if self.last == Some(TokenKind::Term) => {}
            _ => self.emit(token),
        }

        if matches!(self.last, Some(last) if last != TokenKind::Term) {
            let needs_term = (kind == TokenKind::RBrace && next_kind != TokenKind::Term)
                || (next_kind == TokenKind::RBrace && kind != TokenKind::Term)
                || (next_kind == TokenKind::Nl && kind != TokenKind::Term);
            if needs_term {
                self.emit(separator);
            }
        }

        self.current = next;
        Ok(())
    }
}

impl<I> Iterator for Normalizer<I>
where
    I: Iterator<Item = Result<Token, LexError>>,
{
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(token) = self.ready.pop_front() {
                return Some(Ok(token));
            }
            if self.finished {
                return None;
            }
            if let Err(err) = self.step() {
                self.finished = true;
                self.ready.clear();
                return Some(Err(err));
            }
        }
    }
}
