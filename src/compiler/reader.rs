//! Minimal reader turning source text into [`Sexpr`] trees.
//!
//! Only what the surface syntax needs: lists, square-bracket vectors, the
//! `'x` quote shorthand, strings, integers, `true`/`false`/`nil` and symbols.
//! `;` starts a comment that runs to the end of the line.

use std::{iter::Peekable, rc::Rc, str::Chars};

use crate::error::{CompileError, CompileResult};

use super::sexpr::{Sexpr, SexprKind, Token, TokenKind};

struct Scanner<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == ';' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else if c.is_whitespace() || c == ',' {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> CompileResult<Option<Token>> {
        self.skip_trivia();
        let line = self.line;
        let Some(c) = self.bump() else {
            return Ok(None);
        };

        let token = match c {
            '(' => Token::new(TokenKind::LParen, "(", line),
            ')' => Token::new(TokenKind::RParen, ")", line),
            '[' => Token::new(TokenKind::LSquare, "[", line),
            ']' => Token::new(TokenKind::RSquare, "]", line),
            '\'' => Token::new(TokenKind::Quote, "'", line),
            '"' => self.string(line)?,
            c if is_symbol_char(c) => self.atom(c, line)?,
            ch => return Err(CompileError::UnexpectedChar { ch, line }),
        };

        Ok(Some(token))
    }

    fn string(&mut self, line: u32) -> CompileResult<Token> {
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(CompileError::UnterminatedString { line }),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('"') => text.push('"'),
                    Some('\\') => text.push('\\'),
                    Some(ch) => return Err(CompileError::UnexpectedChar { ch, line: self.line }),
                    None => return Err(CompileError::UnterminatedString { line }),
                },
                Some(c) => text.push(c),
            }
        }

        Ok(Token::new(TokenKind::String, text, line))
    }

    fn atom(&mut self, first: char, line: u32) -> CompileResult<Token> {
        let mut text = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if !is_symbol_char(c) {
                break;
            }
            text.push(c);
            self.bump();
        }

        let kind = match text.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            _ if looks_numeric(&text) => TokenKind::Number,
            _ => TokenKind::Symbol,
        };

        Ok(Token::new(kind, text, line))
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || "_+-*/=<>!&?%.".contains(c)
}

fn looks_numeric(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

struct Reader<'a> {
    scanner: Scanner<'a>,
    lookahead: Option<Token>,
}

impl<'a> Reader<'a> {
    fn peek(&mut self) -> CompileResult<Option<&Token>> {
        if self.lookahead.is_none() {
            self.lookahead = self.scanner.next_token()?;
        }
        Ok(self.lookahead.as_ref())
    }

    fn advance(&mut self) -> CompileResult<Option<Token>> {
        match self.lookahead.take() {
            Some(token) => Ok(Some(token)),
            None => self.scanner.next_token(),
        }
    }

    fn datum(&mut self) -> CompileResult<Sexpr> {
        let Some(token) = self.advance()? else {
            return Err(CompileError::UnexpectedEof {
                line: self.scanner.line,
            });
        };

        let kind = match token.kind {
            TokenKind::LParen => SexprKind::List(self.sequence(TokenKind::RParen)?),
            TokenKind::LSquare => SexprKind::Vector(self.sequence(TokenKind::RSquare)?),
            TokenKind::RParen | TokenKind::RSquare => {
                return Err(CompileError::UnbalancedDelimiter {
                    found: token.lexeme.chars().next().unwrap_or(')'),
                    line: token.line,
                })
            }
            TokenKind::Quote => {
                let quoted = self.datum()?;
                let quote = Sexpr::new(
                    SexprKind::Symbol(Rc::from("quote")),
                    Token::new(TokenKind::Symbol, "quote", token.line),
                );
                SexprKind::List(vec![quote, quoted])
            }
            TokenKind::String => SexprKind::String(token.lexeme.clone()),
            TokenKind::Number => match token.lexeme.parse::<i64>() {
                Ok(n) => SexprKind::Number(n),
                Err(_) => {
                    return Err(CompileError::IntegerRange {
                        value: token.lexeme.to_string(),
                        line: token.line,
                    })
                }
            },
            TokenKind::True => SexprKind::Boolean(true),
            TokenKind::False => SexprKind::Boolean(false),
            TokenKind::Nil => SexprKind::Nil,
            TokenKind::Symbol => SexprKind::Symbol(token.lexeme.clone()),
        };

        Ok(Sexpr::new(kind, token))
    }

    fn sequence(&mut self, close: TokenKind) -> CompileResult<Vec<Sexpr>> {
        let mut elems = Vec::new();
        loop {
            match self.peek()? {
                None => {
                    return Err(CompileError::UnexpectedEof {
                        line: self.scanner.line,
                    })
                }
                Some(token) if token.kind == close => {
                    self.advance()?;
                    return Ok(elems);
                }
                Some(token)
                    if matches!(token.kind, TokenKind::RParen | TokenKind::RSquare) =>
                {
                    let found = token.lexeme.chars().next().unwrap_or(')');
                    let line = token.line;
                    return Err(CompileError::UnbalancedDelimiter { found, line });
                }
                Some(_) => elems.push(self.datum()?),
            }
        }
    }
}

/// Reads every top-level form in `source`.
pub fn read(source: &str) -> CompileResult<Vec<Sexpr>> {
    let mut reader = Reader {
        scanner: Scanner::new(source),
        lookahead: None,
    };

    let mut forms = Vec::new();
    while reader.peek()?.is_some() {
        forms.push(reader.datum()?);
    }

    Ok(forms)
}
