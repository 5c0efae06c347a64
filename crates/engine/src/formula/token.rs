//! Tokenizer for formula text.

use std::str::CharIndices;

use unicode_xid::UnicodeXID;

use self::Token::*;
use crate::error::FormulaError;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token<'input> {
    Num(&'input str),
    Str(String),
    Ident(&'input str),
    True,
    False,
    Null,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Lt,
    Lte,
    Gt,
    Gte,
    EqEq,
    NotEq,
    And,
    Or,
    Not,
    Nullish,
    Question,
    Colon,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
}

impl Token<'_> {
    /// Human readable form used in syntax errors.
    pub(crate) fn describe(&self) -> String {
        let text = match self {
            Num(n) => return format!("number {n}"),
            Str(_) => return "string literal".to_string(),
            Ident(name) => return format!("identifier '{name}'"),
            True => "true",
            False => "false",
            Null => "null",
            Plus => "+",
            Minus => "-",
            Star => "*",
            StarStar => "**",
            Slash => "/",
            Percent => "%",
            Lt => "<",
            Lte => "<=",
            Gt => ">",
            Gte => ">=",
            EqEq => "==",
            NotEq => "!=",
            And => "&&",
            Or => "||",
            Not => "!",
            Nullish => "??",
            Question => "?",
            Colon => ":",
            Dot => ".",
            Comma => ",",
            LParen => "(",
            RParen => ")",
            LBracket => "[",
            RBracket => "]",
            LBrace => "{",
            RBrace => "}",
        };
        format!("'{text}'")
    }
}

pub(crate) type Spanned<T> = (usize, T, usize);

const KEYWORDS: &[(&str, Token<'static>)] = &[("true", True), ("false", False), ("null", Null)];

pub(crate) struct Lexer<'input> {
    text: &'input str,
    chars: CharIndices<'input>,
    lookahead: Option<(usize, char)>,
}

impl<'input> Lexer<'input> {
    pub(crate) fn new(input: &'input str) -> Self {
        let mut lexer = Lexer {
            text: input,
            chars: input.char_indices(),
            lookahead: None,
        };
        lexer.bump();
        lexer
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.lookahead = self.chars.next();
        self.lookahead
    }

    /// The character after the lookahead, without consuming anything.
    fn peek_second(&self) -> Option<char> {
        self.chars.clone().next().map(|(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.lookahead.map_or(self.text.len(), |(i, _)| i)
    }

    fn take_while<F>(&mut self, mut keep_going: F) -> usize
    where
        F: FnMut(char) -> bool,
    {
        while let Some((_, c)) = self.lookahead {
            if !keep_going(c) {
                break;
            }
            self.bump();
        }
        self.offset()
    }

    fn consume(&mut self, i: usize, tok: Token<'input>, len: usize) -> Spanned<Token<'input>> {
        for _ in 0..len {
            self.bump();
        }
        (i, tok, i + len)
    }

    /// Consumes a one-character operator, or its two-character form when the
    /// next character is `second`.
    fn one_or_two(
        &mut self,
        i: usize,
        second: char,
        short: Token<'input>,
        long: Token<'input>,
    ) -> Spanned<Token<'input>> {
        if self.peek_second() == Some(second) {
            self.consume(i, long, 2)
        } else {
            self.consume(i, short, 1)
        }
    }

    fn identifierish(&mut self, idx0: usize) -> Spanned<Token<'input>> {
        let end = self.take_while(is_identifier_continue);
        let word = &self.text[idx0..end];
        let tok = KEYWORDS
            .iter()
            .find(|(w, _)| *w == word)
            .map_or(Ident(word), |(_, t)| t.clone());
        (idx0, tok, end)
    }

    fn number(&mut self, idx0: usize) -> Result<Spanned<Token<'input>>, FormulaError> {
        let mut end = self.take_while(|c| c.is_ascii_digit());
        if matches!(self.lookahead, Some((_, '.'))) {
            self.bump();
            end = self.take_while(|c| c.is_ascii_digit());
        }
        if matches!(self.lookahead, Some((_, 'e' | 'E'))) {
            self.bump();
            if matches!(self.lookahead, Some((_, '+' | '-'))) {
                self.bump();
            }
            let digits_start = self.offset();
            end = self.take_while(|c| c.is_ascii_digit());
            if end == digits_start {
                return Err(FormulaError::syntax(idx0, "malformed exponent"));
            }
        }
        Ok((idx0, Num(&self.text[idx0..end]), end))
    }

    fn string(&mut self, idx0: usize, quote: char) -> Result<Spanned<Token<'input>>, FormulaError> {
        // eat the opening quote
        self.bump();
        let mut out = String::new();
        loop {
            match self.lookahead {
                None => return Err(FormulaError::syntax(idx0, "unterminated string literal")),
                Some((i, c)) if c == quote => {
                    self.bump();
                    return Ok((idx0, Str(out), i + c.len_utf8()));
                }
                Some((i, '\\')) => {
                    let escaped = match self.bump() {
                        Some((_, 'n')) => '\n',
                        Some((_, 't')) => '\t',
                        Some((_, 'r')) => '\r',
                        Some((_, c @ ('\\' | '\'' | '"'))) => c,
                        Some((j, other)) => {
                            return Err(FormulaError::syntax(
                                j,
                                format!("unknown escape sequence '\\{other}'"),
                            ));
                        }
                        None => {
                            return Err(FormulaError::syntax(i, "unterminated string literal"));
                        }
                    };
                    out.push(escaped);
                    self.bump();
                }
                Some((_, c)) => {
                    out.push(c);
                    self.bump();
                }
            }
        }
    }
}

impl<'input> Iterator for Lexer<'input> {
    type Item = Result<Spanned<Token<'input>>, FormulaError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (i, c) = self.lookahead?;
            let tok = match c {
                c if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                '+' => self.consume(i, Plus, 1),
                '-' => self.consume(i, Minus, 1),
                '*' => self.one_or_two(i, '*', Star, StarStar),
                '/' => self.consume(i, Slash, 1),
                '%' => self.consume(i, Percent, 1),
                '<' => self.one_or_two(i, '=', Lt, Lte),
                '>' => self.one_or_two(i, '=', Gt, Gte),
                '=' => {
                    if self.peek_second() != Some('=') {
                        self.bump();
                        return Some(Err(FormulaError::syntax(
                            i,
                            "assignment is not supported, use '==' to compare",
                        )));
                    }
                    let (start, tok, end) = self.consume(i, EqEq, 2);
                    // `===` is accepted as a synonym of `==`
                    if matches!(self.lookahead, Some((_, '='))) {
                        self.bump();
                        (start, tok, end + 1)
                    } else {
                        (start, tok, end)
                    }
                }
                '!' => {
                    if self.peek_second() != Some('=') {
                        self.consume(i, Not, 1)
                    } else {
                        let (start, tok, end) = self.consume(i, NotEq, 2);
                        if matches!(self.lookahead, Some((_, '='))) {
                            self.bump();
                            (start, tok, end + 1)
                        } else {
                            (start, tok, end)
                        }
                    }
                }
                '&' => {
                    if self.peek_second() != Some('&') {
                        self.bump();
                        return Some(Err(FormulaError::syntax(i, "unexpected '&', use '&&'")));
                    }
                    self.consume(i, And, 2)
                }
                '|' => {
                    if self.peek_second() != Some('|') {
                        self.bump();
                        return Some(Err(FormulaError::syntax(i, "unexpected '|', use '||'")));
                    }
                    self.consume(i, Or, 2)
                }
                '?' => self.one_or_two(i, '?', Question, Nullish),
                ':' => self.consume(i, Colon, 1),
                ',' => self.consume(i, Comma, 1),
                '(' => self.consume(i, LParen, 1),
                ')' => self.consume(i, RParen, 1),
                '[' => self.consume(i, LBracket, 1),
                ']' => self.consume(i, RBracket, 1),
                '{' => self.consume(i, LBrace, 1),
                '}' => self.consume(i, RBrace, 1),
                '"' | '\'' => return Some(self.string(i, c)),
                '.' if self.peek_second().is_some_and(|n| n.is_ascii_digit()) => {
                    return Some(self.number(i));
                }
                '.' => self.consume(i, Dot, 1),
                c if c.is_ascii_digit() => return Some(self.number(i)),
                c if is_identifier_start(c) => self.identifierish(i),
                other => {
                    self.bump();
                    return Some(Err(FormulaError::syntax(
                        i,
                        format!("unexpected character '{other}'"),
                    )));
                }
            };
            return Some(Ok(tok));
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    UnicodeXID::is_xid_start(c) || c == '_' || c == '$'
}

fn is_identifier_continue(c: char) -> bool {
    UnicodeXID::is_xid_continue(c) || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token<'_>> {
        Lexer::new(input)
            .map(|t| t.map(|(_, tok, _)| tok))
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn operators_and_literals() {
        assert_eq!(
            kinds("a.b ** 2 >= .5 && c !== 'x'"),
            vec![
                Ident("a"),
                Dot,
                Ident("b"),
                StarStar,
                Num("2"),
                Gte,
                Num(".5"),
                And,
                Ident("c"),
                NotEq,
                Str("x".to_string()),
            ]
        );
    }

    #[test]
    fn numbers_with_exponents() {
        assert_eq!(kinds("1e3 2.5E-2 7."), vec![Num("1e3"), Num("2.5E-2"), Num("7.")]);
        assert!(Lexer::new("1e").any(|t| t.is_err()));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(kinds(r#""a\"b\n""#), vec![Str("a\"b\n".to_string())]);
        assert!(Lexer::new("'open").any(|t| t.is_err()));
    }

    #[test]
    fn spans_are_byte_offsets() {
        let spans: Vec<_> = Lexer::new("área + 1")
            .map(|t| t.map(|(s, _, e)| (s, e)).unwrap())
            .collect();
        assert_eq!(spans, vec![(0, 5), (6, 7), (8, 9)]);
    }

    #[test]
    fn assignment_is_rejected() {
        let err = Lexer::new("x = 1").find_map(Result::err).unwrap();
        assert_eq!(
            err,
            FormulaError::syntax(2, "assignment is not supported, use '==' to compare")
        );
    }

    #[test]
    fn keywords_are_exact() {
        assert_eq!(kinds("true nullable"), vec![True, Ident("nullable")]);
    }
}
