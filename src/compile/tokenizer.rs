use std::borrow::Cow;

use log::trace;

use crate::error::{Result, VmError};

/// Punctuation tokens the compile loop handles directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    Colon,
    Semicolon,
    OpenList,
    CloseList,
    OpenBlock,
    CloseBlock,
    OpenBracket,
    CloseBracket,
    Arrow,
    Increment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token<'s> {
    Number(f32),
    Str(Cow<'s, str>),
    Word(&'s str),
    RefSigil,
    Punct(Punct),
    Eof,
}

/// Lazy token stream over a source string. Words are returned as source
/// slices; the compile loop interns what it needs.
pub struct Tokenizer<'s> {
    src: &'s str,
    pos: usize,
    peeked: Option<Token<'s>>,
}

fn is_word_end(ch: char) -> bool {
    ch.is_whitespace()
        || matches!(ch, ':' | ';' | '(' | ')' | '{' | '}' | '[' | ']' | '"')
}

impl<'s> Tokenizer<'s> {
    pub fn new(src: &'s str) -> Self {
        Tokenizer {
            src,
            pos: 0,
            peeked: None,
        }
    }

    pub fn peek(&mut self) -> Result<&Token<'s>> {
        if self.peeked.is_none() {
            let token = self.scan()?;
            self.peeked = Some(token);
        }
        Ok(self.peeked.as_ref().unwrap())
    }

    pub fn next_token(&mut self) -> Result<Token<'s>> {
        if let Some(token) = self.peeked.take() {
            return Ok(token);
        }
        let token = self.scan()?;
        trace!("token {token:?}");
        Ok(token)
    }

    fn rest(&self) -> &'s str {
        &self.src[self.pos..]
    }

    fn first(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn second(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self, ch: char) {
        self.pos += ch.len_utf8();
    }

    fn skip_blank(&mut self) {
        loop {
            match self.first() {
                Some(ch) if ch.is_whitespace() => self.bump(ch),
                Some('/') if self.second() == Some('/') => {
                    while let Some(ch) = self.first() {
                        self.bump(ch);
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn scan(&mut self) -> Result<Token<'s>> {
        self.skip_blank();
        let Some(ch) = self.first() else {
            return Ok(Token::Eof);
        };
        match ch {
            ':' => {
                self.bump(ch);
                Ok(Token::Punct(Punct::Colon))
            }
            ';' => {
                self.bump(ch);
                Ok(Token::Punct(Punct::Semicolon))
            }
            '(' => {
                self.bump(ch);
                Ok(Token::Punct(Punct::OpenList))
            }
            ')' => {
                self.bump(ch);
                Ok(Token::Punct(Punct::CloseList))
            }
            '{' => {
                self.bump(ch);
                Ok(Token::Punct(Punct::OpenBlock))
            }
            '}' => {
                self.bump(ch);
                Ok(Token::Punct(Punct::CloseBlock))
            }
            '[' => {
                self.bump(ch);
                Ok(Token::Punct(Punct::OpenBracket))
            }
            ']' => {
                self.bump(ch);
                Ok(Token::Punct(Punct::CloseBracket))
            }
            '"' => self.scan_string(),
            '\'' => {
                self.bump(ch);
                let word = self.scan_word_slice();
                if word.is_empty() {
                    return Err(VmError::syntax(
                        "' sigil requires a following word",
                    ));
                }
                Ok(Token::Str(Cow::Borrowed(word)))
            }
            '&' if self.second().is_some_and(|c| !is_word_end(c)) => {
                self.bump(ch);
                Ok(Token::RefSigil)
            }
            '-' if self.second() == Some('>') => {
                self.bump('-');
                self.bump('>');
                Ok(Token::Punct(Punct::Arrow))
            }
            '+' if self.second() == Some('>') => {
                self.bump('+');
                self.bump('>');
                Ok(Token::Punct(Punct::Increment))
            }
            '-' | '+' if self.second().is_some_and(|c| c.is_ascii_digit()) => {
                self.scan_number()
            }
            '.' if self.second().is_some_and(|c| c.is_ascii_digit()) => {
                self.scan_number()
            }
            ch if ch.is_ascii_digit() => self.scan_number(),
            _ => {
                let word = self.scan_word_slice();
                Ok(Token::Word(word))
            }
        }
    }

    fn scan_word_slice(&mut self) -> &'s str {
        let start = self.pos;
        while let Some(ch) = self.first() {
            if is_word_end(ch) {
                break;
            }
            self.bump(ch);
        }
        &self.src[start..self.pos]
    }

    fn scan_number(&mut self) -> Result<Token<'s>> {
        let text = self.scan_word_slice();
        match text.parse::<f32>() {
            Ok(value) => Ok(Token::Number(value)),
            Err(_) => Err(VmError::UnexpectedToken {
                token: text.to_owned(),
            }),
        }
    }

    fn scan_string(&mut self) -> Result<Token<'s>> {
        self.bump('"');
        let start = self.pos;
        let mut text: Option<String> = None;
        while let Some(ch) = self.first() {
            match ch {
                '"' => {
                    let token = match text {
                        Some(owned) => Token::Str(Cow::Owned(owned)),
                        None => Token::Str(Cow::Borrowed(
                            &self.src[start..self.pos],
                        )),
                    };
                    self.bump('"');
                    return Ok(token);
                }
                '\\' => {
                    let mut owned = text.take().unwrap_or_else(|| {
                        self.src[start..self.pos].to_owned()
                    });
                    self.bump('\\');
                    let escape = self.first().ok_or_else(|| {
                        VmError::syntax("unterminated string literal")
                    })?;
                    owned.push(match escape {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '"' => '"',
                        '\\' => '\\',
                        other => {
                            return Err(VmError::syntax(format!(
                                "unknown string escape \\{other}"
                            )))
                        }
                    });
                    self.bump(escape);
                    text = Some(owned);
                }
                ch => {
                    if let Some(owned) = text.as_mut() {
                        owned.push(ch);
                    }
                    self.bump(ch);
                }
            }
        }
        Err(VmError::syntax("unterminated string literal"))
    }
}
