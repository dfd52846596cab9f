//! Tokenizer for sharding expressions

use std::iter::Peekable;
use std::str::CharIndices;

use super::CompileError;

/// Expression token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    And,
    Or,
    Not,
    True,
    False,
    Null,

    // Operators
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEquals,
    GreaterThan,
    GreaterThanOrEquals,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,

    // Literals
    StringLit(String),
    IntegerLit(i64),
    FloatLit(f64),

    // Identifiers
    Identifier(String),
    /// `$ROOT`, the whole payload
    Root,

    // Punctuation
    LeftParen,
    RightParen,
    Comma,
    Dot,

    Eof,
}

impl Token {
    /// Human readable form used in parse errors
    pub fn describe(&self) -> String {
        match self {
            Token::StringLit(s) => format!("string \"{}\"", s),
            Token::IntegerLit(i) => format!("number {}", i),
            Token::FloatLit(f) => format!("number {}", f),
            Token::Identifier(name) => format!("identifier '{}'", name),
            Token::Eof => "end of input".to_string(),
            other => format!("{:?}", other),
        }
    }
}

/// A token and the byte offset it starts at
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Split an expression into tokens, always terminated by `Token::Eof`
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, CompileError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        let token = match ch {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => single(&mut chars, Token::LeftParen),
            ')' => single(&mut chars, Token::RightParen),
            ',' => single(&mut chars, Token::Comma),
            '.' => single(&mut chars, Token::Dot),
            '+' => single(&mut chars, Token::Plus),
            '-' => single(&mut chars, Token::Minus),
            '*' => single(&mut chars, Token::Multiply),
            '/' => single(&mut chars, Token::Divide),
            '%' => single(&mut chars, Token::Modulo),
            '=' => {
                chars.next();
                if !eat(&mut chars, '=') {
                    return Err(CompileError::UnexpectedChar { ch: '=', offset });
                }
                Token::Equals
            }
            '!' => {
                chars.next();
                if eat(&mut chars, '=') {
                    Token::NotEquals
                } else {
                    Token::Not
                }
            }
            '<' => {
                chars.next();
                if eat(&mut chars, '=') {
                    Token::LessThanOrEquals
                } else if eat(&mut chars, '>') {
                    Token::NotEquals
                } else {
                    Token::LessThan
                }
            }
            '>' => {
                chars.next();
                if eat(&mut chars, '=') {
                    Token::GreaterThanOrEquals
                } else {
                    Token::GreaterThan
                }
            }
            '&' => {
                chars.next();
                if !eat(&mut chars, '&') {
                    return Err(CompileError::UnexpectedChar { ch: '&', offset });
                }
                Token::And
            }
            '|' => {
                chars.next();
                if !eat(&mut chars, '|') {
                    return Err(CompileError::UnexpectedChar { ch: '|', offset });
                }
                Token::Or
            }
            '"' | '\'' => read_string(&mut chars, ch, offset)?,
            c if c.is_ascii_digit() => read_number(&mut chars)?,
            '$' => {
                chars.next();
                let name = read_word(&mut chars);
                if name != "ROOT" {
                    return Err(CompileError::UnknownVariable(format!("${}", name)));
                }
                Token::Root
            }
            c if c.is_alphabetic() || c == '_' => keyword_or_identifier(read_word(&mut chars)),
            other => return Err(CompileError::UnexpectedChar { ch: other, offset }),
        };
        tokens.push(Spanned { token, offset });
    }

    tokens.push(Spanned {
        token: Token::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}

fn single(chars: &mut Peekable<CharIndices<'_>>, token: Token) -> Token {
    chars.next();
    token
}

fn eat(chars: &mut Peekable<CharIndices<'_>>, expected: char) -> bool {
    if matches!(chars.peek(), Some(&(_, c)) if c == expected) {
        chars.next();
        true
    } else {
        false
    }
}

fn read_word(chars: &mut Peekable<CharIndices<'_>>) -> String {
    let mut word = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    word
}

fn keyword_or_identifier(word: String) -> Token {
    match word.as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => Token::Identifier(word),
    }
}

fn read_string(
    chars: &mut Peekable<CharIndices<'_>>,
    quote: char,
    offset: usize,
) -> Result<Token, CompileError> {
    chars.next();
    let mut value = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            c if c == quote => return Ok(Token::StringLit(value)),
            c => value.push(c),
        }
    }
    Err(CompileError::UnterminatedString { offset })
}

fn read_number(chars: &mut Peekable<CharIndices<'_>>) -> Result<Token, CompileError> {
    let mut text = String::new();
    let mut is_float = false;

    while let Some(&(_, c)) = chars.peek() {
        if c.is_ascii_digit() || c == '_' {
            if c != '_' {
                text.push(c);
            }
            chars.next();
        } else if c == '.' && !is_float {
            // only a digit after the dot makes a float
            let mut lookahead = chars.clone();
            lookahead.next();
            if matches!(lookahead.peek(), Some(&(_, d)) if d.is_ascii_digit()) {
                is_float = true;
                text.push('.');
                chars.next();
            } else {
                break;
            }
        } else {
            break;
        }
    }

    // optional `L` suffix on integer literals
    if matches!(chars.peek(), Some(&(_, 'L')) | Some(&(_, 'l'))) && !is_float {
        chars.next();
    }

    if is_float {
        text.parse::<f64>()
            .map(Token::FloatLit)
            .map_err(|_| CompileError::InvalidNumber(text))
    } else {
        text.parse::<i64>()
            .map(Token::IntegerLit)
            .map_err(|_| CompileError::InvalidNumber(text))
    }
}
