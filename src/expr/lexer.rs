//! Tokenizer for rule expressions.
//!
//! The lexer is the first half of the sandbox: it only produces tokens the grammar knows, and
//! classifies anything that looks like a construct from a general-purpose language (strings,
//! comparisons, attribute access, statements, ...) as an unsupported operation.

use crate::error::{ParseError, ParseResult};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    /// Plain identifier (column or function name).
    Ident(String),
    /// Backtick-quoted column name.
    QuotedIdent(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    End,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Int(v) => format!("number {v}"),
            TokenKind::Float(v) => format!("number {v}"),
            TokenKind::Ident(s) => format!("identifier '{s}'"),
            TokenKind::QuotedIdent(s) => format!("column `{s}`"),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::End => "end of expression".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token's first character.
    pub position: usize,
}

/// Identifiers that belong to statement/control-flow syntax in scripting languages.
const RESERVED_WORDS: &[&str] = &[
    "lambda", "import", "from", "def", "class", "return", "if", "else", "elif", "for", "while",
    "and", "or", "not", "in", "is", "let", "fn", "exec", "eval",
];

/// Split `input` into tokens. The final token is always [`TokenKind::End`].
pub fn tokenize(input: &str) -> ParseResult<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'+' => push(&mut tokens, TokenKind::Plus, start, &mut i, 1),
            b'-' => push(&mut tokens, TokenKind::Minus, start, &mut i, 1),
            b'*' => {
                if bytes.get(i + 1) == Some(&b'*') {
                    return Err(unsupported("exponentiation '**'", start));
                }
                push(&mut tokens, TokenKind::Star, start, &mut i, 1)
            }
            b'/' => {
                if bytes.get(i + 1) == Some(&b'/') {
                    return Err(unsupported("floor division '//'", start));
                }
                push(&mut tokens, TokenKind::Slash, start, &mut i, 1)
            }
            b'(' => push(&mut tokens, TokenKind::LParen, start, &mut i, 1),
            b')' => push(&mut tokens, TokenKind::RParen, start, &mut i, 1),
            b',' => push(&mut tokens, TokenKind::Comma, start, &mut i, 1),
            b'0'..=b'9' => {
                let (kind, end) = lex_number(input, start)?;
                tokens.push(Token {
                    kind,
                    position: start,
                });
                i = end;
            }
            b'.' => {
                if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                    let (kind, end) = lex_number(input, start)?;
                    tokens.push(Token {
                        kind,
                        position: start,
                    });
                    i = end;
                } else if bytes
                    .get(i + 1)
                    .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_')
                {
                    return Err(unsupported("attribute access '.'", start));
                } else {
                    return Err(syntax("unexpected '.'", start));
                }
            }
            b'`' => {
                let rest = &input[i + 1..];
                let close = rest
                    .find('`')
                    .ok_or_else(|| syntax("unterminated quoted column name", start))?;
                let name = &rest[..close];
                if name.is_empty() {
                    return Err(syntax("empty quoted column name", start));
                }
                tokens.push(Token {
                    kind: TokenKind::QuotedIdent(name.to_string()),
                    position: start,
                });
                i += close + 2;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let mut end = i + 1;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                let word = &input[start..end];
                if RESERVED_WORDS.contains(&word) {
                    return Err(unsupported(&format!("keyword '{word}'"), start));
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(word.to_string()),
                    position: start,
                });
                i = end;
            }
            b'\'' | b'"' => return Err(unsupported("string literal", start)),
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    return Err(unsupported("comparison '=='", start));
                }
                return Err(unsupported("assignment '='", start));
            }
            b'<' | b'>' | b'!' => {
                return Err(unsupported(&format!("comparison '{}'", c as char), start));
            }
            b'%' => return Err(unsupported("modulo '%'", start)),
            b'&' | b'|' | b'^' | b'~' => {
                return Err(unsupported(&format!("bitwise/logical operator '{}'", c as char), start));
            }
            b'[' | b']' => return Err(unsupported("indexing '[...]'", start)),
            b'{' | b'}' => return Err(unsupported("block or mapping literal", start)),
            b';' => return Err(unsupported("statement separator ';'", start)),
            b'?' | b':' => return Err(unsupported("conditional expression", start)),
            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(syntax(&format!("unexpected character '{ch}'"), start));
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::End,
        position: input.len(),
    });
    Ok(tokens)
}

fn push(tokens: &mut Vec<Token>, kind: TokenKind, position: usize, i: &mut usize, len: usize) {
    tokens.push(Token { kind, position });
    *i += len;
}

fn lex_number(input: &str, start: usize) -> ParseResult<(TokenKind, usize)> {
    let bytes = input.as_bytes();
    let mut end = start;
    let mut is_float = false;

    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        is_float = true;
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        is_float = true;
        end += 1;
        if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
            end += 1;
        }
        let digits_start = end;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if digits_start == end {
            return Err(syntax("invalid numeric literal: missing exponent digits", start));
        }
    }
    if end < bytes.len() && (bytes[end].is_ascii_alphabetic() || bytes[end] == b'_') {
        return Err(syntax(
            &format!("invalid numeric literal '{}'", &input[start..=end]),
            start,
        ));
    }

    let text = &input[start..end];
    if !is_float {
        if let Ok(v) = text.parse::<i64>() {
            return Ok((TokenKind::Int(v), end));
        }
    }
    text.parse::<f64>()
        .map(|v| (TokenKind::Float(v), end))
        .map_err(|e| syntax(&format!("invalid numeric literal '{text}': {e}"), start))
}

fn syntax(message: &str, position: usize) -> ParseError {
    ParseError::Syntax {
        position,
        message: message.to_string(),
    }
}

fn unsupported(construct: &str, position: usize) -> ParseError {
    ParseError::UnsupportedOperation {
        construct: construct.to_string(),
        position,
    }
}

#[cfg(test)]
mod tests {
    use super::{tokenize, TokenKind};
    use crate::error::ParseError;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_numbers_identifiers_and_operators() {
        assert_eq!(
            kinds("price*1.5 + .5 - 2e2 / qty_2"),
            vec![
                TokenKind::Ident("price".to_string()),
                TokenKind::Star,
                TokenKind::Float(1.5),
                TokenKind::Plus,
                TokenKind::Float(0.5),
                TokenKind::Minus,
                TokenKind::Float(200.0),
                TokenKind::Slash,
                TokenKind::Ident("qty_2".to_string()),
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn integer_literals_stay_integers() {
        assert_eq!(kinds("42"), vec![TokenKind::Int(42), TokenKind::End]);
    }

    #[test]
    fn quoted_identifiers_allow_spaces() {
        assert_eq!(
            kinds("`unit price` * 2"),
            vec![
                TokenKind::QuotedIdent("unit price".to_string()),
                TokenKind::Star,
                TokenKind::Int(2),
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn general_purpose_constructs_are_unsupported() {
        for input in [
            "a == b",
            "a = 1",
            "'text'",
            "a ** 2",
            "a % 2",
            "a[0]",
            "a.b",
            "a; b",
            "lambda",
            "a < b",
            "a if b else c",
        ] {
            let err = tokenize(input).unwrap_err();
            assert!(
                matches!(err, ParseError::UnsupportedOperation { .. }),
                "{input}: {err:?}"
            );
        }
    }

    #[test]
    fn stray_characters_are_syntax_errors() {
        let err = tokenize("a @ b").unwrap_err();
        assert_eq!(
            err,
            ParseError::Syntax {
                position: 2,
                message: "unexpected character '@'".to_string()
            }
        );
        assert!(matches!(tokenize("2x").unwrap_err(), ParseError::Syntax { .. }));
        assert!(matches!(tokenize("1e").unwrap_err(), ParseError::Syntax { .. }));
        assert!(matches!(tokenize("`open").unwrap_err(), ParseError::Syntax { .. }));
    }
}
