use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

// Longest operators first so `**` wins over `*`.
const OPERATORS: [&str; 16] = [
    "**", "//", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "&", "|", "~",
];

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ParseError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos];
        if ch.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let starts_number = ch.is_ascii_digit()
            || (ch == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit));
        if starts_number {
            let (value, end) = lex_number(source, pos)?;
            tokens.push(Spanned {
                token: Token::Number(value),
                offset: pos,
            });
            pos = end;
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == b'_' {
            let end = bytes[pos..]
                .iter()
                .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
                .map_or(bytes.len(), |len| pos + len);
            tokens.push(Spanned {
                token: Token::Ident(source[pos..end].to_string()),
                offset: pos,
            });
            pos = end;
            continue;
        }

        if ch == b'\'' || ch == b'"' {
            let (text, end) = lex_string(source, pos)?;
            tokens.push(Spanned {
                token: Token::Text(text),
                offset: pos,
            });
            pos = end;
            continue;
        }

        let single = match ch {
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b',' => Some(Token::Comma),
            b'.' => Some(Token::Dot),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(Spanned { token, offset: pos });
            pos += 1;
            continue;
        }

        let rest = &source[pos..];
        match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            Some(op) => {
                tokens.push(Spanned {
                    token: Token::Op(*op),
                    offset: pos,
                });
                pos += op.len();
            }
            None => {
                let found = rest.chars().next().unwrap_or('?');
                return Err(ParseError::new(pos, format!("unexpected character `{found}`")));
            }
        }
    }

    Ok(tokens)
}

fn lex_number(source: &str, start: usize) -> Result<(f64, usize), ParseError> {
    let bytes = source.as_bytes();
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut probe = end + 1;
        if probe < bytes.len() && (bytes[probe] == b'+' || bytes[probe] == b'-') {
            probe += 1;
        }
        if probe < bytes.len() && bytes[probe].is_ascii_digit() {
            end = probe;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
    }
    let raw = &source[start..end];
    raw.parse::<f64>()
        .map(|value| (value, end))
        .map_err(|_| ParseError::new(start, format!("invalid number `{raw}`")))
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize), ParseError> {
    let mut chars = source[start..].char_indices();
    let quote = match chars.next() {
        Some((_, quote)) => quote,
        None => return Err(ParseError::new(start, "unterminated string")),
    };
    let mut text = String::new();
    let mut escaped = false;
    for (idx, ch) in chars {
        if escaped {
            text.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == quote {
            return Ok((text, start + idx + ch.len_utf8()));
        } else {
            text.push(ch);
        }
    }
    Err(ParseError::new(start, "unterminated string"))
}
