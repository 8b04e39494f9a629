//! Tokenizer for the expression grammar.

use super::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

/// A token plus its byte offset in the source, for error messages.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let two = chars.get(i + 1).map(|(_, n)| *n);
        let simple = match (c, two) {
            ('=', Some('=')) => Some((Token::Eq, 2)),
            ('!', Some('=')) => Some((Token::Ne, 2)),
            ('<', Some('=')) => Some((Token::Le, 2)),
            ('>', Some('=')) => Some((Token::Ge, 2)),
            ('&', Some('&')) => Some((Token::And, 2)),
            ('|', Some('|')) => Some((Token::Or, 2)),
            ('<', _) => Some((Token::Lt, 1)),
            ('>', _) => Some((Token::Gt, 1)),
            ('!', _) => Some((Token::Not, 1)),
            ('.', _) => Some((Token::Dot, 1)),
            (',', _) => Some((Token::Comma, 1)),
            ('(', _) => Some((Token::LParen, 1)),
            (')', _) => Some((Token::RParen, 1)),
            ('[', _) => Some((Token::LBracket, 1)),
            (']', _) => Some((Token::RBracket, 1)),
            _ => None,
        };
        if let Some((token, width)) = simple {
            tokens.push(Spanned { token, pos });
            i += width;
            continue;
        }

        if c == '\'' || c == '"' {
            let (value, next) = lex_string(&chars, i, c)?;
            tokens.push(Spanned {
                token: Token::Str(value),
                pos,
            });
            i = next;
            continue;
        }

        if c.is_ascii_digit() || (c == '-' && two.is_some_and(|n| n.is_ascii_digit())) {
            let (token, next) = lex_number(&chars, i)?;
            tokens.push(Spanned { token, pos });
            i = next;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
            tokens.push(Spanned {
                token: Token::Ident(ident),
                pos,
            });
            continue;
        }

        return Err(ExpressionError::parse(format!(
            "unexpected character '{c}' at position {pos}"
        )));
    }

    Ok(tokens)
}

fn lex_string(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), ExpressionError> {
    let mut value = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i].1;
        if c == '\\' {
            let escaped = chars.get(i + 1).map(|(_, n)| *n).ok_or_else(|| {
                ExpressionError::parse(format!(
                    "unterminated string starting at position {}",
                    chars[start].0
                ))
            })?;
            value.push(match escaped {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            i += 2;
            continue;
        }
        if c == quote {
            return Ok((value, i + 1));
        }
        value.push(c);
        i += 1;
    }
    Err(ExpressionError::parse(format!(
        "unterminated string starting at position {}",
        chars[start].0
    )))
}

fn lex_number(chars: &[(usize, char)], start: usize) -> Result<(Token, usize), ExpressionError> {
    let mut i = start;
    if chars[i].1 == '-' {
        i += 1;
    }
    let mut is_float = false;
    while i < chars.len() {
        let c = chars[i].1;
        if c.is_ascii_digit() {
            i += 1;
        } else if c == '.'
            && !is_float
            && chars.get(i + 1).is_some_and(|(_, n)| n.is_ascii_digit())
        {
            is_float = true;
            i += 1;
        } else {
            break;
        }
    }
    let text: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
    let pos = chars[start].0;
    let token = if is_float {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| ExpressionError::parse(format!("invalid number at position {pos}")))?
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|_| ExpressionError::parse(format!("invalid number at position {pos}")))?
    };
    Ok((token, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_path_tokens() {
        assert_eq!(
            kinds("ACTIONS.a.result[0]"),
            vec![
                Token::Ident("ACTIONS".into()),
                Token::Dot,
                Token::Ident("a".into()),
                Token::Dot,
                Token::Ident("result".into()),
                Token::LBracket,
                Token::Int(0),
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(
            kinds("x >= -1.5 && 'a\\'b' != \"c\""),
            vec![
                Token::Ident("x".into()),
                Token::Ge,
                Token::Float(-1.5),
                Token::And,
                Token::Str("a'b".into()),
                Token::Ne,
                Token::Str("c".into()),
            ]
        );
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("TRIGGER # 1").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to parse expression: unexpected character '#' at position 8"
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("'abc").unwrap_err();
        assert!(err.to_string().contains("unterminated string"), "got: {err}");
    }
}
