use logos::Logos;

/// Gerber has only two delimiters: `*` ends a data block and `%` brackets
/// extended commands. Everything else is block data, split further by the parser.
#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[\r\n]+")]
pub enum Token {
    #[token("%")]
    Percent,
    #[token("*")]
    Star,
    #[regex(r"[^%*\r\n\x00-\x08\x0B\x0C\x0E-\x1F\x7F]+", |lex| lex.slice().to_string())]
    Data(String),
}

pub fn lex(source: &str) -> Result<Vec<(Token, std::ops::Range<usize>)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => {
                let span = lexer.span();
                return Err(LexError {
                    position: span.start,
                    snippet: source[span.clone()].escape_debug().to_string(),
                    suggestion: suggest_fix(&source[span.clone()]),
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(bad: &str) -> String {
    match bad.chars().next() {
        Some('\t') | Some(' ') => "Whitespace is only allowed inside data blocks.".to_string(),
        Some(c) if c.is_control() => format!(
            "Control character U+{:04X} is not allowed; was the file transferred in binary mode?",
            c as u32
        ),
        _ => "Remove the unexpected character(s).".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Lex error at position {position}: '{snippet}'. {suggestion}")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
    pub suggestion: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        lex(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn lex_word_command() {
        assert_eq!(
            kinds("X100Y200D01*"),
            vec![Token::Data("X100Y200D01".to_string()), Token::Star]
        );
    }

    #[test]
    fn lex_extended_command() {
        assert_eq!(
            kinds("%FSLAX26Y26*%"),
            vec![
                Token::Percent,
                Token::Data("FSLAX26Y26".to_string()),
                Token::Star,
                Token::Percent,
            ]
        );
    }

    #[test]
    fn lex_newlines_split_data() {
        let tokens = lex("%AMBOX*\n21,1,$1,$2,\n0,0,0*%").unwrap();
        let data: Vec<_> = tokens
            .iter()
            .filter_map(|(t, span)| match t {
                Token::Data(s) => Some((s.as_str(), span.start)),
                _ => None,
            })
            .collect();
        assert_eq!(data, vec![("AMBOX", 1), ("21,1,$1,$2,", 8), ("0,0,0", 20)]);
    }

    #[test]
    fn lex_keeps_inner_whitespace() {
        assert_eq!(
            kinds("G04 hello world*"),
            vec![Token::Data("G04 hello world".to_string()), Token::Star]
        );
    }

    #[test]
    fn lex_rejects_control_characters() {
        let err = lex("D10*\x07").unwrap_err();
        assert_eq!(err.position, 4);
        assert!(err.suggestion.contains("U+0007"));
    }

    #[test]
    fn lex_empty_source() {
        assert!(lex("").unwrap().is_empty());
        assert!(lex("\r\n\n").unwrap().is_empty());
    }
}
