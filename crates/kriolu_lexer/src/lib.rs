pub mod error;
pub mod lexer;
pub mod token;

pub use error::{LexError, LexResult};
pub use lexer::Lexer;
pub use token::{lookup_keyword, Token, TokenKind};

pub fn tokenize(source: &str) -> (Vec<Token>, Vec<LexError>) {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.tokenize();
    (tokens, lexer.errors)
}

/// Dump dei token su stdout (flag `-lexer` della CLI).
pub fn dump_tokens(source: &str) {
    let (tokens, errors) = tokenize(source);
    for token in &tokens {
        if token.kind == TokenKind::Eof { break; }
        println!("{:2} {:<25} '{}'", token.line, token.kind.debug_name(), token.lexeme);
    }
    for e in &errors {
        eprintln!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, errors) = tokenize(src);
        assert!(errors.is_empty(), "Unexpected errors: {:?}", errors);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty_source() {
        let (tokens, errors) = tokenize("");
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }

    #[test]
    fn test_number_literals() {
        let k = kinds("42 3.14 0.5");
        assert_eq!(k[0], TokenKind::Number(42.0));
        assert_eq!(k[1], TokenKind::Number(3.14));
        assert_eq!(k[2], TokenKind::Number(0.5));
    }

    #[test]
    fn test_number_dot_without_fraction_is_two_tokens() {
        let k = kinds("1.foo");
        assert_eq!(k[0], TokenKind::Number(1.0));
        assert_eq!(k[1], TokenKind::Dot);
    }

    #[test]
    fn test_string_literal() {
        let (tokens, errors) = tokenize(r#""ola mundo""#);
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Str("ola mundo".to_string()));
    }

    #[test]
    fn test_string_with_newline_updates_line() {
        let (tokens, errors) = tokenize("\"a\nb\" 1");
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Str("a\nb".to_string()));
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn test_keywords() {
        let k = kinds("mimoria funson si sinou timenti di pa divolvi klasi imprimi");
        assert_eq!(k[0], TokenKind::Mimoria);
        assert_eq!(k[1], TokenKind::Funson);
        assert_eq!(k[2], TokenKind::Si);
        assert_eq!(k[3], TokenKind::Sinou);
        assert_eq!(k[4], TokenKind::Timenti);
        assert_eq!(k[5], TokenKind::Di);
        assert_eq!(k[6], TokenKind::Pa);
        assert_eq!(k[7], TokenKind::Divolvi);
        assert_eq!(k[8], TokenKind::Klasi);
        assert_eq!(k[9], TokenKind::Imprimi);
    }

    #[test]
    fn test_literal_keywords() {
        let k = kinds("verdadi falsu nulo keli riba e ou ka sai salta");
        assert_eq!(k[0], TokenKind::Verdadi);
        assert_eq!(k[1], TokenKind::Falsu);
        assert_eq!(k[2], TokenKind::Nulo);
        assert_eq!(k[3], TokenKind::Keli);
        assert_eq!(k[4], TokenKind::Riba);
        assert_eq!(k[5], TokenKind::E);
        assert_eq!(k[6], TokenKind::Ou);
        assert_eq!(k[7], TokenKind::Ka);
        assert_eq!(k[8], TokenKind::Sai);
        assert_eq!(k[9], TokenKind::Salta);
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        let k = kinds("sim diante timentia");
        assert_eq!(k[0], TokenKind::Identifier("sim".to_string()));
        assert_eq!(k[1], TokenKind::Identifier("diante".to_string()));
        assert_eq!(k[2], TokenKind::Identifier("timentia".to_string()));
    }

    #[test]
    fn test_operators() {
        let k = kinds("+ - * / ^ = == =/= < <= > >=");
        assert_eq!(k[0], TokenKind::Plus);
        assert_eq!(k[1], TokenKind::Minus);
        assert_eq!(k[2], TokenKind::Asterisk);
        assert_eq!(k[3], TokenKind::Slash);
        assert_eq!(k[4], TokenKind::Caret);
        assert_eq!(k[5], TokenKind::Equal);
        assert_eq!(k[6], TokenKind::EqualEqual);
        assert_eq!(k[7], TokenKind::NotEqual);
        assert_eq!(k[8], TokenKind::Less);
        assert_eq!(k[9], TokenKind::LessEqual);
        assert_eq!(k[10], TokenKind::Greater);
        assert_eq!(k[11], TokenKind::GreaterEqual);
    }

    #[test]
    fn test_comment_skipped() {
        let k = kinds("1 // un comentariu\n2");
        assert_eq!(k[0], TokenKind::Number(1.0));
        assert_eq!(k[1], TokenKind::Number(2.0));
    }

    #[test]
    fn test_interpolation_pieces() {
        let k = kinds(r#""a{x}b{y}c""#);
        assert_eq!(k[0], TokenKind::Interpolation("a".to_string()));
        assert_eq!(k[1], TokenKind::Identifier("x".to_string()));
        assert_eq!(k[2], TokenKind::Interpolation("b".to_string()));
        assert_eq!(k[3], TokenKind::Identifier("y".to_string()));
        assert_eq!(k[4], TokenKind::Str("c".to_string()));
    }

    #[test]
    fn test_interpolation_with_nested_braces() {
        let k = kinds(r#""v: {Foo{}}""#);
        assert_eq!(k[0], TokenKind::Interpolation("v: ".to_string()));
        assert_eq!(k[1], TokenKind::Identifier("Foo".to_string()));
        assert_eq!(k[2], TokenKind::LeftBrace);
        assert_eq!(k[3], TokenKind::RightBrace);
        assert_eq!(k[4], TokenKind::Str("".to_string()));
    }

    #[test]
    fn test_unterminated_string_error() {
        let (_tokens, errors) = tokenize("\"ola");
        assert!(!errors.is_empty());
        assert!(matches!(errors[0], LexError::UnterminatedString { .. }));
    }

    #[test]
    fn test_unexpected_character_error() {
        let (_tokens, errors) = tokenize("1 @ 2");
        assert!(matches!(errors[0], LexError::UnexpectedCharacter { ch: '@', .. }));
    }
}
