#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: u32,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: u32) -> Self {
        Token { kind, lexeme: lexeme.into(), line }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Letterali
    Number(f64),
    Str(String),
    /// Pezzo di stringa seguito da un'espressione interpolata (`"a{`).
    /// Il pezzo finale (o una stringa senza `{}`) arriva come `Str`.
    Interpolation(String),

    Identifier(String),

    // Keyword — dichiarazioni
    Mimoria, Funson, Klasi,

    // Keyword — controllo di flusso
    Si, Sinou, Timenti, Di, Pa, Sai, Salta, Divolvi,

    // Keyword — espressioni
    Keli, Riba, E, Ou, Ka, Verdadi, Falsu, Nulo, Imprimi,

    // Operatori
    Minus, Plus, Slash, Asterisk, Caret,
    Equal, EqualEqual, NotEqual,
    Less, LessEqual, Greater, GreaterEqual,

    // Delimitatori
    LeftParen, RightParen, LeftBrace, RightBrace,
    Comma, Dot, Semicolon,

    Eof,
}

impl TokenKind {
    /// Nome per il dump dei token (`-lexer`).
    pub fn debug_name(&self) -> &'static str {
        match self {
            TokenKind::Number(_)        => "<number>",
            TokenKind::Str(_)           => "<string>",
            TokenKind::Interpolation(_) => "<string-interpolation>",
            TokenKind::Identifier(_)    => "<identifier>",
            TokenKind::Mimoria          => "<mimoria>",
            TokenKind::Funson           => "<funson>",
            TokenKind::Klasi            => "<klasi>",
            TokenKind::Si               => "<si>",
            TokenKind::Sinou            => "<sinou>",
            TokenKind::Timenti          => "<timenti>",
            TokenKind::Di               => "<di>",
            TokenKind::Pa               => "<pa>",
            TokenKind::Sai              => "<sai>",
            TokenKind::Salta            => "<salta>",
            TokenKind::Divolvi          => "<divolvi>",
            TokenKind::Keli             => "<keli>",
            TokenKind::Riba             => "<riba>",
            TokenKind::E                => "<e>",
            TokenKind::Ou               => "<ou>",
            TokenKind::Ka               => "<ka>",
            TokenKind::Verdadi          => "<verdadi>",
            TokenKind::Falsu            => "<falsu>",
            TokenKind::Nulo             => "<nulo>",
            TokenKind::Imprimi          => "<imprimi>",
            TokenKind::Minus            => "<minus>",
            TokenKind::Plus             => "<plus>",
            TokenKind::Slash            => "<slash>",
            TokenKind::Asterisk         => "<asterisk>",
            TokenKind::Caret            => "<caret>",
            TokenKind::Equal            => "<equal>",
            TokenKind::EqualEqual       => "<equal-equal>",
            TokenKind::NotEqual         => "<not-equal>",
            TokenKind::Less             => "<less>",
            TokenKind::LessEqual        => "<less-equal>",
            TokenKind::Greater          => "<greater>",
            TokenKind::GreaterEqual     => "<greater-equal>",
            TokenKind::LeftParen        => "<left-parenthesis>",
            TokenKind::RightParen       => "<right-parenthesis>",
            TokenKind::LeftBrace        => "<left-brace>",
            TokenKind::RightBrace       => "<right-brace>",
            TokenKind::Comma            => "<comma>",
            TokenKind::Dot              => "<dot>",
            TokenKind::Semicolon        => "<semicolon>",
            TokenKind::Eof              => "<eof>",
        }
    }
}

pub fn lookup_keyword(s: &str) -> Option<TokenKind> {
    match s {
        "mimoria" => Some(TokenKind::Mimoria),
        "funson"  => Some(TokenKind::Funson),
        "klasi"   => Some(TokenKind::Klasi),
        "si"      => Some(TokenKind::Si),
        "sinou"   => Some(TokenKind::Sinou),
        "timenti" => Some(TokenKind::Timenti),
        "di"      => Some(TokenKind::Di),
        "pa"      => Some(TokenKind::Pa),
        "sai"     => Some(TokenKind::Sai),
        "salta"   => Some(TokenKind::Salta),
        "divolvi" => Some(TokenKind::Divolvi),
        "keli"    => Some(TokenKind::Keli),
        "riba"    => Some(TokenKind::Riba),
        "e"       => Some(TokenKind::E),
        "ou"      => Some(TokenKind::Ou),
        "ka"      => Some(TokenKind::Ka),
        "verdadi" => Some(TokenKind::Verdadi),
        "falsu"   => Some(TokenKind::Falsu),
        "nulo"    => Some(TokenKind::Nulo),
        "imprimi" => Some(TokenKind::Imprimi),
        _         => None,
    }
}
