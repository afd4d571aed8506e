//! Token definitions for the REAPER lexer.

use std::fmt;

use crate::span::Span;

/// A piece of an interpolated string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Literal(String),
    /// Tokens of an embedded `#{...}` expression, terminated by `Eof`.
    Expr(Vec<Token>),
}

/// All token types in REAPER.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    IntLiteral(i64),
    HexLiteral(i64),
    BinaryLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    InterpolatedString(Vec<StringPart>),

    Identifier(String),

    // Type keywords
    Corpse,
    Soul,
    Crypt,
    Grimoire,
    Tomb,
    Wraith,
    Void,
    Eternal,
    Phantom,
    Specter,
    Shadow,

    // Statement keywords
    Infect,
    Raise,
    Harvest,
    Reap,
    Shamble,
    Decay,
    Soulless,
    Spawn,
    If,
    Otherwise,
    Judge,
    Case,
    Default,
    Flee,
    Persist,
    Rest,
    This,
    From,
    To,
    In,
    For,
    Infiltrate,
    Cloak,
    Exploit,
    Breach,
    Await,
    Risk,
    Catch,
    Finally,
    Throw,

    // Logical words
    Corrupt,
    Infest,
    Banish,

    // Bitwise words
    Rot,
    Wither,
    Spread,
    Mutate,
    Invert,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equal,
    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    PercentEqual,
    Arrow,
    FatArrow,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,

    Newline,
    Eof,
}

impl TokenKind {
    /// Look up keyword from identifier.
    pub fn keyword(s: &str) -> Option<TokenKind> {
        match s {
            "corpse" => Some(TokenKind::Corpse),
            "soul" => Some(TokenKind::Soul),
            "crypt" => Some(TokenKind::Crypt),
            "grimoire" => Some(TokenKind::Grimoire),
            "tomb" => Some(TokenKind::Tomb),
            "wraith" => Some(TokenKind::Wraith),
            "void" => Some(TokenKind::Void),
            "eternal" => Some(TokenKind::Eternal),
            "phantom" => Some(TokenKind::Phantom),
            "specter" => Some(TokenKind::Specter),
            "shadow" => Some(TokenKind::Shadow),
            "infect" => Some(TokenKind::Infect),
            "raise" => Some(TokenKind::Raise),
            "harvest" => Some(TokenKind::Harvest),
            "reap" => Some(TokenKind::Reap),
            "shamble" => Some(TokenKind::Shamble),
            "decay" => Some(TokenKind::Decay),
            "soulless" => Some(TokenKind::Soulless),
            "spawn" => Some(TokenKind::Spawn),
            "if" => Some(TokenKind::If),
            "otherwise" => Some(TokenKind::Otherwise),
            "judge" => Some(TokenKind::Judge),
            "case" => Some(TokenKind::Case),
            "default" => Some(TokenKind::Default),
            "flee" => Some(TokenKind::Flee),
            "persist" => Some(TokenKind::Persist),
            "rest" => Some(TokenKind::Rest),
            "this" => Some(TokenKind::This),
            "from" => Some(TokenKind::From),
            "to" => Some(TokenKind::To),
            "in" => Some(TokenKind::In),
            "for" => Some(TokenKind::For),
            "infiltrate" => Some(TokenKind::Infiltrate),
            "cloak" => Some(TokenKind::Cloak),
            "exploit" => Some(TokenKind::Exploit),
            "breach" => Some(TokenKind::Breach),
            "await" => Some(TokenKind::Await),
            "risk" => Some(TokenKind::Risk),
            "catch" => Some(TokenKind::Catch),
            "finally" => Some(TokenKind::Finally),
            "throw" => Some(TokenKind::Throw),
            "corrupt" => Some(TokenKind::Corrupt),
            "infest" => Some(TokenKind::Infest),
            "banish" => Some(TokenKind::Banish),
            "rot" => Some(TokenKind::Rot),
            "wither" => Some(TokenKind::Wither),
            "spread" => Some(TokenKind::Spread),
            "mutate" => Some(TokenKind::Mutate),
            "invert" => Some(TokenKind::Invert),
            // Boolean-valued numeric constants
            "DEAD" => Some(TokenKind::IntLiteral(0)),
            "RISEN" => Some(TokenKind::IntLiteral(1)),
            _ => None,
        }
    }

    /// Declared-type keywords usable in declarations and parameter lists.
    pub fn is_type_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Corpse
                | TokenKind::Soul
                | TokenKind::Crypt
                | TokenKind::Grimoire
                | TokenKind::Tomb
                | TokenKind::Wraith
                | TokenKind::Void
                | TokenKind::Phantom
                | TokenKind::Specter
                | TokenKind::Shadow
        )
    }

    /// Whether a `-` directly after this token starts a negative literal.
    pub fn permits_negative_literal(&self) -> bool {
        matches!(
            self,
            TokenKind::Equal
                | TokenKind::LeftParen
                | TokenKind::Comma
                | TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Percent
                | TokenKind::EqualEqual
                | TokenKind::BangEqual
                | TokenKind::Less
                | TokenKind::Greater
                | TokenKind::LessEqual
                | TokenKind::GreaterEqual
                | TokenKind::Corrupt
                | TokenKind::Infest
                | TokenKind::Banish
        )
    }

    /// The keyword spelling, if this token is a word. Used where any word
    /// is acceptable as a name, such as after `.`.
    pub fn word(&self) -> Option<String> {
        match self {
            TokenKind::Identifier(name) => Some(name.clone()),
            TokenKind::IntLiteral(_)
            | TokenKind::HexLiteral(_)
            | TokenKind::BinaryLiteral(_)
            | TokenKind::FloatLiteral(_)
            | TokenKind::StringLiteral(_)
            | TokenKind::InterpolatedString(_) => None,
            other => {
                let text = other.to_string();
                text.chars()
                    .all(|c| c.is_ascii_alphabetic())
                    .then_some(text)
            }
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::IntLiteral(n) => write!(f, "{}", n),
            TokenKind::HexLiteral(n) => write!(f, "0x{:X}", n),
            TokenKind::BinaryLiteral(n) => write!(f, "0b{:b}", n),
            TokenKind::FloatLiteral(n) => write!(f, "{}", n),
            TokenKind::StringLiteral(s) => write!(f, "\"{}\"", s),
            TokenKind::InterpolatedString(_) => write!(f, "interpolated string"),
            TokenKind::Identifier(s) => write!(f, "{}", s),
            TokenKind::Corpse => write!(f, "corpse"),
            TokenKind::Soul => write!(f, "soul"),
            TokenKind::Crypt => write!(f, "crypt"),
            TokenKind::Grimoire => write!(f, "grimoire"),
            TokenKind::Tomb => write!(f, "tomb"),
            TokenKind::Wraith => write!(f, "wraith"),
            TokenKind::Void => write!(f, "void"),
            TokenKind::Eternal => write!(f, "eternal"),
            TokenKind::Phantom => write!(f, "phantom"),
            TokenKind::Specter => write!(f, "specter"),
            TokenKind::Shadow => write!(f, "shadow"),
            TokenKind::Infect => write!(f, "infect"),
            TokenKind::Raise => write!(f, "raise"),
            TokenKind::Harvest => write!(f, "harvest"),
            TokenKind::Reap => write!(f, "reap"),
            TokenKind::Shamble => write!(f, "shamble"),
            TokenKind::Decay => write!(f, "decay"),
            TokenKind::Soulless => write!(f, "soulless"),
            TokenKind::Spawn => write!(f, "spawn"),
            TokenKind::If => write!(f, "if"),
            TokenKind::Otherwise => write!(f, "otherwise"),
            TokenKind::Judge => write!(f, "judge"),
            TokenKind::Case => write!(f, "case"),
            TokenKind::Default => write!(f, "default"),
            TokenKind::Flee => write!(f, "flee"),
            TokenKind::Persist => write!(f, "persist"),
            TokenKind::Rest => write!(f, "rest"),
            TokenKind::This => write!(f, "this"),
            TokenKind::From => write!(f, "from"),
            TokenKind::To => write!(f, "to"),
            TokenKind::In => write!(f, "in"),
            TokenKind::For => write!(f, "for"),
            TokenKind::Infiltrate => write!(f, "infiltrate"),
            TokenKind::Cloak => write!(f, "cloak"),
            TokenKind::Exploit => write!(f, "exploit"),
            TokenKind::Breach => write!(f, "breach"),
            TokenKind::Await => write!(f, "await"),
            TokenKind::Risk => write!(f, "risk"),
            TokenKind::Catch => write!(f, "catch"),
            TokenKind::Finally => write!(f, "finally"),
            TokenKind::Throw => write!(f, "throw"),
            TokenKind::Corrupt => write!(f, "corrupt"),
            TokenKind::Infest => write!(f, "infest"),
            TokenKind::Banish => write!(f, "banish"),
            TokenKind::Rot => write!(f, "rot"),
            TokenKind::Wither => write!(f, "wither"),
            TokenKind::Spread => write!(f, "spread"),
            TokenKind::Mutate => write!(f, "mutate"),
            TokenKind::Invert => write!(f, "invert"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::Equal => write!(f, "="),
            TokenKind::EqualEqual => write!(f, "=="),
            TokenKind::BangEqual => write!(f, "!="),
            TokenKind::Less => write!(f, "<"),
            TokenKind::LessEqual => write!(f, "<="),
            TokenKind::Greater => write!(f, ">"),
            TokenKind::GreaterEqual => write!(f, ">="),
            TokenKind::PlusEqual => write!(f, "+="),
            TokenKind::MinusEqual => write!(f, "-="),
            TokenKind::StarEqual => write!(f, "*="),
            TokenKind::SlashEqual => write!(f, "/="),
            TokenKind::PercentEqual => write!(f, "%="),
            TokenKind::Arrow => write!(f, "->"),
            TokenKind::FatArrow => write!(f, "=>"),
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::LeftBrace => write!(f, "{{"),
            TokenKind::RightBrace => write!(f, "}}"),
            TokenKind::LeftBracket => write!(f, "["),
            TokenKind::RightBracket => write!(f, "]"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Eof => write!(f, "EOF"),
        }
    }
}

/// A token with its kind and source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn eof(position: usize, line: usize, column: usize) -> Self {
        Self {
            kind: TokenKind::Eof,
            span: Span::new(position, position, line, column),
        }
    }
}
