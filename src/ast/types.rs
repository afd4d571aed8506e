//! Declared-type tags. Enforcement is advisory: the interpreter records the
//! tag on the binding and only `shadow` changes how a value is stored.

use crate::lexer::TokenKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// Integer
    Corpse,
    /// Text
    Soul,
    /// Array
    Crypt,
    /// Key-value mapping
    Grimoire,
    /// Class
    Tomb,
    /// Boolean
    Wraith,
    Void,
    /// Float
    Phantom,
    /// Raw binary
    Specter,
    /// Protected, zeroizable text
    Shadow,
}

impl TypeTag {
    pub fn from_token(kind: &TokenKind) -> Option<TypeTag> {
        match kind {
            TokenKind::Corpse => Some(TypeTag::Corpse),
            TokenKind::Soul => Some(TypeTag::Soul),
            TokenKind::Crypt => Some(TypeTag::Crypt),
            TokenKind::Grimoire => Some(TypeTag::Grimoire),
            TokenKind::Tomb => Some(TypeTag::Tomb),
            TokenKind::Wraith => Some(TypeTag::Wraith),
            TokenKind::Void => Some(TypeTag::Void),
            TokenKind::Phantom => Some(TypeTag::Phantom),
            TokenKind::Specter => Some(TypeTag::Specter),
            TokenKind::Shadow => Some(TypeTag::Shadow),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::Corpse => "corpse",
            TypeTag::Soul => "soul",
            TypeTag::Crypt => "crypt",
            TypeTag::Grimoire => "grimoire",
            TypeTag::Tomb => "tomb",
            TypeTag::Wraith => "wraith",
            TypeTag::Void => "void",
            TypeTag::Phantom => "phantom",
            TypeTag::Specter => "specter",
            TypeTag::Shadow => "shadow",
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
