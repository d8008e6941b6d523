//! Type descriptors and member references as they appear in smali text.

use std::fmt;

use bitflags::bitflags;

/// Descriptor of `java.lang.String`.
pub const STRING_TYPE: &str = "Ljava/lang/String;";

/// Descriptor of `java.lang.String[]`.
pub const STRING_ARRAY_TYPE: &str = "[Ljava/lang/String;";

bitflags! {
    /// Access and property modifiers of classes, fields and methods.
    ///
    /// Only the keyword form matters here, so the bit values are internal and do not
    /// follow the DEX encoding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        /// `public`
        const PUBLIC = 1 << 0;
        /// `private`
        const PRIVATE = 1 << 1;
        /// `protected`
        const PROTECTED = 1 << 2;
        /// `static`
        const STATIC = 1 << 3;
        /// `final`
        const FINAL = 1 << 4;
        /// `synchronized`
        const SYNCHRONIZED = 1 << 5;
        /// `volatile`
        const VOLATILE = 1 << 6;
        /// `bridge`
        const BRIDGE = 1 << 7;
        /// `transient`
        const TRANSIENT = 1 << 8;
        /// `varargs`
        const VARARGS = 1 << 9;
        /// `native`
        const NATIVE = 1 << 10;
        /// `interface`
        const INTERFACE = 1 << 11;
        /// `abstract`
        const ABSTRACT = 1 << 12;
        /// `strictfp`
        const STRICTFP = 1 << 13;
        /// `synthetic`
        const SYNTHETIC = 1 << 14;
        /// `annotation`
        const ANNOTATION = 1 << 15;
        /// `enum`
        const ENUM = 1 << 16;
        /// `constructor`
        const CONSTRUCTOR = 1 << 17;
        /// `declared-synchronized`
        const DECLARED_SYNCHRONIZED = 1 << 18;
    }
}

impl AccessFlags {
    /// Map a single smali modifier keyword to its flag.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let flag = match keyword {
            "public" => Self::PUBLIC,
            "private" => Self::PRIVATE,
            "protected" => Self::PROTECTED,
            "static" => Self::STATIC,
            "final" => Self::FINAL,
            "synchronized" => Self::SYNCHRONIZED,
            "volatile" => Self::VOLATILE,
            "bridge" => Self::BRIDGE,
            "transient" => Self::TRANSIENT,
            "varargs" => Self::VARARGS,
            "native" => Self::NATIVE,
            "interface" => Self::INTERFACE,
            "abstract" => Self::ABSTRACT,
            "strictfp" => Self::STRICTFP,
            "synthetic" => Self::SYNTHETIC,
            "annotation" => Self::ANNOTATION,
            "enum" => Self::ENUM,
            "constructor" => Self::CONSTRUCTOR,
            "declared-synchronized" => Self::DECLARED_SYNCHRONIZED,
            _ => return None,
        };
        Some(flag)
    }

    /// Consume leading modifier keywords from a whitespace-separated token stream.
    ///
    /// Returns the flags and the first token that is not a modifier.
    pub fn take_leading<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> (Self, Option<&'a str>) {
        let mut flags = Self::empty();
        for token in tokens.by_ref() {
            match Self::from_keyword(token) {
                Some(flag) => flags |= flag,
                None => return (flags, Some(token)),
            }
        }
        (flags, None)
    }
}

/// A class descriptor such as `Lcom/example/Main;`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(String);

impl ClassId {
    /// Wrap a descriptor, checking the `L...;` shape.
    #[must_use]
    pub fn parse(descriptor: &str) -> Option<Self> {
        if descriptor.len() > 2 && descriptor.starts_with('L') && descriptor.ends_with(';') {
            Some(Self(descriptor.to_string()))
        } else {
            None
        }
    }

    /// The raw descriptor.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A static or instance field reference: `Lcls;->name:type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    /// Declaring class
    pub class: ClassId,
    /// Field name
    pub name: String,
    /// Field type descriptor
    pub ty: String,
}

impl FieldRef {
    /// Parse the `Lcls;->name:type` operand form.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (class, member) = text.split_once("->")?;
        let (name, ty) = member.split_once(':')?;
        if name.is_empty() || parse_type(ty)?.len() != ty.len() {
            return None;
        }
        Some(Self {
            class: ClassId::parse(class)?,
            name: name.to_string(),
            ty: ty.to_string(),
        })
    }

    /// Returns `true` for `String[]` fields.
    #[must_use]
    pub fn is_string_array(&self) -> bool {
        self.ty == STRING_ARRAY_TYPE
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.class, self.name, self.ty)
    }
}

/// A method reference: `Lcls;->name(params)ret`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    /// Declaring class
    pub class: ClassId,
    /// Method name
    pub name: String,
    /// Parameter type descriptors
    pub params: Vec<String>,
    /// Return type descriptor
    pub ret: String,
}

impl MethodRef {
    /// Parse the `Lcls;->name(params)ret` operand form.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (class, member) = text.split_once("->")?;
        Self::parse_member(ClassId::parse(class)?, member)
    }

    /// Parse a `name(params)ret` member signature declared in `class`.
    #[must_use]
    pub fn parse_member(class: ClassId, member: &str) -> Option<Self> {
        let open = member.find('(')?;
        let close = member.rfind(')')?;
        if open == 0 || close < open {
            return None;
        }
        let params = parse_type_list(&member[open + 1..close])?;
        let ret = &member[close + 1..];
        if ret.is_empty() || parse_type(ret)?.len() != ret.len() {
            return None;
        }
        Some(Self {
            class,
            name: member[..open].to_string(),
            params,
            ret: ret.to_string(),
        })
    }

    /// Number of 32-bit register words the explicit parameters occupy.
    #[must_use]
    pub fn param_words(&self) -> usize {
        self.params.iter().map(|p| type_words(p)).sum()
    }

    /// Returns `true` if this method has exactly the given parameter and return types.
    #[must_use]
    pub fn has_shape(&self, params: &[&str], ret: &str) -> bool {
        self.ret == ret
            && self.params.len() == params.len()
            && self.params.iter().zip(params).all(|(a, b)| a == b)
    }

    /// Member part of the reference, `name(params)ret`.
    #[must_use]
    pub fn member(&self) -> String {
        format!("{}({}){}", self.name, self.params.concat(), self.ret)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}({}){}",
            self.class,
            self.name,
            self.params.concat(),
            self.ret
        )
    }
}

/// Number of register words a value of type `ty` occupies.
#[must_use]
pub fn type_words(ty: &str) -> usize {
    if ty == "J" || ty == "D" {
        2
    } else {
        1
    }
}

/// Return the prefix of `text` forming one complete type descriptor.
fn parse_type(text: &str) -> Option<&str> {
    let dims = text.bytes().take_while(|&b| b == b'[').count();
    let rest = &text[dims..];
    let len = match rest.as_bytes().first()? {
        b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D' | b'V' => 1,
        b'L' => rest.find(';')? + 1,
        _ => return None,
    };
    if dims > 0 && rest.starts_with('V') {
        return None;
    }
    Some(&text[..dims + len])
}

/// Split a concatenated parameter list such as `J[Ljava/lang/String;I`.
#[must_use]
pub fn parse_type_list(mut text: &str) -> Option<Vec<String>> {
    let mut types = Vec::new();
    while !text.is_empty() {
        let ty = parse_type(text)?;
        if ty == "V" {
            return None;
        }
        types.push(ty.to_string());
        text = &text[ty.len()..];
    }
    Some(types)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_list() {
        assert_eq!(
            parse_type_list("J[Ljava/lang/String;I[[B").unwrap(),
            vec!["J", "[Ljava/lang/String;", "I", "[[B"]
        );
        assert!(parse_type_list("").unwrap().is_empty());
        assert!(parse_type_list("Lunterminated").is_none());
        assert!(parse_type_list("Q").is_none());
        assert!(parse_type_list("V").is_none());
    }

    #[test]
    fn test_method_ref() {
        let m = MethodRef::parse(
            "Lio/michaelrocks/paranoid/Deobfuscator$app;->getString(J)Ljava/lang/String;",
        )
        .unwrap();
        assert_eq!(m.class.as_str(), "Lio/michaelrocks/paranoid/Deobfuscator$app;");
        assert_eq!(m.name, "getString");
        assert!(m.has_shape(&["J"], STRING_TYPE));
        assert_eq!(m.param_words(), 2);
        assert_eq!(
            m.to_string(),
            "Lio/michaelrocks/paranoid/Deobfuscator$app;->getString(J)Ljava/lang/String;"
        );
        assert_eq!(m.member(), "getString(J)Ljava/lang/String;");

        assert!(MethodRef::parse("Lfoo;->bar").is_none());
        assert!(MethodRef::parse("Lfoo;->(I)V").is_none());
        assert!(MethodRef::parse("Lfoo;->bar(I)").is_none());
    }

    #[test]
    fn test_field_ref() {
        let f = FieldRef::parse("La/b;->chunks:[Ljava/lang/String;").unwrap();
        assert!(f.is_string_array());
        assert_eq!(f.name, "chunks");
        assert_eq!(f.to_string(), "La/b;->chunks:[Ljava/lang/String;");
        assert!(FieldRef::parse("La/b;->x:Q").is_none());
        assert!(FieldRef::parse("La/b;->x").is_none());
    }

    #[test]
    fn test_access_flags() {
        let line = "private static final chunks:[Ljava/lang/String;";
        let mut tokens = line.split_whitespace();
        let (flags, rest) = AccessFlags::take_leading(&mut tokens);
        assert_eq!(
            flags,
            AccessFlags::PRIVATE | AccessFlags::STATIC | AccessFlags::FINAL
        );
        assert_eq!(rest, Some("chunks:[Ljava/lang/String;"));
    }
}
