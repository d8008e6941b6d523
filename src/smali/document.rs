//! Line-oriented parse of a single smali file.
//!
//! Every input line is kept with its exact byte span so that later rewrites can
//! splice replacement text into the original source without reformatting anything
//! else. The structural view (class, fields, methods) indexes into that line list.
//!
//! ```text
//!  source ──► lines[0..n]  (span, number, kind)
//!                 ▲    ▲
//!   FieldDecl ────┘    └──── MethodDef { start: `.method` line, end: `.end method` line }
//! ```

use std::ops::Range;

use crate::{
    smali::{
        instruction::{Instruction, Register},
        types::{AccessFlags, ClassId, FieldRef, MethodRef},
    },
    Result,
};

/// Directives the engine distinguishes. Everything else is [`Directive::Other`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `.class`
    Class,
    /// `.super`
    Super,
    /// `.field`
    Field,
    /// `.end field`
    EndField,
    /// `.method`
    Method,
    /// `.end method`
    EndMethod,
    /// `.locals N`
    Locals(u32),
    /// `.registers N`
    Registers(u32),
    /// `.catch` / `.catchall`
    Catch,
    /// Opening line of an annotation or payload block
    BlockStart,
    /// Closing line of an annotation or payload block
    BlockEnd,
    /// Any other directive (`.line`, `.source`, `.param`, `.local`, ...)
    Other(String),
}

/// Classification of a source line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// Whitespace only
    Blank,
    /// A full-line comment
    Comment,
    /// A label such as `:cond_0` or `:try_start_1`
    Label(String),
    /// A directive
    Directive(Directive),
    /// A decoded instruction
    Instruction(Instruction),
    /// Body of an annotation or payload block, not interpreted
    Opaque,
}

/// One line of the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// 1-based line number
    pub number: usize,
    /// Byte span of the line content, excluding the line terminator
    pub span: Range<usize>,
    /// Byte length of the leading indentation
    pub indent: usize,
    /// What the line holds
    pub kind: LineKind,
}

impl Line {
    /// The instruction on this line, if any.
    #[must_use]
    pub fn instruction(&self) -> Option<&Instruction> {
        match &self.kind {
            LineKind::Instruction(instr) => Some(instr),
            _ => None,
        }
    }

    /// Span of the line content after its indentation.
    #[must_use]
    pub fn content_span(&self) -> Range<usize> {
        self.span.start + self.indent..self.span.end
    }

    /// Returns `true` for lines with no effect on the program (blank lines and comments).
    #[must_use]
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, LineKind::Blank | LineKind::Comment)
    }
}

/// Mapping from `vN`/`pN` operands to frame slots for one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterFrame {
    /// Number of non-parameter registers, if `.locals` or `.registers` was seen
    pub locals: Option<u32>,
    /// Register words taken by the parameters, including `this`
    pub ins: u32,
}

impl RegisterFrame {
    /// Slot base for parameter registers when the frame size is unknown.
    const DETACHED_PARAMS: u32 = 0x1_0000;

    /// Normalise a register to a frame slot so that `pN` and its `vM` alias compare equal.
    #[must_use]
    pub fn slot(&self, reg: Register) -> u32 {
        match reg {
            Register::Local(n) => u32::from(n),
            Register::Param(n) => match self.locals {
                Some(locals) => locals + u32::from(n),
                None => Self::DETACHED_PARAMS + u32::from(n),
            },
        }
    }
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    /// The declared field
    pub field: FieldRef,
    /// Modifiers
    pub flags: AccessFlags,
    /// Index of the `.field` line
    pub start: usize,
    /// Index of the last line belonging to the declaration (`.end field` if present)
    pub end: usize,
}

/// A method definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// The method signature
    pub method: MethodRef,
    /// Modifiers
    pub flags: AccessFlags,
    /// Index of the `.method` line
    pub start: usize,
    /// Index of the `.end method` line
    pub end: usize,
    /// Register layout
    pub frame: RegisterFrame,
}

impl MethodDef {
    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(AccessFlags::STATIC)
    }

    /// Returns `true` for the static initializer.
    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        self.method.name == "<clinit>"
    }

    /// Line indices of the method body, between `.method` and `.end method`.
    #[must_use]
    pub fn body(&self) -> Range<usize> {
        self.start + 1..self.end
    }
}

/// A parsed smali file. Owns its source text.
#[derive(Debug, Clone)]
pub struct SmaliFile {
    source: String,
    /// The declared class
    pub class: ClassId,
    /// Class modifiers
    pub flags: AccessFlags,
    /// All source lines, in order
    pub lines: Vec<Line>,
    /// Field declarations, in order
    pub fields: Vec<FieldDecl>,
    /// Method definitions, in order
    pub methods: Vec<MethodDef>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Block {
    Annotation(usize),
    Payload,
}

impl SmaliFile {
    /// Parse a smali file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] with the offending line number when the
    /// `.class` header is missing or duplicated, methods are nested or unterminated, a
    /// block is unterminated, or a recognised instruction has malformed operands.
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();

        let mut lines: Vec<Line> = Vec::new();
        let mut class: Option<(ClassId, AccessFlags)> = None;
        let mut fields: Vec<FieldDecl> = Vec::new();
        let mut methods: Vec<MethodDef> = Vec::new();
        let mut open_method: Option<MethodDef> = None;
        let mut open_field: Option<usize> = None;
        let mut block: Option<Block> = None;

        let mut offset = 0usize;
        for (idx, raw) in source.split_inclusive('\n').enumerate() {
            let number = idx + 1;
            let content = raw.trim_end_matches(['\n', '\r']);
            let span = offset..offset + content.len();
            offset += raw.len();

            let indent = content.len() - content.trim_start().len();
            let text = strip_comment(content.trim_start()).trim_end();
            let at = |e: crate::Error| e.at_line(number);

            let kind = if let Some(current) = block {
                classify_in_block(text, current, &mut block)
            } else if text.is_empty() {
                if content.trim_start().starts_with('#') {
                    LineKind::Comment
                } else {
                    LineKind::Blank
                }
            } else if let Some(label) = text.strip_prefix(':') {
                LineKind::Label(label.to_string())
            } else if text.starts_with('.') {
                let directive = parse_directive(text).map_err(at)?;
                match &directive {
                    Directive::Class => {
                        if class.is_some() {
                            return Err(malformed_error!(number, "duplicate .class directive"));
                        }
                        class = Some(parse_class_header(text).map_err(at)?);
                    }
                    Directive::Field => {
                        if open_method.is_some() {
                            return Err(malformed_error!(number, ".field inside a method"));
                        }
                        let Some((class_id, _)) = &class else {
                            return Err(malformed_error!(number, ".field before .class"));
                        };
                        let (field, flags) = parse_field_header(class_id, text).map_err(at)?;
                        fields.push(FieldDecl {
                            field,
                            flags,
                            start: idx,
                            end: idx,
                        });
                        open_field = Some(fields.len() - 1);
                    }
                    Directive::EndField => {
                        if let Some(field) = open_field.take() {
                            fields[field].end = idx;
                        }
                    }
                    Directive::Method => {
                        if open_method.is_some() {
                            return Err(malformed_error!(number, "nested .method directive"));
                        }
                        let Some((class_id, _)) = &class else {
                            return Err(malformed_error!(number, ".method before .class"));
                        };
                        open_method = Some(parse_method_header(class_id, text, idx).map_err(at)?);
                    }
                    Directive::EndMethod => {
                        let Some(mut method) = open_method.take() else {
                            return Err(malformed_error!(number, ".end method without .method"));
                        };
                        method.end = idx;
                        methods.push(method);
                    }
                    Directive::Locals(count) => {
                        if let Some(method) = open_method.as_mut() {
                            method.frame.locals = Some(*count);
                        }
                    }
                    Directive::Registers(count) => {
                        if let Some(method) = open_method.as_mut() {
                            method.frame.locals = Some(count.saturating_sub(method.frame.ins));
                        }
                    }
                    Directive::BlockStart => {
                        block = Some(if text.starts_with(".annotation")
                            || text.starts_with(".subannotation")
                        {
                            Block::Annotation(0)
                        } else {
                            Block::Payload
                        });
                    }
                    _ => {}
                }
                if !matches!(
                    directive,
                    Directive::Field | Directive::EndField | Directive::BlockStart
                ) {
                    open_field = None;
                }
                LineKind::Directive(directive)
            } else {
                if open_method.is_none() {
                    return Err(malformed_error!(number, "instruction outside of a method"));
                }
                LineKind::Instruction(Instruction::parse(text).map_err(at)?)
            };

            lines.push(Line {
                number,
                span,
                indent,
                kind,
            });
        }

        if block.is_some() {
            return Err(malformed_error!(lines.len(), "unterminated block at end of file"));
        }
        if let Some(method) = open_method {
            return Err(malformed_error!(
                lines.len(),
                "method {} is missing .end method",
                method.method.member()
            ));
        }
        let Some((class, flags)) = class else {
            return Err(malformed_error!(0, "missing .class directive"));
        };

        Ok(Self {
            source,
            class,
            flags,
            lines,
            fields,
            methods,
        })
    }

    /// The full source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Text of a line, excluding its terminator.
    #[must_use]
    pub fn text(&self, line: &Line) -> &str {
        &self.source[line.span.clone()]
    }

    /// Byte span covering lines `first..=last` including the terminator of `last`.
    #[must_use]
    pub fn full_span(&self, first: usize, last: usize) -> Range<usize> {
        let start = self.lines[first].span.start;
        let end = match self.lines.get(last + 1) {
            Some(next) => next.span.start,
            None => self.source.len(),
        };
        start..end
    }

    /// Look up a method by signature.
    #[must_use]
    pub fn method(&self, method: &MethodRef) -> Option<&MethodDef> {
        self.methods.iter().find(|m| &m.method == method)
    }

    /// Look up a field declaration.
    #[must_use]
    pub fn field(&self, field: &FieldRef) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| &f.field == field)
    }

    /// The static initializer, if declared.
    #[must_use]
    pub fn class_initializer(&self) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.is_class_initializer())
    }

    /// Instructions of a method body with their line indices.
    pub fn instructions<'a>(
        &'a self,
        method: &'a MethodDef,
    ) -> impl Iterator<Item = (usize, &'a Instruction)> + 'a {
        method
            .body()
            .filter_map(move |idx| self.lines[idx].instruction().map(|instr| (idx, instr)))
    }
}

fn classify_in_block(text: &str, current: Block, block: &mut Option<Block>) -> LineKind {
    match current {
        Block::Annotation(depth) => {
            if text.starts_with(".subannotation") {
                *block = Some(Block::Annotation(depth + 1));
            } else if text.starts_with(".end subannotation") {
                *block = Some(Block::Annotation(depth.saturating_sub(1)));
            } else if text.starts_with(".end annotation") && depth == 0 {
                *block = None;
                return LineKind::Directive(Directive::BlockEnd);
            }
            LineKind::Opaque
        }
        Block::Payload => {
            if text.starts_with(".end array-data")
                || text.starts_with(".end packed-switch")
                || text.starts_with(".end sparse-switch")
            {
                *block = None;
                return LineKind::Directive(Directive::BlockEnd);
            }
            LineKind::Opaque
        }
    }
}

fn parse_directive(text: &str) -> Result<Directive> {
    let mut tokens = text.split_whitespace();
    let name = tokens.next().unwrap_or(text);
    let directive = match name {
        ".class" => Directive::Class,
        ".super" => Directive::Super,
        ".field" => Directive::Field,
        ".method" => Directive::Method,
        ".catch" | ".catchall" => Directive::Catch,
        ".annotation" | ".subannotation" | ".array-data" | ".packed-switch" | ".sparse-switch" => {
            Directive::BlockStart
        }
        ".locals" | ".registers" => {
            let count = tokens
                .next()
                .and_then(crate::smali::literal::parse_integer)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| malformed_error!(0, "{} needs a register count", name))?;
            if name == ".locals" {
                Directive::Locals(count)
            } else {
                Directive::Registers(count)
            }
        }
        ".end" => match tokens.next() {
            Some("method") => Directive::EndMethod,
            Some("field") => Directive::EndField,
            Some(other) => Directive::Other(format!(".end {other}")),
            None => return Err(malformed_error!(0, "bare .end directive")),
        },
        other => Directive::Other(other.to_string()),
    };
    Ok(directive)
}

fn parse_class_header(text: &str) -> Result<(ClassId, AccessFlags)> {
    let mut tokens = text.split_whitespace().skip(1);
    let (flags, descriptor) = AccessFlags::take_leading(&mut tokens);
    let class = descriptor
        .and_then(ClassId::parse)
        .ok_or_else(|| malformed_error!(0, "bad .class directive"))?;
    Ok((class, flags))
}

fn parse_field_header(class: &ClassId, text: &str) -> Result<(FieldRef, AccessFlags)> {
    let declaration = text.split(" = ").next().unwrap_or(text);
    let mut tokens = declaration.split_whitespace().skip(1);
    let (flags, member) = AccessFlags::take_leading(&mut tokens);
    let member = member.ok_or_else(|| malformed_error!(0, "bad .field directive"))?;
    let field = FieldRef::parse(&format!("{class}->{member}"))
        .ok_or_else(|| malformed_error!(0, "bad .field directive '{}'", member))?;
    Ok((field, flags))
}

fn parse_method_header(class: &ClassId, text: &str, idx: usize) -> Result<MethodDef> {
    let mut tokens = text.split_whitespace().skip(1);
    let (flags, member) = AccessFlags::take_leading(&mut tokens);
    let method = member
        .and_then(|m| MethodRef::parse_member(class.clone(), m))
        .ok_or_else(|| malformed_error!(0, "bad .method directive"))?;

    let this_word = u32::from(!flags.contains(AccessFlags::STATIC));
    let ins = u32::try_from(method.param_words()).unwrap_or(u32::MAX) + this_word;

    Ok(MethodDef {
        method,
        flags,
        start: idx,
        end: idx,
        frame: RegisterFrame { locals: None, ins },
    })
}

/// Remove a trailing `#` comment, ignoring `#` inside string and char literals.
fn strip_comment(text: &str) -> &str {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'#' => return &text[..i],
            _ => {}
        }
        i += 1;
    }
    text
}
