//! Rewrite plans and call-site patching.
//!
//! A [`RewritePlan`] collects byte-span replacements against one file's source. Spans
//! are validated (in bounds, non-overlapping) and applied from the end of the file
//! backwards, so every byte outside a span is carried over verbatim.
//!
//! [`rewrite_site`] turns a decoded call site into edits:
//!
//! ```text
//!   const-wide v0, -0x...L                 const-wide v0, -0x...L
//!   invoke-static {v0, v1}, L..;->d(J)..   const-string v0, "Hello"
//!                                   ──►
//!   move-result-object v0
//! ```
//!
//! The key load is left in place; it is dead afterwards but removing it would need
//! liveness information the engine does not compute.

use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use crate::{
    deobfuscation::locator::CallSite,
    smali::{literal, SmaliFile},
    Error, Result,
};

/// One replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    /// Byte span in the original source
    pub span: Range<usize>,
    /// Replacement text
    pub replacement: String,
}

/// Ordered set of non-overlapping edits against one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewritePlan {
    path: PathBuf,
    edits: Vec<Edit>,
}

impl RewritePlan {
    /// Create an empty plan for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            edits: Vec::new(),
        }
    }

    /// The file this plan applies to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add an edit. Ordering is established by [`RewritePlan::validate`].
    pub fn push(&mut self, span: Range<usize>, replacement: impl Into<String>) {
        self.edits.push(Edit {
            span,
            replacement: replacement.into(),
        });
    }

    /// Add several edits.
    pub fn extend(&mut self, edits: impl IntoIterator<Item = Edit>) {
        self.edits.extend(edits);
    }

    /// The edits, sorted once the plan has been validated.
    #[must_use]
    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    /// Number of edits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Returns `true` if the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Returns `true` if `span` overlaps an edit already in the plan.
    #[must_use]
    pub fn overlaps(&self, span: &Range<usize>) -> bool {
        self.edits
            .iter()
            .any(|e| span.start < e.span.end && e.span.start < span.end)
    }

    /// Sort the edits and check that they are non-overlapping and lie within
    /// `source_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRewritePlan`] naming the first offending pair. An edit
    /// running past the end of the source is reported against the empty span at
    /// `source_len`.
    pub fn validate(&mut self, source_len: usize) -> Result<()> {
        self.edits
            .sort_by(|a, b| (a.span.start, a.span.end).cmp(&(b.span.start, b.span.end)));

        for edit in &self.edits {
            if edit.span.start > edit.span.end || edit.span.end > source_len {
                return Err(Error::InvalidRewritePlan {
                    first: edit.span.clone(),
                    second: source_len..source_len,
                });
            }
        }
        for pair in self.edits.windows(2) {
            if pair[0].span.end > pair[1].span.start {
                return Err(Error::InvalidRewritePlan {
                    first: pair[0].span.clone(),
                    second: pair[1].span.clone(),
                });
            }
        }
        Ok(())
    }

    /// Apply the plan to `source`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRewritePlan`] if validation fails or a span does not fall
    /// on character boundaries.
    pub fn apply(&mut self, source: &str) -> Result<String> {
        self.validate(source.len())?;

        let mut output = source.to_string();
        for edit in self.edits.iter().rev() {
            if !output.is_char_boundary(edit.span.start) || !output.is_char_boundary(edit.span.end)
            {
                return Err(Error::InvalidRewritePlan {
                    first: edit.span.clone(),
                    second: edit.span.clone(),
                });
            }
            output.replace_range(edit.span.clone(), &edit.replacement);
        }
        Ok(output)
    }
}

/// Render `plaintext` as a quoted smali literal and check that it parses back.
///
/// # Errors
///
/// Returns [`Error::EscapeOverflow`] if the literal does not round-trip.
pub fn render_literal(plaintext: &[u16]) -> Result<String> {
    let quoted = literal::quote(plaintext);
    let body = &quoted[1..quoted.len() - 1];
    match literal::unescape(body) {
        Ok(parsed) if parsed.as_slice() == plaintext => Ok(quoted),
        _ => Err(Error::EscapeOverflow {
            units: plaintext.len(),
        }),
    }
}

/// Compute the edits replacing a decoded call site by a literal load.
///
/// - `invoke` and `move-result-object` separated only by blank lines or comments
///   collapse into one `const-string` line.
/// - If labels or directives sit in between, the invoke becomes `nop` and the
///   `move-result-object` line becomes the `const-string`.
/// - A call whose result is unused becomes `nop`.
///
/// # Errors
///
/// Returns [`Error::EscapeOverflow`] if the plaintext cannot be rendered.
pub fn rewrite_site(file: &SmaliFile, site: &CallSite, plaintext: &[u16]) -> Result<Vec<Edit>> {
    let literal = render_literal(plaintext)?;
    let invoke = &file.lines[site.invoke];

    let edits = match site.result {
        Some(result) if !site.bridged => {
            let indent = &file.source()[invoke.span.start..invoke.span.start + invoke.indent];
            vec![Edit {
                span: invoke.span.start..file.lines[result.line].span.end,
                replacement: format!("{indent}const-string {}, {literal}", result.register),
            }]
        }
        Some(result) => vec![
            Edit {
                span: invoke.content_span(),
                replacement: "nop".to_string(),
            },
            Edit {
                span: file.lines[result.line].content_span(),
                replacement: format!("const-string {}, {literal}", result.register),
            },
        ],
        None => vec![Edit {
            span: invoke.content_span(),
            replacement: "nop".to_string(),
        }],
    };
    Ok(edits)
}
