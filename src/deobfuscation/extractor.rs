//! Resolution of a call site's chunk binding to concrete chunk values.

use std::{ops::Deref, sync::Arc};

use crate::{
    deobfuscation::{
        index::{ChunkTable, DescriptorIndex},
        locator::{CallSite, ChunkBinding, ChunkRef, UnresolvedReason},
    },
    smali::JavaString,
    Error, Result,
};

/// Ordered chunk values for one call site.
///
/// Whole-table bindings share the table held by the index instead of copying it.
#[derive(Debug, Clone)]
pub enum Chunks {
    /// A whole chunk table
    Table(Arc<ChunkTable>),
    /// Values collected from a locally built array
    Owned(Vec<JavaString>),
}

impl Deref for Chunks {
    type Target = [JavaString];

    fn deref(&self) -> &[JavaString] {
        match self {
            Chunks::Table(table) => &table.chunks,
            Chunks::Owned(chunks) => chunks,
        }
    }
}

/// Look up the chunk values bound at `site`.
///
/// # Errors
///
/// - [`Error::UnresolvedCallSite`] if the site was not resolved by the locator, an
///   array element is unknown or a referenced table is not in the index
/// - [`Error::ChunkIndexOutOfRange`] if a table entry index is outside its table
pub fn extract(site: &CallSite, index: &DescriptorIndex) -> Result<Chunks> {
    if let Some(reason) = site.unresolved {
        return Err(Error::UnresolvedCallSite(reason));
    }

    match &site.chunks {
        None => Err(Error::UnresolvedCallSite(UnresolvedReason::NonConstantChunks)),
        Some(ChunkBinding::Table(field)) => index
            .table(field)
            .map(Chunks::Table)
            .ok_or(Error::UnresolvedCallSite(UnresolvedReason::MissingChunkTable)),
        Some(ChunkBinding::Elements(elements)) => {
            let mut chunks = Vec::with_capacity(elements.len());
            for element in elements {
                chunks.push(resolve_element(element.as_ref(), index)?);
            }
            Ok(Chunks::Owned(chunks))
        }
    }
}

fn resolve_element(element: Option<&ChunkRef>, index: &DescriptorIndex) -> Result<JavaString> {
    match element {
        None => Err(Error::UnresolvedCallSite(UnresolvedReason::NonConstantChunks)),
        Some(ChunkRef::Literal(value)) => Ok(value.clone()),
        Some(ChunkRef::Table { field, index: at }) => {
            let table = index
                .table(field)
                .ok_or(Error::UnresolvedCallSite(UnresolvedReason::MissingChunkTable))?;
            usize::try_from(*at)
                .ok()
                .and_then(|i| table.chunks.get(i))
                .cloned()
                .ok_or(Error::ChunkIndexOutOfRange {
                    index: *at,
                    len: table.chunks.len(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smali::{ClassId, FieldRef, MethodRef};
    use std::path::PathBuf;

    fn table_field() -> FieldRef {
        FieldRef::parse("La/B;->t:[Ljava/lang/String;").unwrap()
    }

    fn index() -> DescriptorIndex {
        let index = DescriptorIndex::new();
        index.insert_table(ChunkTable {
            field: table_field(),
            chunks: vec![JavaString::from_str("Hel"), JavaString::from_str("lo")],
            path: PathBuf::from("B.smali"),
            prunable_initializer: true,
        });
        index
    }

    fn site(chunks: Option<ChunkBinding>) -> CallSite {
        CallSite {
            path: PathBuf::from("Main.smali"),
            line: 10,
            method: MethodRef::parse("LMain;->run()V").unwrap(),
            decoder: ClassId::parse("La/B;").unwrap(),
            target: MethodRef::parse("La/B;->d(J[Ljava/lang/String;)Ljava/lang/String;")
                .unwrap(),
            key: Some(7),
            chunks,
            invoke: 4,
            result: None,
            bridged: false,
            unresolved: None,
        }
    }

    fn entry(index: i64) -> Option<ChunkRef> {
        Some(ChunkRef::Table {
            field: table_field(),
            index,
        })
    }

    #[test]
    fn test_whole_table() {
        let chunks = extract(&site(Some(ChunkBinding::Table(table_field()))), &index()).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks, Chunks::Table(_)));
    }

    #[test]
    fn test_table_entries_in_order() {
        let binding = ChunkBinding::Elements(vec![
            entry(1),
            Some(ChunkRef::Literal(JavaString::from_str("x"))),
            entry(0),
        ]);
        let chunks = extract(&site(Some(binding)), &index()).unwrap();
        assert_eq!(
            &*chunks,
            &[
                JavaString::from_str("lo"),
                JavaString::from_str("x"),
                JavaString::from_str("Hel")
            ]
        );
    }

    #[test]
    fn test_out_of_range_entry() {
        let binding = ChunkBinding::Elements(vec![entry(0), entry(5)]);
        match extract(&site(Some(binding)), &index()) {
            Err(Error::ChunkIndexOutOfRange { index, len }) => {
                assert_eq!(index, 5);
                assert_eq!(len, 2);
            }
            other => panic!("unexpected {other:?}"),
        }

        let binding = ChunkBinding::Elements(vec![entry(-1)]);
        assert!(matches!(
            extract(&site(Some(binding)), &index()),
            Err(Error::ChunkIndexOutOfRange { index: -1, .. })
        ));
    }

    #[test]
    fn test_unknown_inputs() {
        let binding = ChunkBinding::Elements(vec![entry(0), None]);
        assert!(matches!(
            extract(&site(Some(binding)), &index()),
            Err(Error::UnresolvedCallSite(UnresolvedReason::NonConstantChunks))
        ));

        let missing = FieldRef::parse("La/B;->other:[Ljava/lang/String;").unwrap();
        assert!(matches!(
            extract(&site(Some(ChunkBinding::Table(missing))), &index()),
            Err(Error::UnresolvedCallSite(UnresolvedReason::MissingChunkTable))
        ));

        let mut unresolved = site(None);
        unresolved.unresolved = Some(UnresolvedReason::NonConstantKey);
        assert!(matches!(
            extract(&unresolved, &index()),
            Err(Error::UnresolvedCallSite(UnresolvedReason::NonConstantKey))
        ));
    }
}
