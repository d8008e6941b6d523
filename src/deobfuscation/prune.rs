//! Optional removal of decoders whose call sites were all rewritten.
//!
//! Pruning only ever adds deletions to an existing plan; with pruning disabled the
//! primary rewrite is unchanged.

use std::sync::Arc;

use crate::{
    deobfuscation::{
        index::{DecoderDescriptor, DescriptorIndex},
        patcher::RewritePlan,
    },
    smali::SmaliFile,
};

/// Extend `plan` with deletions of dead decoder code declared in `file`.
///
/// For every descriptor in `removable` declared by this file, the accessor method is
/// deleted. The class initializer and the chunk table fields are deleted as well when
/// the initializer does nothing but build chunk tables, every table it builds belongs
/// to a removed accessor, and no method other than a removed accessor loads a table.
///
/// Returns the extended plan and the removed members.
#[must_use]
pub fn prune(
    file: &SmaliFile,
    index: &DescriptorIndex,
    removable: &[Arc<DecoderDescriptor>],
    mut plan: RewritePlan,
) -> (RewritePlan, Vec<String>) {
    let mut removed = Vec::new();

    let local: Vec<&Arc<DecoderDescriptor>> = removable
        .iter()
        .filter(|d| d.class == file.class)
        .collect();
    if local.is_empty() {
        return (plan, removed);
    }

    let mut removed_accessors = Vec::new();
    for descriptor in &local {
        let Some(method) = file.method(&descriptor.accessor) else {
            continue;
        };
        let span = file.full_span(method.start, method.end);
        if plan.overlaps(&span) {
            continue;
        }
        plan.push(span, "");
        removed.push(descriptor.accessor.member());
        removed_accessors.push(Arc::clone(descriptor));
    }

    let declared: Vec<_> = index
        .tables()
        .into_iter()
        .filter(|t| t.field.class == file.class)
        .collect();
    let all_dead = !declared.is_empty()
        && declared.iter().all(|table| {
            table.prunable_initializer
                && removed_accessors
                    .iter()
                    .any(|d| d.table.as_ref() == Some(&table.field))
                && index
                    .descriptors()
                    .iter()
                    .filter(|d| d.table.as_ref() == Some(&table.field))
                    .all(|d| removed_accessors.iter().any(|r| r.class == d.class))
                && index
                    .table_readers(&table.field)
                    .iter()
                    .all(|m| removed_accessors.iter().any(|r| r.accessor == *m))
        });

    if all_dead {
        if let Some(clinit) = file.class_initializer() {
            let span = file.full_span(clinit.start, clinit.end);
            if !plan.overlaps(&span) {
                plan.push(span, "");
                removed.push(clinit.method.member());

                for table in &declared {
                    if let Some(decl) = file.field(&table.field) {
                        let span = file.full_span(decl.start, decl.end);
                        if !plan.overlaps(&span) {
                            plan.push(span, "");
                            removed.push(format!("{}:{}", table.field.name, table.field.ty));
                        }
                    }
                }
            }
        }
    }

    (plan, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        deobfuscation::{events::EventLog, scanner::scan, scheme::DecoderRegistry},
        smali::{ClassId, JavaString},
        test::smali::{accessor_class, helper_class, random_helper_class},
    };
    use std::path::Path;

    const ACCESSOR: &str = "Lio/michaelrocks/paranoid/Deobfuscator$app;";

    fn setup(accessor_source: &str) -> (SmaliFile, DescriptorIndex) {
        let registry = DecoderRegistry::new();
        let accessor = SmaliFile::parse(accessor_source).unwrap();
        let mut outputs = vec![scan(&accessor, Path::new("D.smali"), &registry)];
        for source in [helper_class(), random_helper_class()] {
            let file = SmaliFile::parse(source).unwrap();
            outputs.push(scan(&file, Path::new("H.smali"), &registry));
        }
        let index = DescriptorIndex::link(outputs, &registry, 4, &EventLog::new());
        (accessor, index)
    }

    #[test]
    fn test_prune_accessor_table_and_initializer() {
        let chunks = vec![JavaString::from_str("abc")];
        let (file, index) = setup(&accessor_class(ACCESSOR, "chunks", &chunks));
        index.record_success(&ClassId::parse(ACCESSOR).unwrap());

        let removable = index.removable_decoders();
        let (mut plan, removed) = prune(&file, &index, &removable, RewritePlan::new("D.smali"));
        assert_eq!(removed.len(), 3);

        let out = plan.apply(file.source()).unwrap();
        assert!(!out.contains("getString"));
        assert!(!out.contains("<clinit>"));
        assert!(!out.contains(".field"));
        assert!(out.starts_with(".class"));
    }

    #[test]
    fn test_prune_keeps_impure_initializer() {
        let chunks = vec![JavaString::from_str("abc")];
        let source = accessor_class(ACCESSOR, "chunks", &chunks).replace(
            "    return-void",
            "    invoke-static {}, Lcom/example/Init;->run()V\n    return-void",
        );
        let (file, index) = setup(&source);
        index.record_success(&ClassId::parse(ACCESSOR).unwrap());

        let removable = index.removable_decoders();
        let (mut plan, removed) = prune(&file, &index, &removable, RewritePlan::new("D.smali"));
        assert_eq!(removed, vec!["getString(J)Ljava/lang/String;".to_string()]);
        let out = plan.apply(file.source()).unwrap();
        assert!(out.contains("<clinit>"));
        assert!(out.contains(".field"));
    }

    #[test]
    fn test_prune_keeps_table_read_elsewhere() {
        let chunks = vec![JavaString::from_str("abc")];
        let source = format!(
            "{}\n.method public static count()I\n    .registers 1\n\n    \
             sget-object v0, {ACCESSOR}->chunks:[Ljava/lang/String;\n\n    \
             array-length v0, v0\n\n    return v0\n.end method\n",
            accessor_class(ACCESSOR, "chunks", &chunks)
        );
        let (file, index) = setup(&source);
        index.record_success(&ClassId::parse(ACCESSOR).unwrap());

        let removable = index.removable_decoders();
        let (mut plan, removed) = prune(&file, &index, &removable, RewritePlan::new("D.smali"));
        assert_eq!(removed, vec!["getString(J)Ljava/lang/String;".to_string()]);

        let out = plan.apply(file.source()).unwrap();
        assert!(!out.contains("getString"));
        assert!(out.contains("<clinit>"));
        assert!(out.contains(".field"));
        assert!(out.contains(".method public static count()I"));
    }

    #[test]
    fn test_nothing_removable() {
        let chunks = vec![JavaString::from_str("abc")];
        let (file, index) = setup(&accessor_class(ACCESSOR, "chunks", &chunks));
        let (plan, removed) = prune(&file, &index, &[], RewritePlan::new("D.smali"));
        assert!(plan.is_empty());
        assert!(removed.is_empty());
    }
}
