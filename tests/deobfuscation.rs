//! End-to-end runs over the sample trees in `tests/samples`.
//!
//! Every test copies a sample tree into a temporary directory, runs the engine over the
//! copy and checks both the report and the bytes written. `tests/samples/expected`
//! holds the exact output for the `basic` tree.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use unparanoid::{
    deobfuscation::{DeobfuscationEngine, EngineConfig, SiteStatus, UnresolvedReason},
    Error,
};
use walkdir::WalkDir;

const ACCESSOR_FILE: &str = "io/michaelrocks/paranoid/Deobfuscator$app.smali";

/// A caller of the minified accessor whose method is never closed.
const UNTERMINATED_CALLER: &str = "\
.class public final Lb/b;
.super Ljava/lang/Object;

.method public static a()Ljava/lang/String;
    .registers 2

    const-wide v0, -0xffff6ff7L

    invoke-static {v0, v1}, La/a;->a(J)Ljava/lang/String;

    move-result-object v0

    return-object v0
";

fn samples() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/samples")
}

/// Copy `tests/samples/<name>` into a fresh temporary directory.
fn sample_tree(name: &str) -> TempDir {
    let source = samples().join(name);
    let dir = tempfile::tempdir().unwrap();
    for entry in WalkDir::new(&source) {
        let entry = entry.unwrap();
        let target = dir.path().join(entry.path().strip_prefix(&source).unwrap());
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).unwrap();
        } else {
            fs::copy(entry.path(), &target).unwrap();
        }
    }
    dir
}

/// Relative path and contents of every file under `root`.
fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .map(Result::unwrap)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(root).unwrap().to_path_buf(),
                fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

fn read(root: &Path, relative: &str) -> String {
    fs::read_to_string(root.join(relative)).unwrap()
}

fn expected(relative: &str) -> String {
    fs::read_to_string(samples().join("expected/basic").join(relative)).unwrap()
}

fn status<'a>(
    report: &'a unparanoid::deobfuscation::DeobfuscationReport,
    method: &str,
) -> &'a SiteStatus {
    &report
        .sites
        .iter()
        .find(|s| s.method.starts_with(method))
        .unwrap_or_else(|| panic!("no site in {method}"))
        .status
}

#[test]
fn test_basic_tree_matches_expected_output() {
    let dir = sample_tree("basic");
    let report = DeobfuscationEngine::default().process(dir.path()).unwrap();

    assert_eq!(report.files_scanned, 6);
    assert_eq!(report.rewritten(), 7);
    assert_eq!(report.unresolved(), 1);
    assert_eq!(report.errored(), 0);
    assert_eq!(report.malformed(), 0);

    for relative in ["com/example/Main.smali", "com/example/Direct.smali"] {
        assert_eq!(read(dir.path(), relative), expected(relative), "{relative}");
    }
}

#[test]
fn test_basic_tree_plaintexts() {
    let dir = sample_tree("basic");
    let report = DeobfuscationEngine::default().process(dir.path()).unwrap();

    let plaintext = |method: &str| {
        status(&report, method)
            .plaintext()
            .map(|s| s.to_string_lossy())
            .unwrap_or_else(|| panic!("{method} was not decoded"))
    };
    assert_eq!(plaintext("greet("), "Hello");
    assert_eq!(plaintext("greetAgain("), "Hello");
    assert_eq!(plaintext("guarded("), "guarded value");
    assert_eq!(plaintext("warmup("), "warm");
    assert_eq!(plaintext("ranged("), "ranged");
    assert_eq!(
        plaintext("symbols("),
        "Tab\t\"quoted\" back\\slash 'single' \u{e9} \u{1f600} line\n"
    );
}

#[test]
fn test_computed_key_is_left_untouched() {
    let dir = sample_tree("basic");
    let report = DeobfuscationEngine::default().process(dir.path()).unwrap();

    assert!(matches!(
        status(&report, "computed("),
        SiteStatus::Unresolved(UnresolvedReason::NonConstantKey)
    ));
    let main = read(dir.path(), "com/example/Main.smali");
    assert!(main.contains(
        "    add-long/2addr v0, p0\n\n    invoke-static {v0, v1}, \
         Lio/michaelrocks/paranoid/Deobfuscator$app;->getString(J)Ljava/lang/String;\n\n    \
         move-result-object v0\n"
    ));
}

#[test]
fn test_files_without_sites_are_not_written() {
    let dir = sample_tree("basic");
    let before = fs::metadata(dir.path().join("com/example/Plain.smali"))
        .unwrap()
        .modified()
        .unwrap();
    let report = DeobfuscationEngine::default().process(dir.path()).unwrap();

    assert_eq!(report.files_written(), 2);
    assert!(report
        .files
        .iter()
        .all(|f| !f.path.ends_with("com/example/Plain.smali")));
    assert_eq!(
        read(dir.path(), "com/example/Plain.smali"),
        fs::read_to_string(samples().join("basic/com/example/Plain.smali")).unwrap()
    );
    let after = fs::metadata(dir.path().join("com/example/Plain.smali"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_second_run_changes_nothing() {
    let dir = sample_tree("basic");
    let engine = DeobfuscationEngine::default();
    engine.process(dir.path()).unwrap();
    let first = snapshot(dir.path());

    let report = engine.process(dir.path()).unwrap();
    assert_eq!(report.rewritten(), 0);
    assert_eq!(report.unresolved(), 1);
    assert_eq!(report.files_written(), 0);
    assert_eq!(snapshot(dir.path()), first);
}

#[test]
fn test_out_of_range_site_does_not_stop_the_others() {
    let dir = sample_tree("out_of_range");
    let report = DeobfuscationEngine::default().process(dir.path()).unwrap();

    assert_eq!(report.rewritten(), 2);
    assert_eq!(report.errored(), 1);
    assert!(matches!(
        status(&report, "s1("),
        SiteStatus::Failed(Error::ChunkIndexOutOfRange { index: 5, len: 2 })
    ));

    let main = read(dir.path(), "com/example/Main.smali");
    assert!(main.contains("const-string v0, \"still fine\""));
    assert!(main.contains("const-string v0, \"second chunk\""));
    assert!(main.contains(
        "    const-wide v0, -0x9ffbfffffff9L\n\n    invoke-static {v0, v1}, \
         Lio/michaelrocks/paranoid/Deobfuscator$app;->getString(J)Ljava/lang/String;\n\n    \
         move-result-object v0\n"
    ));
}

#[test]
fn test_minified_names() {
    let dir = sample_tree("minified");
    let report = DeobfuscationEngine::default().process(dir.path()).unwrap();

    assert_eq!(report.rewritten(), 1);
    assert!(report.is_clean());
    assert!(read(dir.path(), "b/a.smali").contains("    const-string v0, \"minified\"\n"));
}

#[test]
fn test_prune_removes_accessor_once_every_site_is_decoded() {
    let dir = sample_tree("minified");
    let engine = DeobfuscationEngine::new(EngineConfig::default().with_pruning(true));
    let report = engine.process(dir.path()).unwrap();

    assert!(report.is_clean());
    let accessor = report
        .files
        .iter()
        .find(|f| f.path.ends_with("a/a.smali"))
        .unwrap();
    assert_eq!(accessor.pruned.len(), 3);

    let source = read(dir.path(), "a/a.smali");
    assert!(source.starts_with(".class public final La/a;"));
    assert!(!source.contains("a(J)Ljava/lang/String;"));
    assert!(!source.contains("<clinit>"));
    assert!(!source.contains(".field"));
    assert!(source.contains(".method private constructor <init>()V"));
}

#[test]
fn test_prune_keeps_accessor_with_failed_sites() {
    let dir = sample_tree("out_of_range");
    let original = read(dir.path(), ACCESSOR_FILE);
    let engine = DeobfuscationEngine::new(EngineConfig::default().with_pruning(true));
    let report = engine.process(dir.path()).unwrap();

    assert_eq!(report.errored(), 1);
    assert_eq!(read(dir.path(), ACCESSOR_FILE), original);
}

#[test]
fn test_prune_skipped_when_a_caller_is_unreadable() {
    let dir = sample_tree("minified");
    fs::write(dir.path().join("b/b.smali"), UNTERMINATED_CALLER).unwrap();
    let accessor = read(dir.path(), "a/a.smali");

    let engine = DeobfuscationEngine::new(EngineConfig::default().with_pruning(true));
    let report = engine.process(dir.path()).unwrap();

    assert_eq!(report.malformed(), 1);
    assert_eq!(report.rewritten(), 1);
    assert!(report.files.iter().all(|f| f.pruned.is_empty()));
    assert_eq!(read(dir.path(), "a/a.smali"), accessor);
    assert_eq!(read(dir.path(), "b/b.smali"), UNTERMINATED_CALLER);
    assert!(read(dir.path(), "b/a.smali").contains("    const-string v0, \"minified\"\n"));
}

#[test]
fn test_strict_mode_writes_nothing() {
    let dir = sample_tree("basic");
    let before = snapshot(dir.path());
    let engine = DeobfuscationEngine::new(EngineConfig::strict());

    let result = engine.process(dir.path());
    assert!(matches!(
        result,
        Err(Error::StrictModeViolation {
            unresolved: 1,
            errored: 0,
            unsupported: 0,
            malformed: 0,
        })
    ));
    assert_eq!(snapshot(dir.path()), before);
}

#[test]
fn test_strict_mode_passes_clean_tree() {
    let dir = sample_tree("minified");
    let report = DeobfuscationEngine::new(EngineConfig::strict())
        .process(dir.path())
        .unwrap();
    assert_eq!(report.rewritten(), 1);
}

#[test]
fn test_output_dir_mirrors_input() {
    let dir = sample_tree("basic");
    let before = snapshot(dir.path());
    let out = tempfile::tempdir().unwrap();
    let target = out.path().join("mirror");

    let engine = DeobfuscationEngine::new(EngineConfig::default().with_output_dir(&target));
    let report = engine.process(dir.path()).unwrap();

    assert_eq!(report.files_written(), 6);
    assert_eq!(snapshot(dir.path()), before);
    assert_eq!(
        read(&target, "com/example/Main.smali"),
        expected("com/example/Main.smali")
    );
    assert_eq!(
        read(&target, "com/example/Plain.smali"),
        read(dir.path(), "com/example/Plain.smali")
    );
    assert_eq!(
        read(&target, ACCESSOR_FILE),
        read(dir.path(), ACCESSOR_FILE)
    );
}

#[test]
fn test_output_dir_copies_unreadable_files() {
    let dir = sample_tree("minified");
    fs::write(dir.path().join("b/b.smali"), UNTERMINATED_CALLER).unwrap();
    let out = tempfile::tempdir().unwrap();

    let engine = DeobfuscationEngine::new(EngineConfig::default().with_output_dir(out.path()));
    let report = engine.process(dir.path()).unwrap();

    assert_eq!(report.malformed(), 1);
    assert_eq!(report.files_written(), 5);
    assert_eq!(read(out.path(), "b/b.smali"), UNTERMINATED_CALLER);
    assert!(read(out.path(), "b/a.smali").contains("\"minified\""));
}

#[test]
fn test_dry_run_reports_without_writing() {
    let dir = sample_tree("basic");
    let before = snapshot(dir.path());
    let engine = DeobfuscationEngine::new(EngineConfig::default().with_dry_run(true));

    let report = engine.process(dir.path()).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.rewritten(), 7);
    assert_eq!(report.files_written(), 0);
    assert_eq!(snapshot(dir.path()), before);
}

#[test]
fn test_single_file_target() {
    let dir = sample_tree("basic");
    let main = dir.path().join("com/example/Main.smali");
    let original = fs::read_to_string(&main).unwrap();

    let report = DeobfuscationEngine::default().process(&main).unwrap();
    assert_eq!(report.files_scanned, 1);
    assert!(report.sites.is_empty());
    assert!(report.descriptors.is_empty());
    assert_eq!(fs::read_to_string(&main).unwrap(), original);
}
