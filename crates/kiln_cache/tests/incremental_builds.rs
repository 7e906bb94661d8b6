//! End-to-end scenarios: several builds of one target sharing both stores.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kiln_cache::{
    source_state_metadata, CacheError, ConfigurationCategory, ConfigurationDigestContainer,
    RebuildHeuristic, SourceDescriptor, SourceStateStore, TargetStatsStore,
};
use kiln_common::{ContentDigest, RootedPathCodec};
use kiln_diagnostics::{DiagnosticCode, DiagnosticSink};

struct Workspace {
    _dir: tempfile::TempDir,
    src: PathBuf,
    out: PathBuf,
    state: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let out = dir.path().join("out");
        let state = dir.path().join(".kiln");
        Self {
            _dir: dir,
            src,
            out,
            state,
        }
    }

    fn codec(&self) -> RootedPathCodec {
        RootedPathCodec::new(&self.src, &self.out)
    }

    fn source_store(&self) -> SourceStateStore {
        SourceStateStore::new(self.state.join("sources.kst"))
    }

    fn stats_path(&self) -> PathBuf {
        self.state.join("stats.kv")
    }

    fn source(&self, name: &str) -> PathBuf {
        self.src.join(name)
    }

    fn output(&self, name: &str) -> PathBuf {
        self.out.join(name)
    }
}

fn configuration(compiler_flags: &[&str]) -> ConfigurationDigestContainer {
    let mut c = ConfigurationDigestContainer::new();
    c.set_from_items(ConfigurationCategory::ToolVersion, ["kiln 0.1.0"]);
    c.set_from_items(ConfigurationCategory::Compiler, compiler_flags.iter().copied());
    c.set_from_items(ConfigurationCategory::DependencyPathList, ["lib/a.jar", "lib/b.jar"]);
    c.set_from_items(ConfigurationCategory::DependencyDigestList, ["aaaa", "bbbb"]);
    c
}

fn digests(entries: &[(PathBuf, &str)]) -> HashMap<PathBuf, ContentDigest> {
    entries
        .iter()
        .map(|(path, content)| (path.clone(), ContentDigest::of(content.as_bytes())))
        .collect()
}

fn compiled(source: PathBuf, content: &str, outputs: Vec<PathBuf>) -> SourceDescriptor {
    SourceDescriptor {
        source_file: source,
        digest: Some(ContentDigest::of(content.as_bytes())),
        outputs: Some(outputs),
    }
}

#[test]
fn second_build_sees_changed_new_and_deleted_sources() {
    let ws = Workspace::new();
    let codec = ws.codec();
    let store = ws.source_store();
    let config = configuration(&["-O2"]);

    let first = digests(&[
        (ws.source("a.kt"), "fun a() = 1"),
        (ws.source("b.kt"), "fun b() = 2"),
        (ws.source("gone.kt"), "fun gone() = 3"),
    ]);
    assert!(store.load(&codec, &first, Some(&config), None).unwrap().is_none());

    store
        .save(
            &[
                compiled(ws.source("a.kt"), "fun a() = 1", vec![ws.output("A.class")]),
                compiled(ws.source("b.kt"), "fun b() = 2", vec![ws.output("B.class")]),
                compiled(
                    ws.source("gone.kt"),
                    "fun gone() = 3",
                    vec![ws.output("Gone.class"), ws.output("Gone$1.class")],
                ),
            ],
            &codec,
            &source_state_metadata(&config),
        )
        .unwrap();

    let second = digests(&[
        (ws.source("a.kt"), "fun a() = 1"),
        (ws.source("b.kt"), "fun b() = 20"),
        (ws.source("c.kt"), "fun c() = 4"),
    ]);
    let result = store
        .load(&codec, &second, Some(&config), None)
        .unwrap()
        .unwrap();

    assert!(result.rebuild_requested.is_none());
    assert!(result.changed_files.is_empty());
    assert_eq!(result.map.len(), 3);

    let a = &result.map[&ws.source("a.kt")];
    assert!(a.is_up_to_date());
    assert_eq!(a.outputs.as_deref(), Some(&[ws.output("A.class")][..]));

    let b = &result.map[&ws.source("b.kt")];
    assert!(!b.is_up_to_date());
    assert_eq!(b.outputs.as_deref(), Some(&[ws.output("B.class")][..]));

    assert_eq!(result.map[&ws.source("c.kt")], SourceDescriptor::unknown(ws.source("c.kt")));

    let b_path = ws.source("b.kt");
    let c_path = ws.source("c.kt");
    assert_eq!(result.stale_sources(), vec![b_path.as_path(), c_path.as_path()]);

    assert_eq!(result.deleted_files.len(), 1);
    assert_eq!(result.deleted_files[0].source_file, ws.source("gone.kt"));
    let doomed: Vec<&Path> = result.outputs_to_delete().collect();
    assert_eq!(
        doomed,
        vec![ws.output("Gone.class").as_path(), ws.output("Gone$1.class").as_path()]
    );
}

#[test]
fn compiler_change_forces_rebuild_through_sink() {
    let ws = Workspace::new();
    let codec = ws.codec();
    let store = ws.source_store();
    let old = configuration(&["-O2"]);
    let new = configuration(&["-O3"]);

    store
        .save(
            &[compiled(ws.source("a.kt"), "x", vec![ws.output("A.class")])],
            &codec,
            &source_state_metadata(&old),
        )
        .unwrap();

    let actual = digests(&[(ws.source("a.kt"), "x"), (ws.source("b.kt"), "y")]);
    let sink = DiagnosticSink::new();
    let result = store
        .load(&codec, &actual, Some(&new), Some(&sink))
        .unwrap()
        .unwrap();

    let reason = result.rebuild_requested.as_deref().unwrap();
    assert!(reason.starts_with("compiler options changed"), "{reason}");
    assert_eq!(result.map.len(), 2);
    assert!(result.map.values().all(|d| !d.is_up_to_date() && d.outputs.is_none()));
    assert!(result.deleted_files.is_empty());

    let diagnostics = sink.take_all();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, DiagnosticCode::CONFIGURATION_CHANGED);

    match store.load(&codec, &actual, Some(&new), None) {
        Err(CacheError::RebuildRequired { reason }) => {
            assert!(reason.starts_with("compiler options changed"))
        }
        other => panic!("expected RebuildRequired, got {other:?}"),
    }

    // Without configuration digests the snapshot is trusted as-is.
    let trusted = store.load(&codec, &actual, None, None).unwrap().unwrap();
    assert!(trusted.rebuild_requested.is_none());
    assert!(trusted.map[&ws.source("a.kt")].is_up_to_date());
}

#[test]
fn damaged_snapshot_degrades_to_cold_start() {
    let ws = Workspace::new();
    let codec = ws.codec();
    let store = ws.source_store();
    let config = configuration(&[]);

    store
        .save(
            &[compiled(ws.source("a.kt"), "x", vec![ws.output("A.class")])],
            &codec,
            &source_state_metadata(&config),
        )
        .unwrap();

    let mut bytes = std::fs::read(store.path()).unwrap();
    let last = bytes.len() - 6;
    bytes[last] ^= 0x5a;
    std::fs::write(store.path(), &bytes).unwrap();

    let actual = digests(&[(ws.source("a.kt"), "x")]);
    let sink = DiagnosticSink::new();
    let loaded = store.load(&codec, &actual, Some(&config), Some(&sink)).unwrap();
    assert!(loaded.is_none());
    let diagnostics = sink.take_all();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, DiagnosticCode::SOURCE_STATE_CORRUPTED);

    let err = store.load(&codec, &actual, Some(&config), None).unwrap_err();
    assert!(err.is_corruption(), "{err}");
}

#[test]
fn stats_survive_builds_and_drive_the_heuristic() {
    let ws = Workspace::new();
    let config = configuration(&["-O2"]);
    let stats_path = ws.stats_path();

    assert!(TargetStatsStore::check_configuration(&stats_path, &config).is_some());

    {
        let mut store = TargetStatsStore::open(&stats_path).unwrap();
        let mut state = store.load_target_state();
        state.record_clean_rebuild(10_000);
        state.record_build(8_000);
        assert_eq!(store.save_target_state(&state, &config).unwrap(), 2);
    }

    assert!(TargetStatsStore::check_configuration(&stats_path, &config).is_none());
    let changed = configuration(&["-O3"]);
    assert!(TargetStatsStore::check_configuration(&stats_path, &changed)
        .unwrap()
        .starts_with("compiler options changed"));

    let mut store = TargetStatsStore::open(&stats_path).unwrap();
    let mut state = store.load_target_state();
    assert_eq!(state.average_build_time(), Some(8_000));
    state.record_build(4_000);
    assert_eq!(state.average_build_time(), Some(6_000));
    assert_eq!(store.save_target_state(&state, &config).unwrap(), 1);
    assert_eq!(store.save_target_state(&state, &config).unwrap(), 0);

    let heuristic = RebuildHeuristic::default();
    let last_rebuild = state.last_successful_rebuild_duration().unwrap();
    assert!(heuristic
        .should_force_full_rebuild([&state], last_rebuild)
        .is_none());

    let mut other = state.clone();
    other.record_build(6_000);
    assert!(heuristic
        .should_force_full_rebuild([&state, &other], last_rebuild)
        .is_some());
}
