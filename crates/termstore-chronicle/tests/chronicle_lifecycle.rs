//! Integration tests: chronicle lifecycle from creation to retrieval.
//!
//! Covers flush/reload round trips, cancellation, latest-version selection
//! with contradictions, corruption handling, cache eviction and the
//! interchange path.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use termstore_chronicle::{
    Chronicle, ChronicleError, ChronicleKind, ChronicleStore, CommitState, ComponentNidPayload,
    LatestVersion, Payload, PayloadType, SememeFields, StoreConfig, StringPayload,
};
use termstore_codec::CodecError;
use termstore_kernel::{
    ComponentKind, ConceptSequence, IdentifierRegistry, MemoryRegistries, StampCoordinate,
    StampPosition, StampSequence, StampSequenceSet, Status, UNCOMMITTED_TIME,
};
use uuid::Uuid;

struct World {
    memory: MemoryRegistries,
    path: ConceptSequence,
    author: ConceptSequence,
    module: ConceptSequence,
}

impl World {
    fn new() -> Self {
        let memory = MemoryRegistries::new();
        let path = memory.identifiers.register_concept(Uuid::from_u128(0x9A7));
        let author = memory.identifiers.register_concept(Uuid::from_u128(0xA07));
        let module = memory.identifiers.register_concept(Uuid::from_u128(0x30D));
        memory.paths.add_path(path, Vec::new());
        Self {
            memory,
            path,
            author,
            module,
        }
    }

    fn stamp(&self, status: Status, time: i64) -> StampSequence {
        self.memory
            .stamps
            .intern(status, time, self.author, self.module, self.path)
    }

    fn concept(&self, uuid: u128) -> Chronicle {
        Chronicle::new(
            Uuid::from_u128(uuid),
            ChronicleKind::Concept,
            self.memory.registries(),
            StoreConfig::default(),
        )
    }

    fn description_sememe(&self, uuid: u128) -> Chronicle {
        let referenced = self.memory.identifiers.nid_for_uuids(&[Uuid::from_u128(0xBEEF)]);
        Chronicle::new(
            Uuid::from_u128(uuid),
            ChronicleKind::Sememe(SememeFields {
                payload_type: PayloadType::String,
                assemblage: self.module,
                referenced_component: referenced,
            }),
            self.memory.registries(),
            StoreConfig::default(),
        )
    }

    fn at(&self, time: i64) -> StampCoordinate {
        StampCoordinate::at(StampPosition::new(time, self.path))
    }
}

fn text(value: &str) -> Payload {
    Payload::String(StringPayload {
        text: value.to_string(),
    })
}

fn stamps(chronicle: &Chronicle) -> StampSequenceSet {
    chronicle.stamp_sequences().expect("stamps should scan")
}

fn hex_rows(bytes: &[u8]) -> String {
    bytes
        .chunks(16)
        .map(|row| {
            row.iter()
                .map(|byte| format!("{byte:02x}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn concept_record_byte_layout() {
    let memory = MemoryRegistries::new();
    let chronicle = Chronicle::new(
        Uuid::from_u128(1),
        ChronicleKind::Concept,
        memory.registries(),
        StoreConfig::default(),
    );
    let stamp = memory.stamps.intern(
        Status::Active,
        100,
        ConceptSequence(5),
        ConceptSequence(6),
        ConceptSequence(7),
    );
    chronicle.create_version(stamp).expect("create");

    let bytes = chronicle.flush(1).expect("flush");
    insta::assert_snapshot!(hex_rows(&bytes), @r"
    01 01 00 00 00 01 00 00 00 00 00 00 00 00 00 00
    00 00 00 00 00 01 00 00 00 00 00 00 00 01 00 00
    00 01 00 02 00 00 00 0a 00 00 00 01 00 01 00 00
    00 00
    ");
}

#[test]
fn flush_then_reload_preserves_versions() {
    let world = World::new();
    let chronicle = world.description_sememe(0x5E3E);
    let s1 = world.stamp(Status::Active, 100);
    let s2 = world.stamp(Status::Inactive, 200);
    chronicle
        .create_version_with(s1, text("heart attack"))
        .expect("create s1");
    chronicle
        .create_version_with(s2, text("myocardial infarction"))
        .expect("create s2");

    let bytes = chronicle.flush(1).expect("flush");
    let reloaded =
        Chronicle::load(bytes, world.memory.registries(), StoreConfig::default()).expect("load");

    assert_eq!(reloaded, chronicle);
    assert_eq!(reloaded.write_sequence(), 1);
    assert_eq!(reloaded.kind(), chronicle.kind());
    let mut before = chronicle.version_list().expect("list").to_vec();
    let mut after = reloaded.version_list().expect("list").to_vec();
    before.sort_by_key(|version| version.stamp());
    after.sort_by_key(|version| version.stamp());
    assert_eq!(before, after);
}

#[test]
fn canceled_stamps_are_dropped_by_flush_and_merge() {
    let world = World::new();
    let chronicle = world.concept(0xCA);
    let kept = world.stamp(Status::Active, 100);
    let canceled = world.stamp(Status::Active, 200);
    chronicle.create_version(kept).expect("create kept");
    chronicle.create_version(canceled).expect("create canceled");
    let published = chronicle.flush_and_publish(1).expect("publish");
    assert_eq!(stamps(&chronicle), [kept, canceled].into_iter().collect());

    world.memory.stamps.cancel(canceled);
    chronicle.flush_and_publish(2).expect("publish after cancel");
    assert_eq!(stamps(&chronicle), [kept].into_iter().collect());
    let listed: Vec<StampSequence> = chronicle
        .version_list()
        .expect("list")
        .iter()
        .map(|version| version.stamp())
        .collect();
    assert_eq!(listed, vec![kept]);

    // The older record still carries the canceled stamp; merging it back
    // must not resurrect it.
    let merged = chronicle
        .merge(3, published.bytes())
        .expect("merge with stale record");
    let reloaded = Chronicle::load(merged, world.memory.registries(), StoreConfig::default())
        .expect("load merged");
    assert_eq!(stamps(&reloaded), [kept].into_iter().collect());
}

#[test]
fn later_edit_wins_and_equal_times_contradict() {
    let world = World::new();
    let chronicle = world.concept(0x51);
    let s1 = world.stamp(Status::Active, 100);
    let s2 = world.stamp(Status::Active, 200);
    chronicle.create_version(s1).expect("create s1");
    chronicle.create_version(s2).expect("create s2");
    chronicle.flush_and_publish(1).expect("publish");

    match chronicle.latest_version(&world.at(300)).expect("latest") {
        Some(LatestVersion::Single(version)) => assert_eq!(version.stamp(), s2),
        other => panic!("expected a single latest version, got {other:?}"),
    }

    let other_author = world.memory.identifiers.register_concept(Uuid::from_u128(0xA08));
    let s3 = world
        .memory
        .stamps
        .intern(Status::Active, 200, other_author, world.module, world.path);
    chronicle.create_version(s3).expect("create s3");

    let latest = chronicle
        .latest_version(&world.at(300))
        .expect("latest")
        .expect("something is visible");
    assert!(latest.is_contradicted());
    assert_eq!(latest.stamps(), [s2, s3].into_iter().collect());
}

#[test]
fn inactive_latest_version_is_not_active() {
    let world = World::new();
    let chronicle = world.concept(0x1A);
    chronicle
        .create_version(world.stamp(Status::Active, 100))
        .expect("create");
    assert!(
        chronicle
            .is_latest_version_active(&world.at(300))
            .expect("active check")
    );

    chronicle
        .create_version(world.stamp(Status::Inactive, 200))
        .expect("retire");
    let active_only = StampCoordinate::active_at(StampPosition::new(300, world.path));
    assert!(!chronicle.is_latest_version_active(&active_only).expect("active check"));
    assert!(chronicle.latest_version(&active_only).expect("latest").is_none());
}

#[test]
fn corrupted_format_version_fails_to_load() {
    let world = World::new();
    let chronicle = world.concept(0xBAD);
    chronicle
        .create_version(world.stamp(Status::Active, 100))
        .expect("create");
    let mut bytes = chronicle.flush(1).expect("flush");
    bytes[0] = 0x7F;

    let result = Chronicle::load(bytes.clone(), world.memory.registries(), StoreConfig::default());
    assert!(matches!(
        result,
        Err(ChronicleError::Codec(CodecError::UnsupportedFormatVersion(0x7F)))
    ));
    assert!(matches!(
        chronicle.merge(2, &bytes),
        Err(ChronicleError::Codec(CodecError::UnsupportedFormatVersion(0x7F)))
    ));
}

#[test]
fn truncated_record_fails_to_load() {
    let world = World::new();
    let chronicle = world.concept(0x7C);
    chronicle
        .create_version(world.stamp(Status::Active, 100))
        .expect("create");
    let mut bytes = chronicle.flush(1).expect("flush");
    bytes.truncate(bytes.len() - 6);

    let result = Chronicle::load(bytes, world.memory.registries(), StoreConfig::default());
    assert!(matches!(result, Err(ChronicleError::Codec(_))));
}

#[test]
fn rebuilding_an_evicted_version_list_is_idempotent() {
    let world = World::new();
    let chronicle = world.description_sememe(0xE71C);
    for (time, value) in [(100, "one"), (200, "two"), (300, "three")] {
        chronicle
            .create_version_with(world.stamp(Status::Active, time), text(value))
            .expect("create");
    }
    chronicle.flush_and_publish(1).expect("publish");
    chronicle
        .create_version_with(world.stamp(Status::Active, 400), text("four"))
        .expect("create after publish");

    let first = chronicle.version_list().expect("list");
    assert!(chronicle.evict_version_list());
    let rebuilt = chronicle.version_list().expect("rebuilt list");
    assert_eq!(*first, *rebuilt);

    let uncached = Chronicle::load(
        chronicle.written().expect("written").bytes().to_vec(),
        world.memory.registries(),
        StoreConfig::from_toml_str("[cache]\nretain_version_lists = false\n").expect("config"),
    )
    .expect("load");
    assert!(!uncached.evict_version_list());
    let a = uncached.version_list().expect("list");
    let b = uncached.version_list().expect("list");
    assert_eq!(*a, *b);
    assert!(!uncached.evict_version_list());
}

#[test]
fn version_graph_is_a_time_ordered_chain_on_one_path() {
    let world = World::new();
    let chronicle = world.concept(0x6A);
    let late = world.stamp(Status::Active, 300);
    let early = world.stamp(Status::Active, 100);
    chronicle.create_version(late).expect("create late");
    chronicle.create_version(early).expect("create early");

    let graphs = chronicle.version_graph_list().expect("graph");
    assert_eq!(graphs.len(), 1);
    let order: Vec<StampSequence> = graphs[0].values().map(|version| version.stamp()).collect();
    assert_eq!(order, vec![early, late]);

    let branch = world.memory.identifiers.register_concept(Uuid::from_u128(0xB4));
    world
        .memory
        .paths
        .add_path(branch, vec![StampPosition::new(150, world.path)]);
    let on_branch = world
        .memory
        .stamps
        .intern(Status::Active, 200, world.author, world.module, branch);
    chronicle.create_version(on_branch).expect("create on branch");
    assert!(matches!(
        chronicle.version_graph_list(),
        Err(ChronicleError::Unsupported(_))
    ));
}

#[test]
fn visible_versions_are_ordered_unless_they_contradict() {
    let world = World::new();
    let chronicle = world.concept(0x0D);
    let s2 = world.stamp(Status::Active, 200);
    let s1 = world.stamp(Status::Active, 100);
    let future = world.stamp(Status::Active, 900);
    for stamp in [s2, s1, future] {
        chronicle.create_version(stamp).expect("create");
    }

    let ordered: Vec<StampSequence> = chronicle
        .visible_ordered_version_list(&world.at(500))
        .expect("ordered")
        .iter()
        .map(|version| version.stamp())
        .collect();
    assert_eq!(ordered, vec![s1, s2]);

    let rival_author = world.memory.identifiers.register_concept(Uuid::from_u128(0xA09));
    let rival = world
        .memory
        .stamps
        .intern(Status::Active, 200, rival_author, world.module, world.path);
    chronicle.create_version(rival).expect("create rival");
    assert!(matches!(
        chronicle.visible_ordered_version_list(&world.at(500)),
        Err(ChronicleError::Unsupported(_))
    ));
}

#[test]
fn commit_state_follows_the_stamp_registry() {
    let world = World::new();
    let chronicle = world.concept(0xC5);
    chronicle
        .create_version(world.stamp(Status::Active, 100))
        .expect("create committed");
    assert_eq!(chronicle.commit_state().expect("state"), CommitState::Committed);

    let pending = world.stamp(Status::Active, UNCOMMITTED_TIME);
    chronicle.create_version(pending).expect("create pending");
    assert_eq!(chronicle.commit_state().expect("state"), CommitState::Uncommitted);
    assert_eq!(
        chronicle.version_for_stamp(pending).expect("lookup").map(|v| v.stamp()),
        Some(pending)
    );
    assert!(
        chronicle
            .version_for_stamp(StampSequence(404))
            .expect("lookup")
            .is_none()
    );

    world.memory.stamps.commit(pending, 500);
    assert_eq!(chronicle.commit_state().expect("state"), CommitState::Committed);
}

#[test]
fn set_versions_replaces_history() {
    let world = World::new();
    let chronicle = world.description_sememe(0x5E7);
    let old = world.stamp(Status::Active, 100);
    let kept = world.stamp(Status::Active, 200);
    chronicle.create_version_with(old, text("old")).expect("create old");
    let keeper = chronicle
        .create_version_with(kept, text("kept"))
        .expect("create kept");
    chronicle.flush_and_publish(1).expect("publish");

    chronicle.set_versions(vec![keeper]).expect("replace");
    assert_eq!(stamps(&chronicle), [kept].into_iter().collect());
    let next = chronicle
        .create_version(world.stamp(Status::Active, 300))
        .expect("create after replace");
    assert_eq!(next.version_sequence(), 3);
}

#[test]
fn aliases_are_registered_and_survive_flush() {
    let world = World::new();
    let chronicle = world.concept(0xA1);
    let alias = Uuid::from_u128(0xA2);
    assert!(chronicle.add_additional_uuid(alias));
    assert!(!chronicle.add_additional_uuid(alias));
    assert!(!chronicle.add_additional_uuid(chronicle.primordial_uuid()));
    assert_eq!(world.memory.identifiers.nid_for_uuid(&alias), Some(chronicle.nid()));

    let bytes = chronicle.flush(1).expect("flush");
    let reloaded =
        Chronicle::load(bytes, world.memory.registries(), StoreConfig::default()).expect("load");
    assert_eq!(reloaded.uuid_list(), vec![Uuid::from_u128(0xA1), alias]);
}

#[test]
fn summary_describes_versions() {
    let world = World::new();
    let chronicle = world.description_sememe(0x5A);
    chronicle
        .create_version_with(world.stamp(Status::Active, 100), text("aspirin"))
        .expect("create");
    let summary = chronicle.summary().expect("summary");
    assert_eq!(summary.versions.len(), 1);
    assert!(summary.versions[0].stamp_description.contains("active"));

    let json = summary.to_json().expect("json");
    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    assert_eq!(value["kind"]["kind"], "sememe");
    assert_eq!(value["versions"][0]["payload"]["type"], "string");
    assert_eq!(value["versions"][0]["payload"]["text"], "aspirin");
    assert_eq!(value["commit_state"], "committed");
}

fn temp_path(prefix: &str) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "termstore-{prefix}-{}-{unique}.tsx",
        std::process::id()
    ))
}

#[test]
fn interchange_file_moves_history_between_databases() {
    let source = World::new();
    let store = ChronicleStore::new(source.memory.registries(), StoreConfig::default());
    let concept = store
        .get_or_create(Uuid::from_u128(0xC1), ChronicleKind::Concept)
        .expect("concept");
    concept
        .create_version(source.stamp(Status::Active, 100))
        .expect("concept version");
    let sememe = store
        .get_or_create(
            Uuid::from_u128(0xD1),
            ChronicleKind::Sememe(SememeFields {
                payload_type: PayloadType::String,
                assemblage: source.module,
                referenced_component: concept.nid(),
            }),
        )
        .expect("sememe");
    sememe
        .create_version_with(source.stamp(Status::Active, 100), text("acetaminophen"))
        .expect("sememe v1");
    sememe
        .create_version_with(source.stamp(Status::Active, 200), text("paracetamol"))
        .expect("sememe v2");
    let canceled = source.stamp(Status::Active, 300);
    sememe
        .create_version_with(canceled, text("typo"))
        .expect("sememe v3");
    source.memory.stamps.cancel(canceled);

    let path = temp_path("interchange");
    assert_eq!(store.export(&path).expect("export"), 2);

    let target = MemoryRegistries::new();
    let imported = ChronicleStore::new(target.registries(), StoreConfig::default());
    assert_eq!(imported.import(&path).expect("import"), 2);
    let _ = std::fs::remove_file(&path);

    let sememe_nid = target
        .identifiers
        .nid_for_uuid(&Uuid::from_u128(0xD1))
        .expect("sememe uuid registered");
    let copy = imported.get(sememe_nid).expect("sememe imported");
    let texts: Vec<String> = copy
        .version_list()
        .expect("list")
        .iter()
        .filter_map(|version| match version.payload() {
            Payload::String(payload) => Some(payload.text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(texts.len(), 2);
    assert!(texts.contains(&"acetaminophen".to_string()));
    assert!(texts.contains(&"paracetamol".to_string()));

    match copy.kind() {
        ChronicleKind::Sememe(fields) => {
            let concept_nid = target
                .identifiers
                .nid_for_uuid(&Uuid::from_u128(0xC1))
                .expect("concept uuid registered");
            assert_eq!(fields.referenced_component, concept_nid);
        }
        other => panic!("expected a sememe, got {other:?}"),
    }

    let target_path = target
        .identifiers
        .nid_for_uuid(&Uuid::from_u128(0x9A7))
        .map(|nid| {
            ConceptSequence(
                target
                    .identifiers
                    .container_sequence(nid, ComponentKind::Concept),
            )
        })
        .expect("path concept registered");
    target.paths.add_path(target_path, Vec::new());
    let latest = imported
        .latest_version(
            sememe_nid,
            &StampCoordinate::at(StampPosition::new(1_000, target_path)),
        )
        .expect("latest")
        .expect("visible");
    assert_eq!(latest.versions()[0].payload(), &text("paracetamol"));
}

#[test]
fn importing_twice_adds_nothing_new() {
    let world = World::new();
    let store = ChronicleStore::new(world.memory.registries(), StoreConfig::default());
    let chronicle = store
        .get_or_create(Uuid::from_u128(0xD0), ChronicleKind::Concept)
        .expect("create");
    chronicle
        .create_version(world.stamp(Status::Active, 100))
        .expect("version");

    let external = chronicle.write_external().expect("external");
    let absorbed = store.import_external(&external).expect("import");
    assert!(std::sync::Arc::ptr_eq(&absorbed, &chronicle));
    assert_eq!(chronicle.version_list().expect("list").len(), 1);

    assert!(matches!(
        store.get_or_create(
            Uuid::from_u128(0xD0),
            ChronicleKind::Sememe(SememeFields {
                payload_type: PayloadType::Member,
                assemblage: world.module,
                referenced_component: chronicle.nid(),
            })
        ),
        Err(ChronicleError::RecordMismatch(_))
    ));
}

#[test]
fn unedited_reference_versions_stay_out_of_interchange() {
    let world = World::new();
    let target = world
        .memory
        .identifiers
        .nid_for_uuids(&[Uuid::from_u128(0x7A6)]);
    let chronicle = Chronicle::new(
        Uuid::from_u128(0xE0),
        ChronicleKind::Sememe(SememeFields {
            payload_type: PayloadType::ComponentNid,
            assemblage: world.module,
            referenced_component: target,
        }),
        world.memory.registries(),
        StoreConfig::default(),
    );
    let unedited = world.stamp(Status::Active, 100);
    let edited = world.stamp(Status::Active, 200);
    chronicle.create_version(unedited).expect("placeholder version");
    chronicle
        .create_version_with(
            edited,
            Payload::ComponentNid(ComponentNidPayload { component: target }),
        )
        .expect("edited version");

    let external = chronicle.write_external().expect("external");
    let target_db = MemoryRegistries::new();
    let imported = Chronicle::read_external(&external, target_db.registries(), StoreConfig::default())
        .expect("read external");
    let imported_target = target_db
        .identifiers
        .nid_for_uuids(&[Uuid::from_u128(0x7A6)]);
    let versions = imported.version_list().expect("list");
    assert_eq!(versions.len(), 1);
    assert_eq!(
        versions[0].payload(),
        &Payload::ComponentNid(ComponentNidPayload {
            component: imported_target
        })
    );
}
