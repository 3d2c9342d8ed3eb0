//! Property tests - store invariants under the public API

use mnema_core::{
    gate, parser, GateCandidate, IndexOptions, IndexStatus, MemoryUpdate, PeAction, Relation,
    SearchOptions, StorageError,
};
use mnema_e2e_tests::{memory_file, Workspace};

fn seed_file(ws: &Workspace, rel: &str, content: &str) -> i64 {
    let path = ws.write_memory_file(rel, content);
    ws.indexer
        .index_memory_file(&path, IndexOptions::default())
        .unwrap()
        .id
}

// ============================================================================
// P1: hash stability
// ============================================================================

#[test]
fn reindex_without_change_is_a_noop() {
    let ws = Workspace::new();
    let content = memory_file("A", "general", "normal", &["alpha"], "alpha body text");
    let path = ws.write_memory_file("specs/001/memory/a.md", &content);

    let first = ws
        .indexer
        .index_memory_file(&path, IndexOptions::default())
        .unwrap();
    let before = ws.storage.get_memory(first.id).unwrap().unwrap();

    // Parsing is deterministic
    let outcome_a = parser::parse_memory_file("specs/001/memory/a.md".as_ref(), &content);
    let outcome_b = parser::parse_memory_file("specs/001/memory/a.md".as_ref(), &content);
    assert_eq!(
        outcome_a.parsed.unwrap().content_hash,
        outcome_b.parsed.unwrap().content_hash
    );

    let second = ws
        .indexer
        .index_memory_file(&path, IndexOptions::default())
        .unwrap();
    assert_eq!(second.status, IndexStatus::Unchanged);

    let after = ws.storage.get_memory(first.id).unwrap().unwrap();
    assert_eq!(before.updated_at, after.updated_at);
    assert_eq!(before.review_count, after.review_count);
}

// ============================================================================
// P2: dimension
// ============================================================================

#[test]
fn wrong_dimension_update_fails_without_mutation() {
    let ws = Workspace::new();
    let id = seed_file(
        &ws,
        "specs/001/memory/a.md",
        &memory_file("A", "general", "normal", &[], "alpha body"),
    );
    let before = ws.storage.get_memory(id).unwrap().unwrap();

    let wrong = vec![0.1f32; 3];
    let err = ws
        .storage
        .update_memory(
            id,
            &MemoryUpdate {
                title: Some("mutated".to_string()),
                ..Default::default()
            },
            Some(&wrong),
            false,
        )
        .unwrap_err();
    assert!(matches!(err, StorageError::DimensionMismatch { .. }));

    let after = ws.storage.get_memory(id).unwrap().unwrap();
    assert_eq!(after.title, before.title);
    assert_eq!(after.updated_at, before.updated_at);
}

// ============================================================================
// P3: gate bands, boundaries go to the higher action
// ============================================================================

#[test]
fn gate_band_boundaries() {
    let candidate = |similarity: f32| {
        vec![GateCandidate {
            id: 1,
            similarity,
            content: "use oauth".to_string(),
            stability: 1.0,
            difficulty: 5.0,
            file_path: "specs/001/memory/a.md".to_string(),
        }]
    };

    let cases: &[(f32, PeAction)] = &[
        (0.951, PeAction::Reinforce),
        (0.95, PeAction::Reinforce),
        (0.949, PeAction::Update),
        (0.90, PeAction::Update),
        (0.899, PeAction::CreateLinked),
        (0.70, PeAction::CreateLinked),
        (0.699, PeAction::Create),
        (0.50, PeAction::Create),
        (0.499, PeAction::Create),
    ];
    for (similarity, expected) in cases {
        let decision = gate::evaluate("use oauth as well", &candidate(*similarity));
        assert_eq!(decision.action, *expected, "at similarity {similarity}");
    }
}

// ============================================================================
// P5: testing-effect monotonicity
// ============================================================================

#[test]
fn repeated_retrieval_never_weakens() {
    let ws = Workspace::new();
    let id = seed_file(
        &ws,
        "specs/001/memory/a.md",
        &memory_file("A", "general", "normal", &["alpha"], "alpha body text"),
    );

    let mut last_stability = ws.storage.get_memory(id).unwrap().unwrap().stability;
    for round in 1..=5 {
        ws.storage
            .search_memories("alpha body text", &SearchOptions::default())
            .unwrap();
        let record = ws.storage.get_memory(id).unwrap().unwrap();
        assert!(record.stability >= last_stability, "round {round}");
        assert_eq!(record.access_count, round);
        assert_eq!(record.review_count, round);
        last_stability = record.stability;
    }
}

// ============================================================================
// P7: delete cascades everywhere
// ============================================================================

#[test]
fn delete_cascades_to_edges_triggers_and_vectors() {
    let ws = Workspace::new();
    let a = seed_file(
        &ws,
        "specs/001/memory/a.md",
        &memory_file("A", "general", "normal", &["alpha"], "alpha body text"),
    );
    let b = seed_file(
        &ws,
        "specs/001/memory/b.md",
        &memory_file("B", "general", "normal", &["beta"], "entirely different beta material"),
    );
    ws.storage
        .insert_edge(a, b, Relation::Supports, 1.0, None)
        .unwrap();
    assert_eq!(ws.storage.match_triggers("alpha", 5).unwrap().len(), 1);

    assert!(ws.storage.delete_memory(a).unwrap());

    // No edge references the deleted id
    assert!(ws.storage.edges_for_memory(b).unwrap().is_empty());
    // The trigger cache no longer surfaces it
    assert!(ws.storage.match_triggers("alpha", 5).unwrap().is_empty());
    // No orphaned vector attributable to it
    let report = ws.storage.verify_integrity(false).unwrap();
    assert!(report.orphaned_vectors.is_empty());
}

// ============================================================================
// P9: anchor projection reduces bytes
// ============================================================================

#[test]
fn anchor_filter_returns_strictly_fewer_bytes() {
    let ws = Workspace::new();
    let body = "Long preamble with plenty of text before the span.\n\
                <!-- ANCHOR:state -->\ncurrent state: rotation automated\n<!-- /ANCHOR:state -->\n\
                Long epilogue after the span with even more text.";
    let content = memory_file("A", "general", "normal", &["rotation"], body);
    seed_file(&ws, "specs/001/memory/a.md", &content);

    let full = ws
        .storage
        .search_memories("rotation automated state", &SearchOptions::default())
        .unwrap();
    let full_bytes = full[0].memory.content.as_deref().unwrap().len();

    let filtered = ws
        .storage
        .search_memories(
            "rotation automated state",
            &SearchOptions {
                anchors: vec!["state".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
    let filtered_bytes = filtered[0].memory.content.as_deref().unwrap().len();

    assert!(filtered_bytes < full_bytes);
    assert_eq!(
        filtered[0].memory.content.as_deref(),
        Some("current state: rotation automated")
    );
}

// ============================================================================
// P4: constitutional pinning
// ============================================================================

#[test]
fn constitutional_rows_pin_into_results() {
    let ws = Workspace::new();
    let constitutional = seed_file(
        &ws,
        ".opencode/skill/review/constitutional/rules.md",
        "---\ntitle: Rules\nimportance_tier: constitutional\n---\noauth jwt tokens everywhere\n",
    );
    for i in 0..4 {
        seed_file(
            &ws,
            &format!("specs/001/memory/n{i}.md"),
            &memory_file(
                &format!("Note {i}"),
                "general",
                "critical",
                &[],
                &format!("oauth jwt tokens operational note number {i} with details"),
            ),
        );
    }

    let hits = ws
        .storage
        .search_memories(
            "oauth jwt tokens",
            &SearchOptions {
                limit: 3,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(hits.len() <= 3);
    assert!(hits.iter().any(|h| h.memory.id == constitutional));
}

// ============================================================================
// P6: checkpoint round-trip equality
// ============================================================================

#[test]
fn checkpoint_round_trip_restores_scoped_tables() {
    let ws = Workspace::new();
    let a = seed_file(
        &ws,
        "specs/001/memory/a.md",
        &memory_file("A", "general", "normal", &["alpha"], "alpha body text"),
    );
    let b = seed_file(
        &ws,
        "specs/001/memory/b.md",
        &memory_file("B", "general", "normal", &["beta"], "entirely different beta material"),
    );
    ws.storage
        .insert_edge(a, b, Relation::DerivedFrom, 0.8, None)
        .unwrap();

    let snapshot_before: Vec<_> = ws
        .storage
        .get_memories_by_folder("specs/001")
        .unwrap()
        .into_iter()
        .map(|r| (r.id, r.content_hash, r.stability.to_bits()))
        .collect();

    ws.storage.checkpoint_create("cp", Some("specs/001"), None).unwrap();
    ws.storage.delete_folder("specs/001").unwrap();
    ws.storage.checkpoint_restore("cp", true).unwrap();

    let snapshot_after: Vec<_> = ws
        .storage
        .get_memories_by_folder("specs/001")
        .unwrap()
        .into_iter()
        .map(|r| (r.id, r.content_hash, r.stability.to_bits()))
        .collect();
    assert_eq!(snapshot_before, snapshot_after);

    let edges = ws.storage.edges_for_memory(a).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].relation, Relation::DerivedFrom);
    assert_eq!(edges[0].strength, 0.8);
}
