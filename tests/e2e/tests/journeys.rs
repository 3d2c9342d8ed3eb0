//! Journey tests - complete workflows through the public API

use mnema_core::{
    ChainOptions, EpistemicScores, ImportanceTier, IndexOptions, IndexStatus, PeAction,
    Relation, ScanOptions, SearchOptions,
};
use mnema_e2e_tests::{memory_file, Workspace};

const OAUTH_BODY: &str = "We use OAuth 2 with JWT access tokens.";

fn oauth_file() -> String {
    memory_file(
        "OAuth flow",
        "decision",
        "important",
        &["oauth", "jwt"],
        OAUTH_BODY,
    )
}

// ============================================================================
// S1: create and retrieve
// ============================================================================

#[test]
fn create_and_retrieve() {
    let ws = Workspace::new();
    let path = ws.write_memory_file("specs/007-auth/memory/oauth.md", &oauth_file());

    let result = ws
        .indexer
        .index_memory_file(&path, IndexOptions::default())
        .unwrap();
    assert_eq!(result.status, IndexStatus::Created);

    let hits = ws
        .storage
        .search_memories(
            "how does oauth jwt authentication work?",
            &SearchOptions {
                limit: 5,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].memory.id, result.id);
    assert!(hits[0].similarity.unwrap() > 0.3);

    // Testing effect: the access was observed
    let record = ws.storage.get_memory(result.id).unwrap().unwrap();
    assert_eq!(record.access_count, 1);
}

// ============================================================================
// S2: duplicate suppression
// ============================================================================

#[test]
fn duplicate_save_reinforces_instead_of_growing() {
    let ws = Workspace::new();
    let first_path = ws.write_memory_file("specs/007-auth/memory/oauth.md", &oauth_file());
    let first = ws
        .indexer
        .index_memory_file(&first_path, IndexOptions::default())
        .unwrap();

    // Trivially rewritten content: same tokens, different punctuation
    let rewritten = memory_file(
        "OAuth flow v2",
        "decision",
        "important",
        &["oauth"],
        "We use OAuth, 2, with JWT access tokens!",
    );
    let second_path = ws.write_memory_file("specs/007-auth/memory/oauth-v2.md", &rewritten);
    let second = ws
        .indexer
        .index_memory_file(&second_path, IndexOptions::default())
        .unwrap();

    assert_eq!(second.status, IndexStatus::Reinforced);
    assert_eq!(second.pe_action, Some(PeAction::Reinforce));
    assert_eq!(second.id, first.id);

    // Exactly one OAuth memory in the store
    let memories = ws.storage.get_memories_by_folder("specs/007-auth").unwrap();
    assert_eq!(memories.len(), 1);

    // The audit log recorded the suppression
    let log = ws.storage.conflict_log(Some("specs/007-auth"), 10).unwrap();
    assert_eq!(log[0]["action"], "REINFORCE");
    assert!(log[0]["similarity_score"].as_f64().unwrap() >= 0.95);
}

// ============================================================================
// S3: contradiction -> supersede
// ============================================================================

#[test]
fn contradiction_supersedes_and_outranks() {
    let ws = Workspace::new();
    let first_path = ws.write_memory_file("specs/007-auth/memory/oauth.md", &oauth_file());
    let first = ws
        .indexer
        .index_memory_file(&first_path, IndexOptions::default())
        .unwrap();

    let contradicting = memory_file(
        "OAuth flow",
        "decision",
        "important",
        &["oauth", "jwt"],
        "Do not use JWT access tokens. We use OAuth 2 tokens via cookies.",
    );
    let second_path = ws.write_memory_file("specs/007-auth/memory/oauth-rotate.md", &contradicting);
    let second = ws
        .indexer
        .index_memory_file(&second_path, IndexOptions::default())
        .unwrap();

    assert_eq!(second.pe_action, Some(PeAction::Supersede));
    assert_eq!(second.superseded_id, Some(first.id));

    let old = ws.storage.get_memory(first.id).unwrap().unwrap();
    assert_eq!(old.importance_tier, ImportanceTier::Deprecated);

    // The replacement outranks the deprecated original: tier weight
    // 0.7 (important) against 0.1 (deprecated)
    let query = ws
        .storage
        .embed_query_cached("jwt access tokens oauth")
        .unwrap();
    let hits = ws
        .storage
        .vector_search(&query, &SearchOptions::default())
        .unwrap();
    let new_rank = hits.iter().position(|h| h.memory.id == second.id).unwrap();
    let old_rank = hits.iter().position(|h| h.memory.id == first.id).unwrap();
    assert!(new_rank < old_rank);
}

// ============================================================================
// S4: rate limiting
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn second_scan_within_cooldown_is_rate_limited() {
    let ws = Workspace::new();
    ws.write_memory_file("specs/007-auth/memory/a.md", "# A\nalpha things\n");

    let report = ws.indexer.scan(ScanOptions::default()).await.unwrap();
    assert_eq!(report.created, 1);

    let err = ws.indexer.scan(ScanOptions::default()).await.unwrap_err();
    match err {
        mnema_core::StorageError::RateLimited { wait_seconds } => {
            assert!(wait_seconds > 0 && wait_seconds <= 60);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

// ============================================================================
// S5: checkpoint restore after bulk delete
// ============================================================================

#[test]
fn checkpoint_restores_bulk_deleted_folder() {
    let ws = Workspace::new();
    for (name, body) in [
        ("oauth", "oauth jwt access tokens everywhere"),
        ("sessions", "server side session state storage entirely different"),
    ] {
        let content = memory_file(name, "decision", "normal", &[name], body);
        let path = ws.write_memory_file(&format!("specs/007-auth/memory/{name}.md"), &content);
        ws.indexer
            .index_memory_file(&path, IndexOptions::default())
            .unwrap();
    }
    let before: Vec<i64> = ws
        .storage
        .get_memories_by_folder("specs/007-auth")
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(before.len(), 2);

    ws.storage
        .checkpoint_create("before-cleanup", Some("specs/007-auth"), None)
        .unwrap();

    // Bulk delete takes its own auto-checkpoint first
    let auto = ws
        .storage
        .auto_checkpoint_before_cleanup("specs/007-auth")
        .unwrap();
    assert!(auto.name.starts_with("pre-cleanup-"));
    ws.storage.delete_folder("specs/007-auth").unwrap();
    assert!(ws
        .storage
        .get_memories_by_folder("specs/007-auth")
        .unwrap()
        .is_empty());

    ws.storage
        .checkpoint_restore("before-cleanup", true)
        .unwrap();
    let after: Vec<i64> = ws
        .storage
        .get_memories_by_folder("specs/007-auth")
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(before, after);

    // Search works again over the restored rows
    let hits = ws
        .storage
        .search_memories("oauth jwt access tokens", &SearchOptions::default())
        .unwrap();
    assert!(!hits.is_empty());
}

// ============================================================================
// S6: preflight / postflight
// ============================================================================

#[test]
fn preflight_postflight_computes_learning_index() {
    let ws = Workspace::new();
    ws.storage
        .task_preflight(
            "specs/007",
            "T1",
            None,
            EpistemicScores {
                knowledge: 40,
                uncertainty: 60,
                context: 50,
            },
            &["how do refresh tokens rotate".to_string()],
        )
        .unwrap();

    let record = ws
        .storage
        .task_postflight(
            "specs/007",
            "T1",
            EpistemicScores {
                knowledge: 75,
                uncertainty: 25,
                context: 70,
            },
            &["how do refresh tokens rotate".to_string()],
            &[],
        )
        .unwrap();

    assert_eq!(record.delta_knowledge, Some(35.0));
    assert_eq!(record.delta_uncertainty, Some(35.0));
    assert_eq!(record.delta_context, Some(20.0));
    assert_eq!(record.learning_index, Some(31.25));
    assert_eq!(
        mnema_core::interpret_learning_index(record.learning_index.unwrap()),
        "Moderate learning session"
    );
}

// ============================================================================
// Working memory across turns
// ============================================================================

#[test]
fn working_memory_follows_the_conversation() {
    let ws = Workspace::new();
    let oauth_path = ws.write_memory_file("specs/007-auth/memory/oauth.md", &oauth_file());
    let oauth = ws
        .indexer
        .index_memory_file(&oauth_path, IndexOptions::default())
        .unwrap();
    let tokens_content = memory_file(
        "Token storage",
        "implementation",
        "normal",
        &["token storage"],
        "Tokens persist in the keychain, never on disk in plain text.",
    );
    let tokens_path = ws.write_memory_file("specs/007-auth/memory/tokens.md", &tokens_content);
    let tokens = ws
        .indexer
        .index_memory_file(&tokens_path, IndexOptions::default())
        .unwrap();
    ws.storage
        .insert_edge(oauth.id, tokens.id, Relation::EnabledBy, 1.0, None)
        .unwrap();

    // Turn 1: oauth triggers, token memory co-activates
    let outcome = ws
        .storage
        .observe_turn("session-1", 1, "let's revisit oauth", true)
        .unwrap();
    assert_eq!(outcome.activated, vec![oauth.id]);
    assert_eq!(outcome.co_activated, vec![tokens.id]);
    assert_eq!(outcome.hot.len(), 1);
    assert_eq!(outcome.warm.len(), 1);

    // Turns later without mention, attention decays away
    let outcome = ws
        .storage
        .observe_turn("session-1", 40, "unrelated build tooling chat", true)
        .unwrap();
    assert!(outcome.hot.is_empty());
    assert_eq!(outcome.cold_tracked, 2);
}

// ============================================================================
// Causal tracing end to end
// ============================================================================

#[test]
fn causal_chain_explains_a_decision() {
    let ws = Workspace::new();
    let mut ids = Vec::new();
    for (name, body) in [
        ("incident", "production incident with expired signing keys"),
        ("decision", "decided to rotate signing keys weekly going forward"),
        ("automation", "built automation for the weekly signing key rotation"),
    ] {
        let content = memory_file(name, "discovery", "normal", &[name], body);
        let path = ws.write_memory_file(&format!("specs/009-keys/memory/{name}.md"), &content);
        ids.push(
            ws.indexer
                .index_memory_file(&path, IndexOptions::default())
                .unwrap()
                .id,
        );
    }
    ws.storage
        .insert_edge(ids[1], ids[0], Relation::CausedBy, 1.0, Some("postmortem"))
        .unwrap();
    ws.storage
        .insert_edge(ids[2], ids[1], Relation::DerivedFrom, 0.9, None)
        .unwrap();

    let chain = ws
        .storage
        .get_causal_chain(ids[2], &ChainOptions::default())
        .unwrap();
    assert_eq!(chain.all.len(), 2);
    assert_eq!(chain.by_derived_from.len(), 1);
    assert_eq!(chain.by_cause.len(), 1);

    let stats = ws.storage.causal_stats().unwrap();
    assert_eq!(stats.total_edges, 2);
    assert!((stats.link_coverage_percent - 100.0).abs() < f64::EPSILON);
}
