//! End-to-end write-coordinator scenarios against mock PDS and knot seams:
//! atomicity under partial failure, round-trip laws, capability gating,
//! and the registration state machine.

mod common;

use std::sync::atomic::Ordering;

use common::{did, harness, session, verified_knot};

use tangled_appview::writes::{WriteError, graph, nodes, profile, pulls, repos};
use tangled_db::notifications;
use tangled_db::{graph as graph_db, pulls as pulls_db, repos as repos_db};
use tangled_rbac::actions;
use tangled_types::{AtUri, collections};

const KNOT: &str = "knot.example.com";
const ALICE: &str = "did:plc:alice";
const BOB: &str = "did:plc:bob";

// ── follow ───────────────────────────────────────────────────────────

#[tokio::test]
async fn follow_writes_pds_row_and_notification() {
    let h = harness().await;
    let alice = session(ALICE);

    let uri = graph::follow(&h.ctx, &alice, &did(BOB)).await.unwrap();
    assert_eq!(uri.collection(), collections::FOLLOW);

    // PDS record exists under the minted TID rkey
    assert_eq!(h.records.count_in(ALICE, collections::FOLLOW), 1);
    // local edge exists
    assert!(graph_db::follow_exists(h.db.pool(), ALICE, BOB).await.unwrap());
    // bob was notified
    let notes = notifications::list_for_recipient(h.db.pool(), BOB, false).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, "followed");
    assert_eq!(notes[0].actor_did, ALICE);
}

#[tokio::test]
async fn follow_respects_recipient_preferences() {
    let h = harness().await;
    let mut prefs = notifications::Preferences::default_for(BOB);
    prefs.followed = false;
    notifications::save_preferences(h.db.pool(), &prefs).await.unwrap();

    graph::follow(&h.ctx, &session(ALICE), &did(BOB)).await.unwrap();
    assert!(
        notifications::list_for_recipient(h.db.pool(), BOB, false)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn follow_then_unfollow_restores_pre_state() {
    let h = harness().await;
    let alice = session(ALICE);

    graph::follow(&h.ctx, &alice, &did(BOB)).await.unwrap();
    graph::unfollow(&h.ctx, &alice, &did(BOB)).await.unwrap();

    assert!(!graph_db::follow_exists(h.db.pool(), ALICE, BOB).await.unwrap());
    assert_eq!(h.records.count_in(ALICE, collections::FOLLOW), 0);
}

#[tokio::test]
async fn follow_fails_cleanly_when_pds_is_down() {
    let h = harness().await;
    h.records.fail_puts.store(true, Ordering::SeqCst);

    let err = graph::follow(&h.ctx, &session(ALICE), &did(BOB)).await.unwrap_err();
    assert!(matches!(err, WriteError::RemoteUnavailable(_)));
    assert!(!graph_db::follow_exists(h.db.pool(), ALICE, BOB).await.unwrap());
}

// ── repo create / delete ─────────────────────────────────────────────

async fn create_core_repo(h: &common::Harness) -> AtUri {
    repos::create_repo(
        &h.ctx,
        &session(ALICE),
        repos::NewRepoInput {
            name: "core".to_owned(),
            knot: KNOT.to_owned(),
            description: Some("the core".to_owned()),
            default_branch: None,
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn create_repo_spans_all_three_systems() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;

    let uri = create_core_repo(&h).await;

    // PDS
    assert_eq!(h.records.count_in(ALICE, collections::REPO), 1);
    // knot
    assert!(h.gateway.calls().iter().any(|c| c.starts_with("create:knot.example.com")));
    // DB
    let row = repos_db::get_by_at_uri(h.db.pool(), &uri.to_string()).await.unwrap().unwrap();
    assert_eq!(row.name, "core");
    // ACLs
    assert!(h.enforcer.enforce(ALICE, KNOT, "did:plc:alice/core", actions::REPO_PUSH));
}

#[tokio::test]
async fn create_repo_requires_knot_membership() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;

    let err = repos::create_repo(
        &h.ctx,
        &session(BOB), // not a member of the knot
        repos::NewRepoInput {
            name: "intruder".to_owned(),
            knot: KNOT.to_owned(),
            description: None,
            default_branch: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WriteError::Denied));
    assert_eq!(h.records.count_in(BOB, collections::REPO), 0);
}

#[tokio::test]
async fn knot_failure_rolls_back_the_pds_record() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;
    h.gateway.fail_create.store(true, Ordering::SeqCst);

    let err = repos::create_repo(
        &h.ctx,
        &session(ALICE),
        repos::NewRepoInput {
            name: "core".to_owned(),
            knot: KNOT.to_owned(),
            description: None,
            default_branch: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WriteError::RemoteUnavailable(_)));

    // post-state equals pre-state in all three stores
    assert_eq!(h.records.count_in(ALICE, collections::REPO), 0);
    assert!(repos_db::get_by_did_name(h.db.pool(), ALICE, "core").await.unwrap().is_none());
    assert!(h.enforcer.permissions_in_repo(ALICE, KNOT, "did:plc:alice/core").is_empty());
}

#[tokio::test]
async fn create_then_delete_round_trips() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;

    let uri = create_core_repo(&h).await;
    repos::delete_repo(&h.ctx, &session(ALICE), &uri).await.unwrap();

    assert_eq!(h.records.count_in(ALICE, collections::REPO), 0);
    assert!(repos_db::get_by_at_uri(h.db.pool(), &uri.to_string()).await.unwrap().is_none());
    assert!(h.enforcer.permissions_in_repo(ALICE, KNOT, "did:plc:alice/core").is_empty());
}

#[tokio::test]
async fn fork_name_collision_gets_a_suffix() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;
    h.enforcer.add_knot_member(KNOT, BOB);
    h.enforcer.save_policy().await.unwrap();

    // alice already has a repo named x; bob has the source repo x
    let alice_uri = repos::create_repo(
        &h.ctx,
        &session(ALICE),
        repos::NewRepoInput {
            name: "x".to_owned(),
            knot: KNOT.to_owned(),
            description: None,
            default_branch: None,
        },
    )
    .await
    .unwrap();
    let bob_uri = repos::create_repo(
        &h.ctx,
        &session(BOB),
        repos::NewRepoInput {
            name: "x".to_owned(),
            knot: KNOT.to_owned(),
            description: None,
            default_branch: None,
        },
    )
    .await
    .unwrap();

    let fork_uri = repos::fork_repo(
        &h.ctx,
        &session(ALICE),
        repos::ForkInput {
            source: bob_uri.clone(),
            knot: KNOT.to_owned(),
            name: None,
        },
    )
    .await
    .unwrap();

    let fork = repos_db::get_by_at_uri(h.db.pool(), &fork_uri.to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(fork.name.starts_with("x-"), "got {}", fork.name);
    assert_eq!(fork.name.len(), 5); // x- plus 3 random chars
    assert_eq!(fork.source_at.as_deref(), Some(bob_uri.to_string().as_str()));

    // the knot call and the PDS record both carry the suffixed name
    assert!(h.gateway.calls().iter().any(|c| c.starts_with("fork:") && c.ends_with(&fork.name)));
    let record = h.records.record(ALICE, collections::REPO, fork_uri.rkey()).unwrap();
    assert_eq!(record["name"].as_str().unwrap(), fork.name);

    // the original alice/x is untouched
    let original = repos_db::get_by_at_uri(h.db.pool(), &alice_uri.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(original.name, "x");
}

// ── pulls ────────────────────────────────────────────────────────────

const PATCH: &str = "diff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -1 +1 @@\n-x\n+y\n";

async fn open_patch_pull(h: &common::Harness, repo_at: &AtUri) -> AtUri {
    pulls::new_pull(
        &h.ctx,
        &session(BOB),
        pulls::NewPullInput {
            repo_at: repo_at.clone(),
            title: "fix".to_owned(),
            body: None,
            target_branch: "main".to_owned(),
            source: pulls::PullSource::Patch { patch: PATCH.to_owned() },
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn resubmit_with_identical_patch_is_rejected() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;
    let repo_at = create_core_repo(&h).await;
    let pull_at = open_patch_pull(&h, &repo_at).await;

    let err = pulls::resubmit(&h.ctx, &session(BOB), &pull_at, Some(PATCH.to_owned()))
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::Validation(_)));
    assert_eq!(
        pulls_db::count_submissions(h.db.pool(), &pull_at.to_string()).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn resubmit_with_junk_patch_is_rejected() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;
    let repo_at = create_core_repo(&h).await;
    let pull_at = open_patch_pull(&h, &repo_at).await;

    for junk in ["", "this is not a diff"] {
        let err = pulls::resubmit(&h.ctx, &session(BOB), &pull_at, Some(junk.to_owned()))
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Validation(_)), "accepted {junk:?}");
    }
}

#[tokio::test]
async fn resubmit_appends_a_round_when_the_patch_changes() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;
    let repo_at = create_core_repo(&h).await;
    let pull_at = open_patch_pull(&h, &repo_at).await;

    let round = pulls::resubmit(
        &h.ctx,
        &session(BOB),
        &pull_at,
        Some(format!("{PATCH}+z\n")),
    )
    .await
    .unwrap();
    assert_eq!(round, 1);
    let last = pulls_db::last_submission(h.db.pool(), &pull_at.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.round, 1);
}

#[tokio::test]
async fn branch_pull_resubmit_with_unchanged_rev_is_rejected() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;
    let repo_at = create_core_repo(&h).await;

    *h.gateway.compare_rev.lock() = "abc123".to_owned();
    let pull_at = pulls::new_pull(
        &h.ctx,
        &session(BOB),
        pulls::NewPullInput {
            repo_at: repo_at.clone(),
            title: "branch pull".to_owned(),
            body: None,
            target_branch: "main".to_owned(),
            source: pulls::PullSource::Branch { branch: "feature".to_owned() },
        },
    )
    .await
    .unwrap();
    let pds_writes_before = h.records.count_in(BOB, collections::PULL);

    // the knot reports the same rev2 as the last submission
    let err = pulls::resubmit(&h.ctx, &session(BOB), &pull_at, None).await.unwrap_err();
    match err {
        WriteError::Validation(msg) => assert_eq!(msg, "branch unchanged"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        pulls_db::count_submissions(h.db.pool(), &pull_at.to_string()).await.unwrap(),
        1
    );
    assert_eq!(h.records.count_in(BOB, collections::PULL), pds_writes_before);
}

#[tokio::test]
async fn pull_kinds_are_capability_gated() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;
    let repo_at = create_core_repo(&h).await;

    h.gateway.capabilities.lock().patch_submissions = false;
    let err = pulls::new_pull(
        &h.ctx,
        &session(BOB),
        pulls::NewPullInput {
            repo_at,
            title: "fix".to_owned(),
            body: None,
            target_branch: "main".to_owned(),
            source: pulls::PullSource::Patch { patch: PATCH.to_owned() },
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WriteError::Validation(_)));
    // the write was never attempted
    assert_eq!(h.records.count_in(BOB, collections::PULL), 0);
}

#[tokio::test]
async fn merge_flips_state_and_carries_author_identity() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;
    let repo_at = create_core_repo(&h).await;
    let pull_at = open_patch_pull(&h, &repo_at).await;

    // bob's verified primary email travels with the merge
    tangled_db::emails::insert(h.db.pool(), BOB, "bob@example.com", "c", chrono::Utc::now())
        .await
        .unwrap();
    tangled_db::emails::verify(h.db.pool(), BOB, "bob@example.com", "c").await.unwrap();
    let mut tx = h.db.begin().await.unwrap();
    tangled_db::emails::set_primary(&mut tx, BOB, "bob@example.com").await.unwrap();
    tx.commit().await.unwrap();

    pulls::merge(&h.ctx, &session(ALICE), &pull_at).await.unwrap();

    let pull = pulls_db::get_by_at_uri(h.db.pool(), &pull_at.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pull.state, pulls_db::STATE_MERGED);
    assert!(h.gateway.calls().iter().any(|c| c.starts_with("merge:") && c.contains("bob@example.com")));
}

#[tokio::test]
async fn failed_merge_leaves_state_unchanged() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;
    let repo_at = create_core_repo(&h).await;
    let pull_at = open_patch_pull(&h, &repo_at).await;
    h.gateway.fail_merge.store(true, Ordering::SeqCst);

    let err = pulls::merge(&h.ctx, &session(ALICE), &pull_at).await.unwrap_err();
    assert!(matches!(err, WriteError::RemoteUnavailable(_)));
    let pull = pulls_db::get_by_at_uri(h.db.pool(), &pull_at.to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(pull.is_open());
}

#[tokio::test]
async fn merge_requires_push_permission() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;
    let repo_at = create_core_repo(&h).await;
    let pull_at = open_patch_pull(&h, &repo_at).await;

    // bob authored the pull but cannot push to alice's repo
    let err = pulls::merge(&h.ctx, &session(BOB), &pull_at).await.unwrap_err();
    assert!(matches!(err, WriteError::Denied));
}

// ── knot registration & verification ─────────────────────────────────

#[tokio::test]
async fn knot_verification_state_machine() {
    let h = harness().await;
    let secret = nodes::register_knot(&h.ctx, &did(ALICE), "new-knot.example.com", false)
        .await
        .unwrap();
    assert_eq!(secret.len(), 64);

    // announced but unverified: not in the consumer source set
    assert!(tangled_db::knots::list_verified(h.db.pool()).await.unwrap().is_empty());

    // /owner answers with alice's DID (trailing newline trimmed upstream)
    h.gateway
        .owners
        .lock()
        .insert("new-knot.example.com".to_owned(), did(ALICE));
    let registration = nodes::verify_knot(&h.ctx, "new-knot.example.com").await.unwrap();
    assert!(registration.verified);

    // verified knots are role-wired: alice is server owner and member
    assert!(h.enforcer.enforce(
        ALICE,
        "new-knot.example.com",
        "new-knot.example.com",
        actions::SERVER_OWNER
    ));
    assert_eq!(
        tangled_db::knots::list_verified(h.db.pool()).await.unwrap().len(),
        1
    );

    // verification is monotonic: a second call is a no-op success
    let again = nodes::verify_knot(&h.ctx, "new-knot.example.com").await.unwrap();
    assert!(again.verified);
}

#[tokio::test]
async fn owner_proof_mismatch_blocks_verification() {
    let h = harness().await;
    nodes::register_knot(&h.ctx, &did(ALICE), "new-knot.example.com", false)
        .await
        .unwrap();
    h.gateway
        .owners
        .lock()
        .insert("new-knot.example.com".to_owned(), did(BOB));

    let err = nodes::verify_knot(&h.ctx, "new-knot.example.com").await.unwrap_err();
    assert!(matches!(err, WriteError::Validation(_)));
    let registration = tangled_db::knots::get_by_domain(h.db.pool(), "new-knot.example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(!registration.verified);
}

// ── collaborators & profile ──────────────────────────────────────────

#[tokio::test]
async fn collaborator_add_grants_push_only() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;
    let repo_at = create_core_repo(&h).await;

    repos::add_collaborator(&h.ctx, &session(ALICE), &repo_at, &did(BOB)).await.unwrap();

    assert!(h.enforcer.enforce(BOB, KNOT, "did:plc:alice/core", actions::REPO_PUSH));
    assert!(!h.enforcer.enforce(BOB, KNOT, "did:plc:alice/core", actions::REPO_DELETE));
    assert!(h.gateway.calls().iter().any(|c| c.starts_with("collab:")));
}

#[tokio::test]
async fn profile_pins_must_reference_known_repos() {
    let h = harness().await;
    verified_knot(&h, KNOT, ALICE).await;
    let repo_at = create_core_repo(&h).await;

    // unknown pin rejected
    let err = profile::update_profile(
        &h.ctx,
        &session(ALICE),
        profile::ProfileInput {
            description: None,
            location: None,
            links: vec![],
            pinned: vec![AtUri::parse("at://did:plc:alice/sh.tangled.repo/ghost").unwrap()],
            stats: vec![],
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WriteError::Validation(_)));

    // known pin accepted
    profile::update_profile(
        &h.ctx,
        &session(ALICE),
        profile::ProfileInput {
            description: Some("hi".to_owned()),
            location: None,
            links: vec![],
            pinned: vec![repo_at],
            stats: vec!["merged-prs".to_owned()],
        },
    )
    .await
    .unwrap();
    let stored = tangled_db::profiles::get(h.db.pool(), ALICE).await.unwrap().unwrap();
    assert_eq!(stored.pinned.len(), 1);
}
