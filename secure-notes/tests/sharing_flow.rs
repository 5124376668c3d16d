//! End-to-end sharing flows against the in-memory database.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use rstest::{fixture, rstest};
use secure_notes::domain::{
    ErrorCode, LiveState, Note, NoteDraft, NoteId, NoteStore, Subscription,
};
use secure_notes::outbound::memory::{MemoryDatabase, MemoryDocumentStore};
use secure_notes::test_support::{ClientSession, MutableClock};
use serde_json::json;
use tokio::time::timeout;

struct Deployment {
    clock: Arc<MutableClock>,
    database: Arc<MemoryDatabase>,
    alice: ClientSession,
    bob: ClientSession,
    carol: ClientSession,
}

#[fixture]
fn deployment() -> Deployment {
    let clock = Arc::new(MutableClock::new(
        chrono::DateTime::parse_from_rfc3339("2026-04-01T10:00:00Z")
            .expect("valid time")
            .to_utc(),
    ));
    let database = MemoryDatabase::new(Default::default());
    let session = |name: &str| ClientSession::signed_in(&database, name, clock.clone());
    Deployment {
        alice: session("alice"),
        bob: session("bob"),
        carol: session("carol"),
        clock,
        database,
    }
}

fn draft(owner: &ClientSession, title: &str, public: bool) -> Note {
    NoteStore::<MemoryDocumentStore>::create(NoteDraft {
        title: title.to_owned(),
        body: format!("{title} body"),
        public,
        owner: Some(owner.user_id.clone()),
    })
}

async fn private_note(owner: &ClientSession, title: &str) -> NoteId {
    owner
        .notes
        .insert(draft(owner, title, false))
        .await
        .expect("insert note")
        .id()
        .expect("inserted notes have ids")
}

async fn settle(
    subscription: &mut Subscription<Vec<Note>>,
    predicate: impl FnMut(&LiveState<Vec<Note>>) -> bool,
) -> LiveState<Vec<Note>> {
    timeout(Duration::from_secs(5), subscription.wait_for(predicate))
        .await
        .expect("state should arrive in time")
        .expect("subscription should still be running")
}

fn titles(state: &LiveState<Vec<Note>>) -> Vec<String> {
    state.value.iter().map(|note| note.title.clone()).collect()
}

#[rstest]
#[tokio::test]
async fn grant_then_revoke_follows_through_to_the_grantee(deployment: Deployment) {
    let Deployment {
        alice, bob, carol, ..
    } = deployment;
    let note = private_note(&alice, "n1").await;
    let mut shared = bob.sharing.subscribe_shared_with(Some(&bob.user_id));
    let initial = settle(&mut shared, |state| state.ready).await;
    assert!(initial.value.is_empty());

    alice
        .sharing
        .grant(&note, &bob.user_id, true)
        .await
        .expect("owner may grant");
    let state = settle(&mut shared, |state| !state.value.is_empty()).await;
    assert_eq!(titles(&state), ["n1"]);

    let refused = carol.notes.fetch(&note).await.expect_err("carol has no grant");
    assert_eq!(refused.code(), ErrorCode::Forbidden);

    alice
        .sharing
        .revoke(&note, &bob.user_id)
        .await
        .expect("owner may revoke");
    let state = settle(&mut shared, |state| state.value.is_empty()).await;
    assert!(state.ready);
    assert_eq!(state.error, None);
}

#[rstest]
#[tokio::test]
async fn a_grant_that_fails_mid_commit_leaves_nothing_behind(deployment: Deployment) {
    let note = private_note(&deployment.alice, "n1").await;
    let namespace = deployment.database.namespace().clone();
    deployment.database.abort_next_commit_after(1);

    let err = deployment
        .alice
        .sharing
        .grant(&note, &deployment.bob.user_id, true)
        .await
        .expect_err("injected fault");
    assert_eq!(err.code(), ErrorCode::Unavailable);
    assert_eq!(
        deployment
            .database
            .peek(&namespace.grant(&note, &deployment.bob.user_id)),
        None
    );
    assert_eq!(
        deployment
            .database
            .peek(&namespace.shared_note(&deployment.bob.user_id, &note)),
        None
    );
}

#[rstest]
#[tokio::test]
async fn granting_twice_only_moves_the_update_time(deployment: Deployment) {
    let Deployment {
        clock, alice, bob, ..
    } = deployment;
    let note = private_note(&alice, "n1").await;

    let first = alice
        .sharing
        .grant(&note, &bob.user_id, true)
        .await
        .expect("first grant");
    clock.advance_seconds(30);
    let second = alice
        .sharing
        .grant(&note, &bob.user_id, true)
        .await
        .expect("second grant");

    assert_eq!(second.read, first.read);
    assert_eq!(second.record.created_at, first.record.created_at);
    assert!(second.record.updated_at > first.record.updated_at);
    let stored = bob
        .sharing
        .fetch_grant(&note, &bob.user_id)
        .await
        .expect("grantee may read their grant")
        .expect("grant stored");
    assert_eq!(stored, second);
}

#[rstest]
#[tokio::test]
async fn hidden_notes_come_back_when_granted_again(deployment: Deployment) {
    let Deployment {
        database,
        alice,
        bob,
        ..
    } = deployment;
    let namespace = database.namespace().clone();
    let note = private_note(&alice, "n1").await;
    alice
        .sharing
        .grant(&note, &bob.user_id, true)
        .await
        .expect("grant");

    bob.sharing.hide(&note, &bob.user_id).await.expect("grantee may hide");
    assert_eq!(database.peek(&namespace.shared_note(&bob.user_id, &note)), None);
    let grant = bob
        .sharing
        .fetch_grant(&note, &bob.user_id)
        .await
        .expect("grant readable")
        .expect("grant kept");
    assert!(grant.read);
    assert!(bob.notes.fetch(&note).await.expect("still readable").is_some());

    alice
        .sharing
        .grant(&note, &bob.user_id, true)
        .await
        .expect("re-grant");
    let mut shared = bob.sharing.subscribe_shared_with(Some(&bob.user_id));
    let state = settle(&mut shared, |state| state.ready).await;
    assert_eq!(titles(&state), ["n1"]);
}

#[rstest]
#[tokio::test]
async fn grantees_cannot_revoke_their_own_access(deployment: Deployment) {
    let Deployment {
        database,
        alice,
        bob,
        ..
    } = deployment;
    let namespace = database.namespace().clone();
    let note = private_note(&alice, "n1").await;
    alice
        .sharing
        .grant(&note, &bob.user_id, true)
        .await
        .expect("grant");

    let err = bob
        .sharing
        .revoke(&note, &bob.user_id)
        .await
        .expect_err("revocation belongs to the owner");
    assert_eq!(err.code(), ErrorCode::Forbidden);
    assert!(database.peek(&namespace.grant(&note, &bob.user_id)).is_some());
    assert!(database.peek(&namespace.shared_note(&bob.user_id, &note)).is_some());
}

#[rstest]
#[tokio::test]
async fn owners_cannot_hide_notes_from_a_grantee(deployment: Deployment) {
    let Deployment {
        database,
        alice,
        bob,
        ..
    } = deployment;
    let namespace = database.namespace().clone();
    let note = private_note(&alice, "n1").await;
    alice
        .sharing
        .grant(&note, &bob.user_id, true)
        .await
        .expect("grant");

    let err = alice
        .sharing
        .hide(&note, &bob.user_id)
        .await
        .expect_err("only the grantee hides");
    assert_eq!(err.code(), ErrorCode::Forbidden);
    assert!(database.peek(&namespace.grant(&note, &bob.user_id)).is_some());
    assert!(database.peek(&namespace.shared_note(&bob.user_id, &note)).is_some());
}

#[rstest]
#[tokio::test]
async fn only_the_owner_may_share_or_revoke_for_others(deployment: Deployment) {
    let Deployment {
        alice, bob, carol, ..
    } = deployment;
    let note = private_note(&alice, "n1").await;
    alice
        .sharing
        .grant(&note, &bob.user_id, true)
        .await
        .expect("grant");

    let err = bob
        .sharing
        .grant(&note, &carol.user_id, true)
        .await
        .expect_err("grantee cannot re-share");
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let err = carol
        .sharing
        .revoke(&note, &bob.user_id)
        .await
        .expect_err("stranger cannot revoke");
    assert_eq!(err.code(), ErrorCode::Forbidden);
}

#[rstest]
#[tokio::test]
async fn sharing_a_missing_note_is_not_found(deployment: Deployment) {
    let missing = NoteId::new("missing").expect("valid note id");
    let err = deployment
        .alice
        .sharing
        .grant(&missing, &deployment.bob.user_id, true)
        .await
        .expect_err("no such note");
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(err.details(), Some(&json!({"noteId": "missing"})));
}

#[rstest]
#[tokio::test]
async fn saves_stamp_and_respect_ownership(deployment: Deployment) {
    let Deployment {
        clock, alice, bob, ..
    } = deployment;
    let inserted = alice
        .notes
        .insert(draft(&alice, "n1", false))
        .await
        .expect("insert");
    assert_eq!(inserted.record.created_at, inserted.record.updated_at);

    clock.advance_seconds(5);
    let mut edited = inserted.clone();
    edited.body = "revised".to_owned();
    let saved = alice.notes.save(&edited).await.expect("owner may save");
    assert_eq!(saved.record.created_at, inserted.record.created_at);
    assert_eq!(saved.record.updated_at, clock.utc());

    let id = saved.id().expect("saved notes have ids");
    let reloaded = alice.notes.fetch(&id).await.expect("read").expect("present");
    assert_eq!(reloaded, saved);

    let err = bob.notes.save(&saved).await.expect_err("not the owner");
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let mut ghost = saved.clone();
    ghost.record.id = "ghost".to_owned();
    let err = alice.notes.save(&ghost).await.expect_err("missing note");
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[rstest]
#[tokio::test]
async fn public_listing_excludes_private_notes(deployment: Deployment) {
    let Deployment { alice, bob, .. } = deployment;
    alice
        .notes
        .insert(draft(&alice, "open", true))
        .await
        .expect("insert public");
    private_note(&alice, "closed").await;

    let mut public = bob.notes.subscribe_public();
    let state = settle(&mut public, |state| state.ready).await;
    assert_eq!(titles(&state), ["open"]);

    let mut own = alice.notes.subscribe_by_owner(Some(&alice.user_id));
    let state = settle(&mut own, |state| state.value.len() == 2).await;
    assert_eq!(state.error, None);
}

#[rstest]
#[tokio::test]
async fn deleted_notes_drop_out_of_shared_lists(deployment: Deployment) {
    let Deployment { alice, bob, .. } = deployment;
    let kept = private_note(&alice, "kept").await;
    let doomed = private_note(&alice, "doomed").await;
    for note in [&kept, &doomed] {
        alice
            .sharing
            .grant(note, &bob.user_id, true)
            .await
            .expect("grant");
    }

    alice.notes.delete(&doomed).await.expect("owner may delete");
    let mut shared = bob.sharing.subscribe_shared_with(Some(&bob.user_id));
    let state = settle(&mut shared, |state| state.ready).await;
    assert_eq!(titles(&state), ["kept"]);
    assert_eq!(state.error, None);
}

#[rstest]
#[tokio::test]
async fn refused_listings_report_through_the_error_slot(deployment: Deployment) {
    let Deployment {
        database,
        bob,
        carol,
        ..
    } = deployment;
    let mut snooping = carol.sharing.subscribe_shared_with(Some(&bob.user_id));
    let state = settle(&mut snooping, |state| state.ready).await;
    assert!(state.value.is_empty());
    assert_eq!(state.error.map(|err| err.code()), Some(ErrorCode::Forbidden));
    assert_eq!(database.active_listeners(), 0);
}
