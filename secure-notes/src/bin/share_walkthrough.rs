//! Walk through sharing a private note between three in-memory clients.
//!
//! Alice writes a private note and shares it with Bob, whose shared-with-me
//! list picks it up; Carol is refused; Alice revokes and Bob's list empties.
//!
//! # Examples
//! ```sh
//! SECURE_NOTES_LOG_JSON=true cargo run --bin share-walkthrough -- --title "Plans"
//! ```
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use secure_notes::SecureNotesSettings;
use secure_notes::domain::ports::AuthSubject;
use secure_notes::domain::{
    Credential, EmailCredentials, ErrorCode, IdentityService, LiveState, Namespace, Note,
    NoteDraft, NoteStore, SharingIndex, Subscription, SubscriptionCoordinator, UserId,
};
use secure_notes::outbound::memory::{MemoryDatabase, MemoryDocumentStore, MemoryIdentityBackend};
use tokio::runtime::Builder;
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// `share-walkthrough` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "share-walkthrough",
    about = "Share a private note between in-memory clients and report each step",
    version
)]
struct CliArgs {
    /// Title of the note Alice shares.
    #[arg(long, default_value = "Quarterly plans")]
    title: String,
    /// Body of the note Alice shares.
    #[arg(long, default_value = "Ship the sharing index.")]
    body: String,
    /// Seconds to wait for each live update before giving up.
    #[arg(long = "wait-secs", default_value_t = 5)]
    wait_secs: u64,
}

struct Client {
    identity: IdentityService<MemoryIdentityBackend, MemoryDocumentStore>,
    notes: NoteStore<MemoryDocumentStore>,
    sharing: SharingIndex<MemoryDocumentStore>,
}

fn main() -> io::Result<()> {
    let args = CliArgs::try_parse().map_err(io::Error::other)?;
    let settings = SecureNotesSettings::load_from_iter([OsString::from("share-walkthrough")])
        .map_err(|error| io::Error::other(format!("load settings: {error}")))?;
    init_tracing(settings.log_json);

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| io::Error::other(format!("create Tokio runtime: {error}")))?;
    runtime.block_on(async_main(args, settings))
}

fn init_tracing(json: bool) {
    let builder = fmt().with_env_filter(EnvFilter::from_default_env());
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(error) = installed {
        warn!(error = %error, "tracing init failed");
    }
}

fn step_failed(step: &str, error: impl std::fmt::Display) -> io::Error {
    io::Error::other(format!("{step}: {error}"))
}

async fn connect(
    database: &Arc<MemoryDatabase>,
    clock: &Arc<dyn Clock>,
    name: &str,
) -> io::Result<Client> {
    let user_id = UserId::new(name.to_lowercase()).map_err(|error| step_failed("user id", error))?;
    let email = format!("{user_id}@example.com");
    let password = format!("{user_id}-password");

    let backend = Arc::new(MemoryIdentityBackend::new());
    backend.register_password(
        &email,
        &password,
        AuthSubject {
            id: user_id,
            display_name: Some(name.to_owned()),
        },
    );
    let store = Arc::new(MemoryDocumentStore::connect(
        Arc::clone(database),
        backend.as_ref(),
    ));
    let namespace = database.namespace().clone();
    let client = Client {
        identity: IdentityService::new(
            backend,
            Arc::clone(&store),
            namespace.clone(),
            Arc::clone(clock),
        ),
        notes: NoteStore::new(Arc::clone(&store), namespace.clone(), Arc::clone(clock)),
        sharing: SharingIndex::new(store, namespace, Arc::clone(clock)),
    };

    let credentials = EmailCredentials::try_from_parts(&email, &password)
        .map_err(|error| step_failed("credentials", error))?;
    let user = client
        .identity
        .sign_in_with_credential(Credential::EmailPassword(credentials))
        .await
        .map_err(|error| step_failed("sign in", error))?;
    info!(user_id = %user.id(), name = user.name(), "client signed in");
    Ok(client)
}

async fn await_state(
    subscription: &mut Subscription<Vec<Note>>,
    wait: Duration,
    step: &str,
    predicate: impl FnMut(&LiveState<Vec<Note>>) -> bool,
) -> io::Result<LiveState<Vec<Note>>> {
    timeout(wait, subscription.wait_for(predicate))
        .await
        .map_err(|_| step_failed(step, "timed out"))?
        .ok_or_else(|| step_failed(step, "subscription stopped"))
}

fn titles(state: &LiveState<Vec<Note>>) -> Vec<&str> {
    state.value.iter().map(|note| note.title.as_str()).collect()
}

async fn async_main(args: CliArgs, settings: SecureNotesSettings) -> io::Result<()> {
    let namespace: Namespace = settings
        .namespace()
        .map_err(|error| step_failed("namespace", error))?;
    info!(root = %namespace.root(), "starting walkthrough");
    let database = MemoryDatabase::new(namespace);
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let wait = Duration::from_secs(args.wait_secs);

    let alice = connect(&database, &clock, "Alice").await?;
    let bob = connect(&database, &clock, "Bob").await?;
    let carol = connect(&database, &clock, "Carol").await?;

    let alice_identity = alice.identity.current_identity();
    let mut own = alice.notes.follow_owner(&alice_identity);
    let bob_identity = bob.identity.current_identity();
    let mut shared = bob.sharing.follow_shared_with(&bob_identity);
    let mut coordinator = SubscriptionCoordinator::new().track(&own).track(&shared);
    let status = timeout(wait, coordinator.settled())
        .await
        .map_err(|_| step_failed("initial load", "timed out"))?;
    info!(?status, "subscriptions settled");

    let owner = alice_identity.current().value.map(|user| user.id().clone());
    let note = alice
        .notes
        .insert(NoteStore::<MemoryDocumentStore>::create(NoteDraft {
            title: args.title.clone(),
            body: args.body,
            public: false,
            owner,
        }))
        .await
        .map_err(|error| step_failed("insert note", error))?;
    let note_id = note.id().map_err(|error| step_failed("note id", error))?;
    let state = await_state(&mut own, wait, "alice's notes", |state| !state.value.is_empty()).await?;
    info!(note_id = %note_id, titles = ?titles(&state), "alice's notes updated");

    let bob_id = UserId::new("bob").map_err(|error| step_failed("user id", error))?;
    alice
        .sharing
        .grant(&note_id, &bob_id, true)
        .await
        .map_err(|error| step_failed("grant", error))?;
    let state = await_state(&mut shared, wait, "bob's shared list", |state| {
        state.value.iter().any(|item| item.title == args.title)
    })
    .await?;
    info!(titles = ?titles(&state), "bob sees the shared note");

    match carol.notes.fetch(&note_id).await {
        Err(error) if error.code() == ErrorCode::Forbidden => {
            info!(error = %error, "carol is refused");
        }
        Ok(_) => return Err(step_failed("carol's read", "unexpectedly allowed")),
        Err(error) => return Err(step_failed("carol's read", error)),
    }

    alice
        .sharing
        .revoke(&note_id, &bob_id)
        .await
        .map_err(|error| step_failed("revoke", error))?;
    let state = await_state(&mut shared, wait, "bob's shared list", |state| {
        state.ready && state.value.is_empty()
    })
    .await?;
    info!(titles = ?titles(&state), "bob's shared list is empty again");

    drop(coordinator);
    own.unsubscribe();
    shared.unsubscribe();
    info!(listeners = database.active_listeners(), "walkthrough finished");
    Ok(())
}
