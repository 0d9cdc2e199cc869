//! Piece lifecycle integration tests
//! Run with: cargo test --test lifecycle_test

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use carik_pieces::{
    owner_of, BoxError, Check, CheckScope, Command, CommandError, CommandKind, ConsoleHost,
    Context, Hook, HookPhase, Host, HostError, Listener, Piece, PieceError, TaskLoop,
};
use tokio::sync::{mpsc, Barrier};
use tokio::time::timeout;

static INIT: Once = Once::new();

fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

type Log = Arc<Mutex<Vec<&'static str>>>;

fn reply(kind: CommandKind, name: &str, text: &'static str) -> Command {
    Command::of_kind(kind, name).with_handler(move |_| async move { Ok(text.to_string()) })
}

fn recording(name: &'static str, result: bool, log: &Log) -> Check {
    let log = log.clone();
    Check::sync(name, move |_| {
        log.lock().unwrap().push(name);
        result
    })
}

fn idle_loop(name: &str) -> TaskLoop {
    TaskLoop::new(name, Duration::from_secs(60), || async { Ok(()) })
}

fn prefix_ctx() -> Context {
    Context::new(CommandKind::Prefix, "").with_user("42")
}

/// Registering the same qualified name twice keeps only the second command
#[tokio::test]
async fn test_overwrite_by_name() {
    ensure_init();
    let piece = Piece::new("overwrite");
    piece.command(reply(CommandKind::Prefix, "greet", "first")).unwrap();
    piece.command(reply(CommandKind::Prefix, "greet", "second")).unwrap();
    assert_eq!(piece.commands().len(), 1);

    let host = Arc::new(ConsoleHost::default());
    piece.load(host.clone()).await.unwrap();

    assert_eq!(host.command_names(CommandKind::Prefix), vec!["greet"]);
    let out = host.invoke(CommandKind::Prefix, "greet", prefix_ctx()).await.unwrap();
    assert_eq!(out, "second");
}

/// Piece-wide checks run before a command's own checks
#[tokio::test]
async fn test_piece_checks_run_before_local_checks() {
    ensure_init();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let piece = Piece::new("checks");
    piece.command_check(recording("G", true, &log));
    piece
        .command(reply(CommandKind::Prefix, "guarded", "ok").with_check(recording("L", true, &log)))
        .unwrap();

    let host = Arc::new(ConsoleHost::default());
    piece.load(host.clone()).await.unwrap();

    let out = host.invoke(CommandKind::Prefix, "guarded", prefix_ctx()).await.unwrap();
    assert_eq!(out, "ok");
    assert_eq!(*log.lock().unwrap(), vec!["G", "L"]);

    // Registry copy is untouched; only the attached command got the prefix
    assert_eq!(piece.commands()[0].checks.len(), 1);
    assert_eq!(host.command(CommandKind::Prefix, "guarded").unwrap().checks.len(), 2);
}

/// A failing piece-wide check keeps local checks from being evaluated
#[tokio::test]
async fn test_failing_piece_check_short_circuits() {
    ensure_init();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let piece = Piece::new("checks");
    piece.command_check(recording("G", false, &log));
    piece
        .command(reply(CommandKind::Prefix, "guarded", "ok").with_check(recording("L", true, &log)))
        .unwrap();

    let host = Arc::new(ConsoleHost::default());
    piece.load(host.clone()).await.unwrap();

    let err = host.invoke(CommandKind::Prefix, "guarded", prefix_ctx()).await.unwrap_err();
    assert!(matches!(err, CommandError::CheckFailed(name) if name == "G"));
    assert_eq!(*log.lock().unwrap(), vec!["G"]);
}

/// Global checks land on the host with the right scopes
#[tokio::test]
async fn test_global_checks_scoped_on_host() {
    ensure_init();
    let piece = Piece::new("globals");
    piece.global_command_check(Check::sync("prefix", |_| true));
    piece.global_command_check_once(Check::sync("once", |_| true));
    piece.global_application_command_check(Check::sync("no-apps", |_| false));
    piece.global_slash_command_check(Check::sync("slash", |_| true));
    piece.global_user_command_check(Check::sync("user", |_| true));
    piece.global_message_command_check(Check::sync("message", |_| true));
    piece.command(reply(CommandKind::Prefix, "info", "prefix ok")).unwrap();
    piece.slash_command(reply(CommandKind::Slash, "info", "slash ok")).unwrap();

    let host = Arc::new(ConsoleHost::default());
    piece.load(host.clone()).await.unwrap();

    assert_eq!(host.check_count(CheckScope::Prefix), 2);
    assert_eq!(host.check_count(CheckScope::Application), 1);
    assert_eq!(host.check_count(CheckScope::Slash), 1);
    assert_eq!(host.check_count(CheckScope::User), 1);
    assert_eq!(host.check_count(CheckScope::Message), 1);

    let prefix = host.invoke(CommandKind::Prefix, "info", prefix_ctx()).await;
    assert_eq!(prefix.unwrap(), "prefix ok");

    let slash = host
        .invoke(CommandKind::Slash, "info", Context::new(CommandKind::Slash, "info"))
        .await;
    assert!(matches!(slash, Err(CommandError::CheckFailed(name)) if name == "no-apps"));
}

/// Load followed by unload restores the host tables and stops loops
#[tokio::test]
async fn test_load_unload_symmetry() {
    ensure_init();
    let piece = Piece::new("symmetry");
    for (kind, name) in [
        (CommandKind::Prefix, "echo"),
        (CommandKind::Prefix, "help"),
        (CommandKind::Slash, "ping"),
        (CommandKind::User, "Profile"),
        (CommandKind::Message, "Quote"),
    ] {
        piece.register_command(kind, reply(kind, name, "x")).unwrap();
    }
    piece.slash_command_check(Check::sync("local-slash", |_| true));
    piece.global_command_check(Check::sync("g", |_| true));
    piece.global_command_check_once(Check::sync("g-once", |_| true));
    piece.global_application_command_check(Check::sync("g-app", |_| true));
    piece.global_user_command_check(Check::sync("g-user", |_| true));
    piece.listener("message", |_| async {});
    piece.listener("message", |_| async {});
    piece.listener("ready", |_| async {});
    let plain = piece.register_loop(idle_loop("plain"), false).unwrap();
    let guarded = piece.register_loop(idle_loop("guarded"), true).unwrap();

    let host = Arc::new(ConsoleHost::default());
    host.add_command(reply(CommandKind::Prefix, "outsider", "x")).unwrap();
    let before = host.snapshot();

    piece.load(host.clone()).await.unwrap();
    let loaded = host.snapshot();
    assert_eq!(loaded.commands.len(), before.commands.len() + 5);
    assert_eq!(loaded.checks.len(), 4);
    assert_eq!(loaded.listeners.len(), 3);
    assert!(plain.is_running());
    assert!(guarded.is_running());

    piece.unload(host.clone()).await.unwrap();
    assert_eq!(host.snapshot(), before);
    assert!(!plain.is_running());
    assert!(!guarded.is_running());

    // The attached host survives unload
    assert_eq!(piece.host().unwrap().name(), "console");
}

/// A failing pre-load hook aborts before anything reaches the host
#[tokio::test]
async fn test_failing_pre_load_hook_aborts_load() {
    ensure_init();
    let piece = Piece::new("hooks");
    for i in 0..3 {
        piece.load_hook(
            false,
            Hook::new(format!("pre-{}", i), move || async move {
                if i == 1 {
                    Err::<(), BoxError>("hook #2 failed".into())
                } else {
                    Ok(())
                }
            }),
        );
    }
    let post_ran = Arc::new(Mutex::new(false));
    let flag = post_ran.clone();
    piece.load_hook(
        true,
        Hook::new("post", move || {
            let flag = flag.clone();
            async move {
                *flag.lock().unwrap() = true;
                Ok(())
            }
        }),
    );
    piece.command(reply(CommandKind::Prefix, "echo", "x")).unwrap();
    piece.listener("message", |_| async {});
    let task = piece.register_loop(idle_loop("tick"), false).unwrap();

    let host = Arc::new(ConsoleHost::default());
    let err = piece.load(host.clone()).await.unwrap_err();

    assert!(matches!(err, PieceError::Hook { phase: HookPhase::PreLoad, .. }));
    assert!(err.to_string().contains("hook #2 failed"));
    assert!(piece.is_attached());
    assert!(host.snapshot().is_empty());
    assert!(!task.is_running());
    assert!(!*post_ran.lock().unwrap());
    assert_eq!(host.sync_requests(), 0);
}

/// Hooks in one phase run concurrently, not one after another
#[tokio::test]
async fn test_hooks_in_a_phase_run_concurrently() {
    ensure_init();
    let piece = Piece::new("concurrent");
    let barrier = Arc::new(Barrier::new(2));
    for name in ["left", "right"] {
        let barrier = barrier.clone();
        piece.unload_hook(
            false,
            Hook::new(name, move || {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    Ok(())
                }
            }),
        );
    }

    let host = Arc::new(ConsoleHost::default());
    piece.load(host.clone()).await.unwrap();
    timeout(Duration::from_secs(1), piece.unload(host.clone()))
        .await
        .expect("hooks deadlocked")
        .unwrap();
}

/// A loop can only carry one ready guard
#[tokio::test]
async fn test_ready_guard_is_unique() {
    ensure_init();
    let piece = Piece::new("loops");
    let task = piece.register_loop(idle_loop("tick"), true).unwrap();

    let err = piece.register_loop(task.clone(), true).unwrap_err();
    assert!(matches!(err, PieceError::DuplicateGuard(name) if name == "tick"));
    assert_eq!(piece.loops().len(), 1);
    assert!(task.has_before_loop());

    let custom = idle_loop("custom");
    custom.set_before_loop(|| async { Ok(()) }).unwrap();
    assert!(piece.register_loop(custom.clone(), true).is_err());
    assert!(piece.register_loop(custom, false).is_ok());
    assert_eq!(piece.loops().len(), 2);
}

/// The ready guard holds the first iteration until the host is ready
#[tokio::test]
async fn test_ready_guard_waits_for_host() {
    ensure_init();
    let piece = Piece::new("ready");
    let (tx, mut rx) = mpsc::unbounded_channel();
    piece
        .create_loop("fetch", Duration::from_millis(5), move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
                Ok(())
            }
        })
        .unwrap();

    let host = Arc::new(ConsoleHost::default());
    piece.load(host.clone()).await.unwrap();

    assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());

    host.set_ready();
    timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();

    piece.unload(host.clone()).await.unwrap();
}

/// Every kind of entry resolves back to the piece that registered it
#[tokio::test]
async fn test_owner_round_trip() {
    ensure_init();
    let piece = Piece::new("owner");
    for kind in CommandKind::ALL {
        let cmd = piece.register_command(kind, reply(kind, "info", "x")).unwrap();
        assert_eq!(owner_of(&cmd).unwrap(), piece);
    }
    let listener = piece.add_listener(Some("message"), Listener::new("on_message", |_| async {}));
    let task = piece.register_loop(idle_loop("tick"), false).unwrap();
    assert_eq!(owner_of(&listener).unwrap(), piece);
    assert_eq!(owner_of(&task).unwrap(), piece);

    // Entries attached to a host keep their owner
    let host = Arc::new(ConsoleHost::default());
    piece.load(host.clone()).await.unwrap();
    let attached = host.command(CommandKind::Slash, "info").unwrap();
    assert_eq!(owner_of(&attached).unwrap(), piece);

    let loose = reply(CommandKind::Prefix, "loose", "x");
    assert!(matches!(owner_of(&loose), Err(PieceError::NotOwned(_))));
}

/// A host rejection leaves a partial load that unload cleans up without
/// touching another piece's command
#[tokio::test]
async fn test_partial_load_then_unload() {
    ensure_init();
    let host = Arc::new(ConsoleHost::default());

    let first = Piece::new("first");
    first.command(reply(CommandKind::Prefix, "ping", "first")).unwrap();
    first.load(host.clone()).await.unwrap();

    let second = Piece::new("second");
    for name in ["alpha", "ping", "zeta"] {
        second.command(reply(CommandKind::Prefix, name, "second")).unwrap();
    }
    second.listener("message", |_| async {});

    let err = second.load(host.clone()).await.unwrap_err();
    let duplicate = HostError::DuplicateCommand {
        kind: CommandKind::Prefix,
        name: "ping".to_string(),
    };
    assert!(matches!(err, PieceError::Host(ref host_err) if *host_err == duplicate));
    assert_eq!(host.command_names(CommandKind::Prefix), vec!["ping", "alpha"]);
    assert_eq!(host.listener_count("message"), 0);

    second.unload(host.clone()).await.unwrap();
    assert_eq!(host.command_names(CommandKind::Prefix), vec!["ping"]);
    let out = host.invoke(CommandKind::Prefix, "ping", prefix_ctx()).await.unwrap();
    assert_eq!(out, "first");

    // Unloading again is a no-op
    second.unload(host.clone()).await.unwrap();
    assert_eq!(host.command_names(CommandKind::Prefix), vec!["ping"]);
}

/// Unload takes back a command it attached even when another piece
/// registered that command value first
#[tokio::test]
async fn test_unload_removes_shared_command_it_attached() {
    ensure_init();
    let first = Piece::new("first");
    let second = Piece::new("second");
    let cmd = first.command(reply(CommandKind::Prefix, "ping", "x")).unwrap();
    second.command(cmd).unwrap();

    let host = Arc::new(ConsoleHost::default());
    second.load(host.clone()).await.unwrap();
    assert_eq!(host.command_names(CommandKind::Prefix), vec!["ping"]);

    second.unload(host.clone()).await.unwrap();
    assert!(host.snapshot().is_empty());
}

/// A command swapped out on the host after load is left in place
#[tokio::test]
async fn test_unload_skips_command_replaced_on_host() {
    ensure_init();
    let piece = Piece::new("replaced");
    piece.command(reply(CommandKind::Prefix, "ping", "piece")).unwrap();

    let host = Arc::new(ConsoleHost::default());
    piece.load(host.clone()).await.unwrap();
    host.remove_command(CommandKind::Prefix, "ping");
    host.add_command(reply(CommandKind::Prefix, "ping", "outsider")).unwrap();

    piece.unload(host.clone()).await.unwrap();
    let out = host.invoke(CommandKind::Prefix, "ping", prefix_ctx()).await.unwrap();
    assert_eq!(out, "outsider");
}

/// Cleaning up after a rejected check leaves the other piece's copy attached
#[tokio::test]
async fn test_partial_load_keeps_checks_of_other_pieces() {
    ensure_init();
    let shared = Check::sync("staff-only", |_| true);
    let first = Piece::new("first");
    first.global_command_check(shared.clone());
    let second = Piece::new("second");
    second.global_command_check(shared);
    second.listener("message", |_| async {});

    let host = Arc::new(ConsoleHost::default());
    first.load(host.clone()).await.unwrap();

    let err = second.load(host.clone()).await.unwrap_err();
    assert!(matches!(
        err,
        PieceError::Host(HostError::DuplicateCheck(ref name)) if name == "staff-only"
    ));
    assert_eq!(host.listener_count("message"), 0);

    second.unload(host.clone()).await.unwrap();
    assert_eq!(host.check_count(CheckScope::Prefix), 1);

    first.unload(host.clone()).await.unwrap();
    assert!(host.snapshot().is_empty());
}

/// Slash, user and message commands run piece-wide checks before their own,
/// and a failing piece-wide check keeps the command's checks from running
#[tokio::test]
async fn test_application_commands_run_piece_checks_first() {
    ensure_init();
    for (kind, name) in [
        (CommandKind::Slash, "guarded"),
        (CommandKind::User, "Guarded"),
        (CommandKind::Message, "Guarded"),
    ] {
        for allow in [true, false] {
            let log: Log = Arc::new(Mutex::new(Vec::new()));
            let piece = Piece::new("application");
            let global = recording("G", allow, &log);
            match kind {
                CommandKind::Slash => piece.slash_command_check(global),
                CommandKind::User => piece.user_command_check(global),
                _ => piece.message_command_check(global),
            };
            let cmd = reply(kind, name, "ok").with_check(recording("L", true, &log));
            piece.register_command(kind, cmd).unwrap();

            let host = Arc::new(ConsoleHost::default());
            piece.load(host.clone()).await.unwrap();

            let out = host.invoke(kind, name, Context::new(kind, name)).await;
            if allow {
                assert_eq!(out.unwrap(), "ok");
                assert_eq!(*log.lock().unwrap(), vec!["G", "L"], "{} command", kind);
            } else {
                assert!(matches!(out, Err(CommandError::CheckFailed(ref failed)) if failed == "G"));
                assert_eq!(*log.lock().unwrap(), vec!["G"], "{} command", kind);
            }
        }
    }
}

/// After unload a piece can be loaded onto a different host
#[tokio::test]
async fn test_reload_onto_different_host() {
    ensure_init();
    let piece = Piece::new("mobile");
    piece.command(reply(CommandKind::Prefix, "echo", "x")).unwrap();
    piece.listener("message", |_| async {});
    let task = piece.register_loop(idle_loop("tick"), false).unwrap();

    let first = Arc::new(ConsoleHost::new("first"));
    let second = Arc::new(ConsoleHost::new("second"));

    piece.load(first.clone()).await.unwrap();
    piece.unload(first.clone()).await.unwrap();
    piece.load(second.clone()).await.unwrap();

    assert_eq!(piece.host().unwrap().name(), "second");
    assert!(first.snapshot().is_empty());
    assert_eq!(second.command_names(CommandKind::Prefix), vec!["echo"]);
    assert_eq!(second.dispatch("message", serde_json::json!({})).await, 1);
    assert!(task.is_running());

    piece.unload(second.clone()).await.unwrap();
    assert!(second.snapshot().is_empty());
}

/// Each load and unload asks for exactly one command sync
#[tokio::test]
async fn test_one_sync_per_transition() {
    ensure_init();
    let piece = Piece::new("sync");
    for name in ["a", "b", "c"] {
        piece.slash_command(reply(CommandKind::Slash, name, "x")).unwrap();
    }

    let host = Arc::new(ConsoleHost::default());
    piece.load(host.clone()).await.unwrap();
    assert_eq!(host.sync_requests(), 1);
    assert!(host.flush_command_sync());

    piece.unload(host.clone()).await.unwrap();
    assert_eq!(host.sync_requests(), 2);
    assert_eq!(host.syncs(), 1);
}

/// Listeners receive events only while the piece is loaded
#[tokio::test]
async fn test_listeners_follow_lifecycle() {
    ensure_init();
    let piece = Piece::new("events");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    piece.listener("message", move |payload| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(payload["content"].as_str().unwrap_or_default().to_string());
        }
    });

    let host = Arc::new(ConsoleHost::default());
    piece.load(host.clone()).await.unwrap();
    host.dispatch("message", serde_json::json!({ "content": "hello" })).await;

    piece.unload(host.clone()).await.unwrap();
    assert_eq!(host.dispatch("message", serde_json::json!({ "content": "ignored" })).await, 0);

    assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
}

/// Setup and teardown handlers drive load and unload on the runtime
#[tokio::test]
async fn test_extension_handlers() {
    ensure_init();
    let piece = Piece::new("extension");
    piece.command(reply(CommandKind::Prefix, "echo", "x")).unwrap();
    let (setup, teardown) = piece.extension_handlers();

    let host = Arc::new(ConsoleHost::default());
    setup(host.clone()).await.unwrap().unwrap();
    assert_eq!(host.command_names(CommandKind::Prefix), vec!["echo"]);

    teardown(host.clone()).await.unwrap().unwrap();
    assert!(host.snapshot().is_empty());
}
