//! Lifecycle and edge-case tests for the bridge.

#![cfg(unix)]

use std::time::Duration;

use streambridge::bridge::{Bridge, BridgeError, BridgeState, CommandSpec, SeparatorSet, Tuple};
use streambridge::environment::StaticEnvironment;

fn sh(script: &str) -> Bridge {
    Bridge::with_command(CommandSpec::new("sh").args(["-c", script]))
        .flush_timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn prepare_transitions_to_running() {
    let mut bridge = sh("cat");
    assert_eq!(bridge.state(), BridgeState::Uninitialized);

    bridge.prepare(&StaticEnvironment::local()).unwrap();
    assert_eq!(bridge.state(), BridgeState::Running);
    assert!(bridge.pid().is_some());

    let mut sink: Vec<Tuple> = Vec::new();
    bridge.finish(&mut sink).await.unwrap();
    assert_eq!(bridge.state(), BridgeState::Closed);
}

#[tokio::test]
async fn prepare_twice_is_rejected() {
    let mut bridge = sh("cat");
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let err = bridge.prepare(&StaticEnvironment::local()).unwrap_err();
    assert!(matches!(err, BridgeError::AlreadyPrepared));

    let err = bridge.configure(CommandSpec::new("cat"), None).unwrap_err();
    assert!(matches!(err, BridgeError::AlreadyPrepared));

    bridge.finish(&mut Vec::<Tuple>::new()).await.unwrap();
}

#[tokio::test]
async fn no_transition_out_of_closed() {
    let mut bridge = sh("true");
    bridge.prepare(&StaticEnvironment::local()).unwrap();
    bridge.finish(&mut Vec::<Tuple>::new()).await.unwrap();

    assert!(matches!(
        bridge.prepare(&StaticEnvironment::local()),
        Err(BridgeError::Closed)
    ));
    assert!(matches!(bridge.write("late").await, Err(BridgeError::Closed)));
    assert!(matches!(
        bridge.flush_non_blocking(&mut Vec::<Tuple>::new()),
        Err(BridgeError::Closed)
    ));
}

#[tokio::test]
async fn zero_output_child() {
    let mut bridge = sh("true");
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    assert_eq!(bridge.finish(&mut sink).await.unwrap(), 0);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn unterminated_record_surfaces_at_finish() {
    let mut bridge = sh("printf 'first\\n\\ntail'");
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    bridge.finish(&mut sink).await.unwrap();
    assert_eq!(sink, vec![Tuple::new(0, "first"), Tuple::new(7, "tail")]);
}

#[tokio::test]
async fn finish_twice_is_noop() {
    let mut bridge = sh("printf 'x\\n'");
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    assert_eq!(bridge.finish(&mut sink).await.unwrap(), 1);

    let mut again: Vec<Tuple> = Vec::new();
    assert_eq!(bridge.finish(&mut again).await.unwrap(), 0);
    assert!(again.is_empty());
}

#[tokio::test]
async fn flush_after_output_closed_fails_fast() {
    let mut bridge = sh("true").flush_timeout(Duration::from_secs(60));
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    let err = tokio::time::timeout(Duration::from_secs(10), bridge.flush_blocking(&mut sink))
        .await
        .expect("flush should not wait for the full timeout")
        .unwrap_err();
    assert!(matches!(err, BridgeError::OutputClosed));

    bridge.finish(&mut sink).await.unwrap();
}

#[tokio::test]
async fn stderr_is_merged_into_output() {
    let mut bridge = sh("printf 'oops\\n\\n' 1>&2");
    bridge.set_separators(SeparatorSet::from_chars("\n").unwrap());
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    bridge.flush_blocking(&mut sink).await.unwrap();
    assert_eq!(sink, vec![Tuple::new(0, "oops")]);

    bridge.finish(&mut sink).await.unwrap();
}

#[tokio::test]
async fn utf8_records_keep_character_offsets() {
    let mut bridge = sh("printf 'héllo\\nwörld\\n'");
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    bridge.finish(&mut sink).await.unwrap();
    assert_eq!(sink, vec![Tuple::new(0, "héllo"), Tuple::new(6, "wörld")]);
}

#[tokio::test]
async fn cancellation_is_swallowed() {
    let mut bridge = sh("cat");
    let token = bridge.cancellation_token();
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    token.cancel();

    let mut sink: Vec<Tuple> = Vec::new();
    assert_eq!(bridge.flush_blocking(&mut sink).await.unwrap(), 0);
    assert_eq!(bridge.finish(&mut sink).await.unwrap(), 0);
    assert_eq!(bridge.state(), BridgeState::Closed);
}

#[tokio::test]
async fn distributed_mode_runs_in_second_archive() {
    let deps = tempfile::tempdir().unwrap();
    let sources = tempfile::tempdir().unwrap();
    let env = StaticEnvironment::distributed([deps.path(), sources.path()]);

    let mut bridge = sh("pwd");
    bridge.prepare(&env).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    bridge.finish(&mut sink).await.unwrap();
    assert_eq!(sink.len(), 1);

    let reported = std::fs::canonicalize(&sink[0].text).unwrap();
    assert_eq!(reported, std::fs::canonicalize(sources.path()).unwrap());
}

#[tokio::test]
async fn local_mode_uses_command_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    let command = CommandSpec::new("pwd").working_dir(dir.path());
    let mut bridge = Bridge::with_command(command);
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    bridge.finish(&mut sink).await.unwrap();
    assert_eq!(sink.len(), 1);

    let reported = std::fs::canonicalize(&sink[0].text).unwrap();
    assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
}

#[tokio::test]
async fn write_to_exited_child_fails() {
    let mut bridge = sh("exit 0").stdin_buffer_size(16);
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    // Output EOF means the child has exited and closed its stdin too.
    let mut sink: Vec<Tuple> = Vec::new();
    let closed = bridge.flush_blocking(&mut sink).await.unwrap_err();
    assert!(matches!(closed, BridgeError::OutputClosed));

    let err = bridge
        .write("payload that will not be read")
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Write(_)));

    bridge.finish(&mut sink).await.unwrap();
}

#[tokio::test]
async fn interleaved_streams_keep_write_order() {
    let script = "echo a; echo b >&2; echo c; echo d >&2; echo e";
    let expected = vec![
        Tuple::new(0, "a"),
        Tuple::new(2, "b"),
        Tuple::new(4, "c"),
        Tuple::new(6, "d"),
        Tuple::new(8, "e"),
    ];

    for _ in 0..20 {
        let mut bridge = sh(script);
        bridge.prepare(&StaticEnvironment::local()).unwrap();

        let mut sink: Vec<Tuple> = Vec::new();
        bridge.finish(&mut sink).await.unwrap();
        assert_eq!(sink, expected);
    }
}

#[tokio::test]
async fn stderr_after_stdout_closed_is_kept() {
    let mut bridge = sh("echo out; echo err >&2; exec 1>&-; echo late >&2");
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    bridge.finish(&mut sink).await.unwrap();
    let texts: Vec<&str> = sink.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, ["out", "err", "late"]);
}
