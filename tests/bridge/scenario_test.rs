//! End-to-end scenarios with shell children.

#![cfg(unix)]

use std::time::Duration;

use streambridge::bridge::{
    Bridge, BridgeError, CommandSpec, SeparatorSet, Tuple, HANDOFF_QUEUE_CAPACITY,
};
use streambridge::environment::StaticEnvironment;

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh").args(["-c", script])
}

fn newline_bridge(script: &str) -> Bridge {
    let mut bridge = Bridge::new().flush_timeout(Duration::from_secs(10));
    bridge
        .configure(sh(script), Some(SeparatorSet::from_chars("\n").unwrap()))
        .unwrap();
    bridge
}

#[tokio::test]
async fn cat_tuples_surface_at_finish() {
    let mut bridge = newline_bridge("cat");
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    bridge.write("a").await.unwrap();
    bridge.write("b").await.unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    let delivered = bridge.finish(&mut sink).await.unwrap();

    assert_eq!(delivered, 2);
    assert_eq!(sink, vec![Tuple::new(0, "a"), Tuple::new(2, "b")]);
}

#[tokio::test]
async fn empty_record_splits_batches() {
    let mut bridge = newline_bridge(r"printf 'foo\nbar\n\nbaz\n'");
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut first: Vec<Tuple> = Vec::new();
    bridge.flush_blocking(&mut first).await.unwrap();
    assert_eq!(first, vec![Tuple::new(0, "foo"), Tuple::new(4, "bar")]);

    let mut second: Vec<Tuple> = Vec::new();
    bridge.flush_blocking(&mut second).await.unwrap();
    assert_eq!(second, vec![Tuple::new(9, "baz")]);

    let mut rest: Vec<Tuple> = Vec::new();
    assert_eq!(bridge.finish(&mut rest).await.unwrap(), 0);
    assert!(rest.is_empty());
}

#[tokio::test]
async fn leading_empty_records_produce_no_batch() {
    let mut bridge = newline_bridge(r"printf '\n\n\nx\n'");
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    bridge.flush_blocking(&mut sink).await.unwrap();
    assert_eq!(sink, vec![Tuple::new(3, "x")]);

    bridge.finish(&mut sink).await.unwrap();
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn silent_child_times_out() {
    let mut bridge = newline_bridge("cat").flush_timeout(Duration::from_millis(200));
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    let err = bridge.flush_blocking(&mut sink).await.unwrap_err();
    assert!(matches!(err, BridgeError::Timeout(d) if d == Duration::from_millis(200)));
    assert!(err.to_string().contains("timed out waiting for subprocess"));

    bridge.finish(&mut sink).await.unwrap();
    assert!(sink.is_empty());
}

#[tokio::test]
async fn carriage_return_and_newline_both_separate() {
    let mut bridge = Bridge::new().flush_timeout(Duration::from_secs(10));
    bridge
        .configure(
            sh(r"printf 'a\rb\nc\r\n'"),
            Some(SeparatorSet::from_chars("\r\n").unwrap()),
        )
        .unwrap();
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    bridge.flush_blocking(&mut sink).await.unwrap();
    assert_eq!(
        sink,
        vec![Tuple::new(0, "a"), Tuple::new(2, "b"), Tuple::new(4, "c")]
    );

    bridge.finish(&mut sink).await.unwrap();
    assert_eq!(sink.len(), 3);
}

#[tokio::test]
async fn backpressure_holds_batches_without_loss() {
    let script = r"i=1; while [ $i -le 15 ]; do printf 'r%d\n\n' $i; i=$((i+1)); done";
    let mut bridge = newline_bridge(script);
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    // The reader parks on the eleventh batch once the queue is full.
    super::wait_until("a full handoff queue", || {
        bridge.queued_batches() == HANDOFF_QUEUE_CAPACITY
    })
    .await;

    let mut sink: Vec<Tuple> = Vec::new();
    let drained = bridge.flush_non_blocking(&mut sink).unwrap();
    assert_eq!(drained, HANDOFF_QUEUE_CAPACITY);
    assert_eq!(bridge.queued_batches(), 0);

    bridge.finish(&mut sink).await.unwrap();
    let texts: Vec<String> = sink.iter().map(|t| t.text.clone()).collect();
    let expected: Vec<String> = (1..=15).map(|i| format!("r{i}")).collect();
    assert_eq!(texts, expected);
}

#[tokio::test]
async fn echo_round_trip_one_batch_per_line() {
    let mut bridge = newline_bridge(r#"while IFS= read -r line; do printf '%s\n\n' "$line"; done"#);
    bridge.prepare(&StaticEnvironment::local()).unwrap();

    let mut sink: Vec<Tuple> = Vec::new();
    for word in ["hello", "world", "again"] {
        bridge.write(word).await.unwrap();
        let mut batch: Vec<Tuple> = Vec::new();
        assert_eq!(bridge.flush_blocking(&mut batch).await.unwrap(), 1);
        assert_eq!(batch[0].text, word);
        sink.extend(batch);
    }

    let indices: Vec<u64> = sink.iter().map(|t| t.index).collect();
    assert_eq!(indices, vec![0, 7, 14]);

    assert_eq!(bridge.finish(&mut sink).await.unwrap(), 0);
}
