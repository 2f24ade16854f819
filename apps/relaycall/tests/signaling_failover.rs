mod support;

use std::sync::Arc;
use std::time::Duration;

use relaycall::signaling::{
    CandidateServers, ChannelEvent, ChannelInput, ChannelState, RetryPolicy, SignalingChannel,
    WsConnector,
};
use relaycall::timer::TokioScheduler;
use support::{Relay, spawn_silent_server};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

fn channel(servers: &[String], policy: RetryPolicy) -> (SignalingChannel, UnboundedReceiver<ChannelInput>) {
    SignalingChannel::new(
        CandidateServers::parse(servers).expect("valid servers"),
        "failover".parse().expect("valid room"),
        policy,
        16,
        Arc::new(WsConnector::new()),
        Arc::new(TokioScheduler::new()),
    )
}

/// Feed inputs into the channel until an event matching `done` comes out.
async fn pump_until(
    channel: &mut SignalingChannel,
    inputs: &mut UnboundedReceiver<ChannelInput>,
    seen: &mut Vec<ChannelEvent>,
    done: impl Fn(&ChannelEvent) -> bool,
) {
    loop {
        let finished = seen.iter().any(&done);
        if finished {
            return;
        }
        let input = inputs.recv().await.expect("channel inputs closed");
        channel.handle(input);
        seen.extend(channel.drain_events());
    }
}

async fn refused_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("ws://{addr}/")
}

#[test_timeout::tokio_timeout_test(20)]
async fn silent_primary_times_out_and_queue_flushes_on_secondary() {
    let relay = Relay::spawn().await;
    let silent = spawn_silent_server().await;
    let policy = RetryPolicy::default()
        .with_attempt_timeout(Duration::from_millis(300))
        .with_retry_delay(Duration::from_millis(20));
    let (mut channel, mut inputs) = channel(&[silent.clone(), relay.url()], policy);

    channel.send("first".into());
    channel.send("second".into());
    channel.connect();
    assert_eq!(channel.state(), ChannelState::Connecting);

    let mut seen = channel.drain_events();
    pump_until(&mut channel, &mut inputs, &mut seen, |event| {
        matches!(event, ChannelEvent::Opened { .. })
    })
    .await;

    match &seen[0] {
        ChannelEvent::AttemptFailed { server, reason } => {
            assert!(server.as_str().starts_with(&silent));
            assert_eq!(reason, "open timed out");
        }
        other => panic!("unexpected first event {other:?}"),
    }
    let Some(ChannelEvent::Opened { server }) = seen.last() else {
        panic!("channel did not open");
    };
    assert!(server.as_str().starts_with(&relay.url()));
    assert_eq!(channel.state(), ChannelState::Open);
    assert_eq!(channel.attempt_index(), 0);

    relay.wait_for_received(2).await;
    channel.send("third".into());
    relay.wait_for_received(3).await;
    assert_eq!(relay.received(), vec!["first", "second", "third"]);
    assert_eq!(relay.rooms(), vec!["failover"]);
    assert_eq!(channel.queue_stats().queued, 0);

    channel.shutdown();
    relay.wait_for_clients(0).await;
}

#[test_timeout::tokio_timeout_test(20)]
async fn unreachable_servers_exhaust_the_retry_ceiling() {
    let first = refused_server().await;
    let second = refused_server().await;
    let policy = RetryPolicy::default()
        .with_attempt_timeout(Duration::from_secs(5))
        .with_retry_delay(Duration::from_millis(10))
        .with_max_reconnect_attempts(1);
    let (mut channel, mut inputs) = channel(&[first.clone(), second.clone()], policy);
    channel.send("never delivered".into());
    channel.connect();

    let mut seen = channel.drain_events();
    pump_until(&mut channel, &mut inputs, &mut seen, |event| {
        matches!(event, ChannelEvent::Unavailable { .. })
    })
    .await;

    let failed: Vec<String> = seen
        .iter()
        .filter_map(|event| match event {
            ChannelEvent::AttemptFailed { server, .. } => Some(server.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 4);
    assert!(failed[0].starts_with(&first));
    assert!(failed[1].starts_with(&second));
    assert!(failed[2].starts_with(&first));
    assert!(failed[3].starts_with(&second));
    assert_eq!(
        seen.last(),
        Some(&ChannelEvent::Unavailable {
            reconnect_attempts: 2
        })
    );
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(channel.queue_stats().queued, 1);
}
