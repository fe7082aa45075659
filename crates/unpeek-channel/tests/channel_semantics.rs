//! End-to-end delivery semantics of `EventChannel` on an inline dispatcher.

use unpeek_channel::{ChannelError, EmissionKind, SubscriberKey, SubscriptionKind};
use unpeek_test::{
    Recorded, Recorder, TestScope, inline_channel, inline_non_sticky_channel,
    setup_test_logging_default,
};

#[test]
fn test_screen_receives_each_result_once() {
    setup_test_logging_default();
    let channel = inline_channel::<String>();
    let list = TestScope::new("list-screen");
    let detail = TestScope::new("detail-screen");
    let list_events = Recorder::new();
    let detail_events = Recorder::new();

    channel.subscribe(&list, None, list_events.callback()).unwrap();
    channel.publish("saved".to_owned()).unwrap();

    channel
        .subscribe(&detail, None, detail_events.callback())
        .unwrap();
    assert_eq!(list_events.values(), vec!["saved"]);
    assert_eq!(detail_events.values(), vec!["saved"]);

    // Rebinding the list screen under the same key does not replay.
    let list_again = Recorder::new();
    channel.subscribe(&list, None, list_again.callback()).unwrap();
    assert!(list_again.is_empty());
}

#[test]
fn test_ended_scope_starts_fresh() {
    let channel = inline_channel::<u32>();
    let screen = TestScope::new("profile");
    let first = Recorder::new();
    channel.subscribe(&screen, None, first.callback()).unwrap();
    channel.publish(1).unwrap();
    assert_eq!(screen.hooks_registered(), 1);

    assert_eq!(screen.end(), 1);
    assert_eq!(channel.subscriber_count(), 0);
    assert!(channel.snapshot().key(&SubscriberKey::new("profile")).is_none());

    // A recreated screen under the same key is a new consumer.
    let recreated = TestScope::new("profile");
    let second = Recorder::new();
    channel.subscribe(&recreated, None, second.callback()).unwrap();
    assert_eq!(first.values(), vec![1]);
    assert_eq!(second.values(), vec![1]);
}

#[test]
fn test_signal_then_value_in_order() {
    let channel = inline_channel::<u32>();
    let events = Recorder::new();
    channel
        .subscribe_forever(Some(SubscriberKey::new("worker")), events.callback())
        .unwrap();

    assert_eq!(channel.signal().unwrap(), 1);
    assert_eq!(channel.publish(5).unwrap(), 1);
    assert_eq!(events.events(), vec![Recorded::Signal, Recorded::Value(5)]);
    assert_eq!(channel.signals_issued(), 1);
    assert_eq!(channel.last_emission(), Some(EmissionKind::Value));
}

#[test]
fn test_late_keys_each_replay_the_signal() {
    let channel = inline_channel::<u32>();
    channel.publish(3).unwrap();
    channel.signal().unwrap();
    assert_eq!(channel.current_value(), None);

    for name in ["first", "second"] {
        let scope = TestScope::new(name);
        let events = Recorder::new();
        channel.subscribe(&scope, None, events.callback()).unwrap();
        assert_eq!(events.events(), vec![Recorded::Signal], "key {name}");
    }
}

#[test]
fn test_non_sticky_only_sees_later_emissions() {
    let channel = inline_non_sticky_channel::<u32>();
    channel.publish(1).unwrap();
    channel.signal().unwrap();

    let scope = TestScope::new("late");
    let events = Recorder::new();
    channel.subscribe(&scope, None, events.callback()).unwrap();
    assert!(events.is_empty());

    channel.publish(2).unwrap();
    assert_eq!(events.values(), vec![2]);
}

#[test]
fn test_values_subscriber_and_signals() {
    let channel = inline_channel::<u32>();
    channel.signal().unwrap();

    let scope = TestScope::new("payload-only");
    let values = Recorder::new();
    let err = channel
        .subscribe_values(&scope, None, values.value_callback())
        .unwrap_err();
    assert!(matches!(err, ChannelError::ProtocolViolation { .. }));
    assert_eq!(channel.subscriber_count(), 0);
    assert_eq!(scope.hooks_registered(), 0);

    // Once a value supersedes the signal the same key may subscribe.
    channel.publish(8).unwrap();
    channel
        .subscribe_values(&scope, None, values.value_callback())
        .unwrap();
    assert_eq!(values.values(), vec![8]);
}

#[test]
fn test_snapshot_serializes_for_diagnostics() {
    let channel = inline_channel::<u32>();
    let scope = TestScope::new("dashboard");
    let events = Recorder::new();
    channel.subscribe(&scope, None, events.callback()).unwrap();
    channel.reserve(SubscriberKey::new("settings")).unwrap();
    channel.publish(4).unwrap();

    let snapshot = channel.snapshot();
    let dashboard = snapshot.key(&SubscriberKey::new("dashboard")).unwrap();
    assert_eq!(dashboard.registrations, vec![SubscriptionKind::Scoped]);
    assert_eq!(dashboard.pending, None);
    let settings = snapshot.key(&SubscriberKey::new("settings")).unwrap();
    assert_eq!(settings.pending, Some(EmissionKind::Value));
    assert!(!settings.observed);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["sticky"], true);
    assert_eq!(json["last_emission"], "value");
    assert_eq!(json["keys"][0]["key"], "dashboard");
    assert_eq!(json["keys"][0]["registrations"][0], "scoped");
}

#[test]
fn test_forever_and_scoped_share_a_key() {
    let channel = inline_channel::<u32>();
    let key = SubscriberKey::new("shared");
    let scope = TestScope::new("shared");
    let scoped = Recorder::new();
    let forever = Recorder::new();

    channel.subscribe(&scope, None, scoped.callback()).unwrap();
    channel
        .subscribe_forever(Some(key.clone()), forever.callback())
        .unwrap();
    channel.publish(1).unwrap();
    assert_eq!(scoped.len() + forever.len(), 1);

    scope.end();
    assert_eq!(channel.subscriber_count(), 1);
    channel.publish(2).unwrap();
    assert_eq!(forever.values().last(), Some(&2));

    assert!(channel.unsubscribe(&key).unwrap());
    assert!(!channel.unsubscribe(&key).unwrap());
}
