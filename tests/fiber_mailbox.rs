mod common;

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::time::timeout;

use common::Harness;
use spindle::actions::Action;
use spindle::clock::Clock;
use spindle::database::TransactionContext;
use spindle::errors::FlowError;
use spindle::events::FlowEvent;
use spindle::fiber::fiber_channel;
use spindle::types::FlowId;

#[tokio::test]
async fn events_are_delivered_in_fifo_order() {
    let (fiber, mut events) = fiber_channel(FlowId::random());

    for i in 0..5 {
        fiber.schedule_event(FlowEvent::Error(FlowError::msg(format!("e{i}"))));
    }
    for i in 0..5 {
        match events.recv().await {
            Some(FlowEvent::Error(err)) => assert_eq!(err.message, format!("e{i}")),
            other => panic!("expected error event, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn armed_sleep_delivers_exactly_one_wakeup() {
    let (fiber, mut events) = fiber_channel(FlowId::random());

    fiber.arm_sleep(Duration::from_millis(20));
    assert!(fiber.is_sleeping());

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("wakeup not delivered")
        .unwrap();
    assert_eq!(event, FlowEvent::Wakeup);
    assert!(!fiber.is_sleeping());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn interrupt_sleep_wakes_early_without_a_second_wakeup() {
    let (fiber, mut events) = fiber_channel(FlowId::random());

    fiber.arm_sleep(Duration::from_secs(60));
    fiber.interrupt_sleep();

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("wakeup not delivered")
        .unwrap();
    assert_eq!(event, FlowEvent::Wakeup);

    // The aborted timer must not deliver again.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_none());
    // Interrupting again is a no-op.
    fiber.interrupt_sleep();
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn rearming_replaces_the_previous_sleep() {
    let (fiber, mut events) = fiber_channel(FlowId::random());

    fiber.arm_sleep(Duration::from_secs(60));
    fiber.arm_sleep(Duration::from_millis(20));

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("wakeup not delivered")
        .unwrap();
    assert_eq!(event, FlowEvent::Wakeup);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn scheduling_into_a_dropped_mailbox_does_not_panic() {
    let (fiber, events) = fiber_channel(FlowId::random());
    drop(events);
    fiber.schedule_event(FlowEvent::Wakeup);
}

#[tokio::test]
async fn sleep_until_clamps_past_deadlines_to_immediate_wakeup() {
    let h = Harness::new();
    let (fiber, mut events) = fiber_channel(FlowId::random());
    let mut ctx = TransactionContext::new();

    // A deadline before "now" must not underflow; the fiber wakes at once.
    let past = h.clock.now() - ChronoDuration::seconds(30);
    h.executor
        .execute(&fiber, &mut ctx, Action::SleepUntil { time: past })
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("wakeup not delivered")
        .unwrap();
    assert_eq!(event, FlowEvent::Wakeup);
}

#[tokio::test]
async fn sleep_until_future_deadline_delivers_wakeup() {
    let h = Harness::new();
    let (fiber, mut events) = fiber_channel(FlowId::random());
    let mut ctx = TransactionContext::new();

    // ManualClock stands still, so the real delay is the full offset; keep
    // it tiny.
    let deadline = h.clock.now() + ChronoDuration::milliseconds(20);
    h.executor
        .execute(&fiber, &mut ctx, Action::SleepUntil { time: deadline })
        .await
        .unwrap();
    assert!(fiber.is_sleeping());

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("wakeup not delivered")
        .unwrap();
    assert_eq!(event, FlowEvent::Wakeup);
}
