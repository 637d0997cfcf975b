// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::missing_panics_doc)] // Benchmarks panic on failure
#![allow(clippy::semicolon_if_nothing_returned)] // Benchmark code formatting

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use urt::pubsub::{
    HrtConstraints, HrtSubscriber, Message, NrtSubscriber, PublishPolicy, Publisher, Subscriber, Topic,
};
use urt::{Core, ThreadEvents, Time};

const SUBSCRIBER_MASK: urt::EventMask = 1 << 1;

fn topic(core: &Arc<Core>, id: u16, slots: usize, payload: usize) -> Arc<Topic> {
    let topic = Topic::new(core, id, payload).unwrap();
    topic.add_messages((0..slots).map(|_| Message::new(payload)));
    topic
}

// ============================================================================
// Publish
// ============================================================================

/// Benchmark: publish without subscribers (slot rotation only)
fn bench_publish_no_subscribers(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_no_subscribers");
    for size in [16usize, 256, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let core = Core::new(None);
            let topic = topic(&core, 1, 8, size);
            let mut publisher = Publisher::new(&topic);
            let payload = vec![0xA5u8; size];
            b.iter(|| {
                publisher
                    .publish(black_box(&payload), Time::now(), PublishPolicy::Lazy)
                    .unwrap();
            })
        });
    }
    group.finish();
}

// ============================================================================
// Publish + fetch
// ============================================================================

/// Benchmark: NRT publish followed by fetch_next
fn bench_nrt_roundtrip(c: &mut Criterion) {
    c.bench_function("nrt_publish_fetch_next_64b", |b| {
        let core = Core::new(None);
        let topic = topic(&core, 2, 8, 64);
        let mut subscriber = NrtSubscriber::new();
        subscriber.subscribe(&topic, SUBSCRIBER_MASK).unwrap();
        let mut publisher = Publisher::new(&topic);
        let payload = [0x5Au8; 64];
        let mut buf = [0u8; 64];
        b.iter(|| {
            publisher.publish(&payload, Time::now(), PublishPolicy::Lazy).unwrap();
            black_box(subscriber.fetch_next(&mut buf).unwrap());
        });
        ThreadEvents::current().clear(SUBSCRIBER_MASK);
    });
}

/// Benchmark: HRT publish followed by fetch_next (release of the slot)
fn bench_hrt_roundtrip(c: &mut Criterion) {
    c.bench_function("hrt_publish_fetch_next_64b", |b| {
        let core = Core::new(None);
        let topic = topic(&core, 3, 4, 64);
        let mut subscriber = HrtSubscriber::new();
        subscriber
            .subscribe(&topic, SUBSCRIBER_MASK, HrtConstraints::default())
            .unwrap();
        let mut publisher = Publisher::new(&topic);
        let payload = [0x5Au8; 64];
        let mut buf = [0u8; 64];
        b.iter(|| {
            publisher.publish(&payload, Time::now(), PublishPolicy::Lazy).unwrap();
            black_box(subscriber.fetch_next(&mut buf).unwrap());
        });
        ThreadEvents::current().clear(SUBSCRIBER_MASK);
    });
}

/// Benchmark: fan-out to many NRT subscribers, each fetching the latest message
fn bench_fetch_latest_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch_latest_fanout");
    for count in [1usize, 8, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let core = Core::new(None);
            let topic = topic(&core, 4, 8, 64);
            let mut subscribers: Vec<NrtSubscriber> = (0..count)
                .map(|_| {
                    let mut s = NrtSubscriber::new();
                    s.subscribe(&topic, SUBSCRIBER_MASK).unwrap();
                    s
                })
                .collect();
            let mut publisher = Publisher::new(&topic);
            let payload = [1u8; 64];
            let mut buf = [0u8; 64];
            b.iter(|| {
                publisher.publish(&payload, Time::now(), PublishPolicy::Lazy).unwrap();
                for s in subscribers.iter_mut() {
                    black_box(s.fetch_latest(&mut buf).unwrap());
                }
            });
            ThreadEvents::current().clear(SUBSCRIBER_MASK);
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_publish_no_subscribers,
    bench_nrt_roundtrip,
    bench_hrt_roundtrip,
    bench_fetch_latest_fanout
);
criterion_main!(benches);
