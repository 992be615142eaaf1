use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use cue_lobby::config::HistoryConfig;
use cue_lobby::history::MatchHistory;
use cue_lobby::model::{MatchResult, RuleType};
use cue_lobby::presence::PresenceTracker;
use cue_lobby::protocol::{BusMessage, PresenceKind, PresenceMessage};
use cue_lobby::store::MemoryStore;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn heartbeat(user: usize, ts: u64) -> PresenceMessage {
    PresenceMessage {
        kind: PresenceKind::Heartbeat,
        user_id: format!("user-{user}"),
        user_name: format!("Player {user}"),
        locale: Some("en-GB".to_string()),
        origin_url: None,
        timestamp: Some(ts),
    }
}

/// 1,000 known users, half of them stale: prune + sort + cap.
fn bench_presence_online(c: &mut Criterion) {
    let mut seeded = PresenceTracker::new(Duration::from_secs(90), 50);
    for user in 0..1_000 {
        let ts = if user % 2 == 0 { 0 } else { 100_000 };
        seeded.apply(&heartbeat(user, ts), ts);
    }

    c.bench_function("presence_online_1000_users", |b| {
        b.iter_batched(
            || seeded.clone(),
            |mut tracker| black_box(tracker.online(black_box(120_000))),
            BatchSize::SmallInput,
        )
    });
}

fn bench_presence_apply_frame(c: &mut Criterion) {
    let frame = BusMessage::from(heartbeat(7, 1_000)).encode().unwrap();
    let mut tracker = PresenceTracker::new(Duration::from_secs(90), 50);

    c.bench_function("presence_apply_frame", |b| {
        b.iter(|| black_box(tracker.apply_frame(black_box(&frame), 1_000)))
    });
}

/// Steady state: history full, every insert evicts one entry.
fn bench_history_add_with_trim(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let history = MatchHistory::new(store, &HistoryConfig { limit: 50 });
    rt.block_on(async {
        for i in 0..50u64 {
            let result = MatchResult::new(format!("seed-{i}"), "Alice", 7, RuleType::NineBall, i);
            history.add_match_result(result, Some("replay")).await.unwrap();
        }
    });

    let mut next = 50u64;
    c.bench_function("history_add_with_trim", |b| {
        b.iter(|| {
            next += 1;
            let result = MatchResult::new(format!("m-{next}"), "Alice", 7, RuleType::NineBall, next)
                .with_loser("Bob", 4);
            rt.block_on(history.add_match_result(result, Some("replay"))).unwrap();
        })
    });
}

fn bench_history_read_filtered(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let history = MatchHistory::new(Arc::new(MemoryStore::new()), &HistoryConfig { limit: 50 });
    rt.block_on(async {
        for i in 0..50u64 {
            let rule = RuleType::ALL[i as usize % RuleType::ALL.len()];
            history
                .add_match_result(MatchResult::new(format!("m-{i}"), "Alice", 7, rule, i), None)
                .await
                .unwrap();
        }
    });

    c.bench_function("history_read_filtered", |b| {
        b.iter(|| {
            black_box(
                rt.block_on(history.get_match_results(10, Some(RuleType::Snooker)))
                    .unwrap(),
            )
        })
    });
}

criterion_group!(
    benches,
    bench_presence_online,
    bench_presence_apply_frame,
    bench_history_add_with_trim,
    bench_history_read_filtered,
);
criterion_main!(benches);
