//! 短期记忆不变量：大量追加后仍在预算内，计数器守恒，compact 幂等

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use hive::core::ManualClock;
    use hive::memory::{MemoryConfig, MemoryEntry, MemoryRole, MemoryStore, Summarizer, TruncatingSummarizer};

    struct FailingSummarizer;

    impl Summarizer for FailingSummarizer {
        fn summarize(&self, _previous: &str, _batch: &[MemoryEntry]) -> Result<String, String> {
            Err("summarizer offline".to_string())
        }
    }

    fn config() -> MemoryConfig {
        MemoryConfig {
            max_entries: 8,
            max_tokens: 120,
            compact_batch: 3,
            recent_entries: 4,
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()))
    }

    fn message(i: usize) -> String {
        // 长度不一
        let words = (i * 7) % 23 + 1;
        (0..words).map(|w| format!("word{i}_{w}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_bounds_hold_after_every_append() {
        let cfg = config();
        let clock = clock();
        let mut store = MemoryStore::new(cfg.clone(), Arc::new(TruncatingSummarizer::new(400)), clock.clone());
        let mut last_summarized = 0;

        for i in 0..300 {
            let role = if i % 2 == 0 { MemoryRole::User } else { MemoryRole::Agent };
            let content = message(i);
            store.record(role, content.clone(), None);
            clock.advance(Duration::seconds(1));

            assert!(store.len() <= cfg.max_entries, "entries over budget at {i}");
            let counters = store.counters();
            assert!(counters.retained_tokens <= cfg.max_tokens, "tokens over budget at {i}");
            assert!(counters.summarized_entries >= last_summarized);
            last_summarized = counters.summarized_entries;
            assert_eq!(
                counters.total_appended,
                counters.summarized_entries + counters.dropped_entries + store.len() as u64
            );

            let newest = store.entries().last().unwrap();
            assert_eq!(newest.role, role);
            assert_eq!(newest.content, content);
        }
        assert_eq!(store.counters().total_appended, 300);
        assert_eq!(store.counters().dropped_entries, 0);
        assert!(!store.summary().is_empty());
        assert!(store.summary().chars().count() <= 400);
    }

    #[test]
    fn test_entries_stay_in_time_order() {
        let clock = clock();
        let mut store = MemoryStore::new(config(), Arc::new(TruncatingSummarizer::new(200)), clock.clone());
        for i in 0..50 {
            store.record(MemoryRole::User, format!("m{i}"), None);
            clock.advance(Duration::seconds(5));
        }
        let timestamps: Vec<_> = store.entries().iter().map(|e| e.timestamp).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);
        assert_eq!(store.entries().last().unwrap().content, "m49");
    }

    #[test]
    fn test_compact_is_idempotent() {
        let mut store = MemoryStore::new(config(), Arc::new(TruncatingSummarizer::new(300)), clock());
        for i in 0..8 {
            store.record(MemoryRole::User, format!("entry {i}"), None);
        }
        let full = store.snapshot();
        store.compact();
        store.compact();
        assert_eq!(store.snapshot(), full);
        assert_eq!(store.len(), config().max_entries);

        store.record(MemoryRole::User, "entry 8".to_string(), None);
        let after_fold = store.snapshot();
        store.compact();
        assert_eq!(store.snapshot(), after_fold);
        assert!(store.len() <= config().max_entries);
    }

    #[test]
    fn test_failing_summarizer_degrades_to_truncation() {
        let cfg = config();
        let mut store = MemoryStore::new(cfg.clone(), Arc::new(FailingSummarizer), clock());
        for i in 0..40 {
            store.record(MemoryRole::Tool, format!("tool output {i}"), None);
            assert!(store.len() <= cfg.max_entries);
        }
        let counters = store.counters();
        assert!(counters.dropped_entries > 0);
        assert_eq!(counters.summarized_entries, 0);
        assert!(store.summary().is_empty());
        assert_eq!(counters.total_appended, counters.dropped_entries + store.len() as u64);
        assert_eq!(store.entries().last().unwrap().content, "tool output 39");
    }

    #[test]
    fn test_restore_from_larger_snapshot_compacts() {
        let big = MemoryConfig {
            max_entries: 50,
            ..config()
        };
        let mut store = MemoryStore::new(big, Arc::new(TruncatingSummarizer::new(300)), clock());
        for i in 0..20 {
            store.record(MemoryRole::User, format!("e{i}"), None);
        }
        let snapshot = store.snapshot();

        let restored = MemoryStore::from_snapshot(snapshot, config(), Arc::new(TruncatingSummarizer::new(300)), clock());
        assert!(restored.len() <= config().max_entries);
        assert_eq!(restored.entries().last().unwrap().content, "e19");
        assert!(restored.summary().contains("e0"));
    }

    #[test]
    fn test_restore_at_exact_entry_budget_keeps_state() {
        let clock = clock();
        let mut store = MemoryStore::new(config(), Arc::new(TruncatingSummarizer::new(300)), clock.clone());
        for i in 0..config().max_entries {
            store.record(MemoryRole::User, format!("e{i}"), None);
            clock.advance(Duration::seconds(1));
        }
        let snapshot = store.snapshot();
        assert_eq!(snapshot.entries.len(), config().max_entries);

        let restored = MemoryStore::from_snapshot(snapshot.clone(), config(), Arc::new(TruncatingSummarizer::new(300)), clock);
        assert_eq!(restored.snapshot(), snapshot);
    }
}
