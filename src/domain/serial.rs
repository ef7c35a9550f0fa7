use crate::db::CounterStore;
use crate::time_utils::{Clock, SiteTimezone};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

pub fn format_serial(year: i32, index: i64) -> String {
    format!("{year}-{index:03}")
}

/// Issues `{year}-{index}` report identifiers from a persisted counter.
///
/// Calls on one allocator are serialised, so a single process never
/// reuses an index. Nothing coordinates separate processes pointed at
/// the same counter: each does its own read-increment-write and two of
/// them can issue the same identifier. Deployments with more than one
/// writer need a single authoritative sequence instead.
#[derive(Clone)]
pub struct SerialAllocator {
    counter: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    tz: SiteTimezone,
    guard: Arc<Mutex<()>>,
}

impl SerialAllocator {
    pub fn new(counter: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, tz: SiteTimezone) -> Self {
        Self {
            counter,
            clock,
            tz,
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub async fn next(&self) -> Result<String> {
        let _held = self.guard.lock().await;
        let last = self.counter.load().await?;
        let index = last + 1;
        self.counter.store(index).await?;
        let serial = format_serial(self.tz.year(self.clock.now()), index);
        tracing::debug!("Allocated serial {}", serial);
        Ok(serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryCounterStore;
    use crate::time_utils::{parse_timezone, ManualClock};
    use chrono::{TimeZone, Utc};

    fn allocator(counter: Arc<MemoryCounterStore>) -> SerialAllocator {
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap());
        SerialAllocator::new(counter, Arc::new(clock), parse_timezone("UTC").unwrap())
    }

    #[test]
    fn pads_to_at_least_three_digits() {
        assert_eq!(format_serial(2026, 7), "2026-007");
        assert_eq!(format_serial(2026, 1234), "2026-1234");
    }

    #[tokio::test]
    async fn two_submissions_get_consecutive_ids() {
        let alloc = allocator(Arc::new(MemoryCounterStore::default()));
        assert_eq!(alloc.next().await.unwrap(), "2026-001");
        assert_eq!(alloc.next().await.unwrap(), "2026-002");
    }

    #[tokio::test]
    async fn seventh_call_is_007() {
        let alloc = allocator(Arc::new(MemoryCounterStore::default()));
        let mut last = String::new();
        for _ in 0..7 {
            last = alloc.next().await.unwrap();
        }
        assert_eq!(last, "2026-007");
    }

    #[tokio::test]
    async fn concurrent_callers_on_one_allocator_never_repeat() {
        let alloc = allocator(Arc::new(MemoryCounterStore::default()));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let alloc = alloc.clone();
            handles.push(tokio::spawn(async move { alloc.next().await.unwrap() }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }

    #[tokio::test]
    async fn separate_allocators_on_one_counter_can_collide() {
        // Two processes interleaving read-increment-write on one counter.
        let counter = Arc::new(MemoryCounterStore::default());
        let seen_by_first = counter.load().await.unwrap();
        let seen_by_second = counter.load().await.unwrap();
        counter.store(seen_by_first + 1).await.unwrap();
        counter.store(seen_by_second + 1).await.unwrap();

        assert_eq!(format_serial(2026, seen_by_first + 1), format_serial(2026, seen_by_second + 1));
        assert_eq!(counter.load().await.unwrap(), 1);

        // An allocator attached afterwards simply continues from the stored value.
        assert_eq!(allocator(counter).next().await.unwrap(), "2026-002");
    }

    #[tokio::test]
    async fn resumes_from_persisted_value() {
        let alloc = allocator(Arc::new(MemoryCounterStore::starting_at(41)));
        assert_eq!(alloc.next().await.unwrap(), "2026-042");
    }
}
