use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::warn;

use crate::model::*;

use super::error::StoreError;
use super::store::ReservationStore;

/// Resolves the effective per-date capacity configuration, falling back to
/// defaults when nothing is stored. Only store failures are errors; absent
/// or malformed payloads resolve to the default.
pub struct CapacityConfigResolver<'a> {
    store: &'a dyn ReservationStore,
}

impl<'a> CapacityConfigResolver<'a> {
    pub fn new(store: &'a dyn ReservationStore) -> Self {
        Self { store }
    }

    /// Stored limit if positive, else the ceiling's default.
    pub async fn daily_limit(&self, date: NaiveDate, ceiling: Ceiling) -> Result<i64, StoreError> {
        let stored = self.store.daily_limit(date, ceiling).await?;
        Ok(stored
            .filter(|limit| *limit > 0)
            .unwrap_or_else(|| ceiling.default_limit()))
    }

    /// Stored hour set (sorted, deduplicated) or the path's default.
    pub async fn hour_set(&self, date: NaiveDate, path: HourSetPath) -> Result<Vec<SlotTime>, StoreError> {
        let payload = self.store.hour_set_payload(date).await?;
        let stored = payload.as_deref().and_then(|raw| parse_hour_set(date, raw));
        let mut hours = stored.unwrap_or_else(|| path.default_hours());
        hours.sort();
        hours.dedup();
        Ok(hours)
    }

    /// Persisted hour configuration, or `None` if absent or unparseable.
    pub async fn hour_configuration(&self, date: NaiveDate) -> Result<Option<HourConfiguration>, StoreError> {
        let payload = self.store.hour_configuration_payload(date).await?;
        Ok(payload.as_deref().and_then(|raw| parse_configuration(date, raw)))
    }

    /// Persisted configuration percentages, then a standalone allocation,
    /// then an equal split over `hours`.
    pub async fn hour_allocation(
        &self,
        date: NaiveDate,
        hours: &[SlotTime],
    ) -> Result<HourAllocation, StoreError> {
        if let Some(config) = self.hour_configuration(date).await? {
            return Ok(config
                .into_iter()
                .map(|(slot, setting)| (slot, setting.percentage()))
                .collect());
        }
        let payload = self.store.hour_allocation_payload(date).await?;
        if let Some(allocation) = payload.as_deref().and_then(|raw| parse_allocation(date, raw)) {
            return Ok(allocation);
        }
        Ok(equal_split(hours))
    }
}

/// 100 ÷ |hours| per slot.
pub fn equal_split(hours: &[SlotTime]) -> HourAllocation {
    if hours.is_empty() {
        return HourAllocation::new();
    }
    let share = 100.0 / hours.len() as f64;
    hours.iter().map(|h| (*h, share)).collect()
}

fn parse_hour_set(date: NaiveDate, raw: &str) -> Option<Vec<SlotTime>> {
    let entries: Vec<String> = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(%date, error = %e, "malformed hour set payload, using default");
            return None;
        }
    };
    let hours: Vec<SlotTime> = entries
        .iter()
        .filter_map(|h| SlotTime::parse(h).ok())
        .collect();
    (!hours.is_empty()).then_some(hours)
}

fn parse_allocation(date: NaiveDate, raw: &str) -> Option<HourAllocation> {
    match serde_json::from_str::<HourAllocation>(raw) {
        Ok(a) if !a.is_empty() => Some(a),
        Ok(_) => None,
        Err(e) => {
            warn!(%date, error = %e, "malformed hour allocation payload, using equal split");
            None
        }
    }
}

fn parse_configuration(date: NaiveDate, raw: &str) -> Option<HourConfiguration> {
    match serde_json::from_str::<BTreeMap<SlotTime, StoredSlot>>(raw) {
        Ok(c) if !c.is_empty() => Some(c.into_iter().map(|(k, v)| (k, v.into())).collect()),
        Ok(_) => None,
        Err(e) => {
            warn!(%date, error = %e, "malformed hour configuration payload, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::testing::*;
    use crate::engine::store::InMemoryStore;

    fn save(store: &InMemoryStore, event: Event) {
        store.apply_event(&event);
    }

    #[tokio::test]
    async fn daily_limit_defaults_per_ceiling() {
        let store = InMemoryStore::new();
        let r = CapacityConfigResolver::new(&store);
        let d = date(2026, 10, 24);
        assert_eq!(r.daily_limit(d, Ceiling::Booking).await.unwrap(), 45);
        assert_eq!(r.daily_limit(d, Ceiling::Modification).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn non_positive_limit_falls_back_to_default() {
        let store = InMemoryStore::new();
        let d = date(2026, 10, 24);
        save(&store, Event::DailyLimitSet { date: d, ceiling: Ceiling::Booking, limit: 0 });
        save(&store, Event::DailyLimitSet { date: d, ceiling: Ceiling::Modification, limit: 60 });
        let r = CapacityConfigResolver::new(&store);
        assert_eq!(r.daily_limit(d, Ceiling::Booking).await.unwrap(), 45);
        assert_eq!(r.daily_limit(d, Ceiling::Modification).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn hour_set_is_sorted_and_falls_back_by_path() {
        let store = InMemoryStore::new();
        let d = date(2026, 10, 24);
        let r = CapacityConfigResolver::new(&store);
        assert_eq!(r.hour_set(d, HourSetPath::SlotConfiguration).await.unwrap().len(), 4);
        assert_eq!(r.hour_set(d, HourSetPath::Percentages).await.unwrap().len(), 5);

        save(&store, Event::HourSetSaved { date: d, payload: r#"["20:00","13:30","20:00"]"#.into() });
        let hours = r.hour_set(d, HourSetPath::Percentages).await.unwrap();
        assert_eq!(hours, vec![slot("13:30"), slot("20:00")]);
    }

    #[tokio::test]
    async fn empty_or_malformed_hour_set_uses_default() {
        let store = InMemoryStore::new();
        let d = date(2026, 10, 24);
        let r = CapacityConfigResolver::new(&store);
        save(&store, Event::HourSetSaved { date: d, payload: "[]".into() });
        assert_eq!(r.hour_set(d, HourSetPath::SlotConfiguration).await.unwrap().len(), 4);
        save(&store, Event::HourSetSaved { date: d, payload: "{not json".into() });
        assert_eq!(r.hour_set(d, HourSetPath::SlotConfiguration).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn allocation_precedence() {
        let store = InMemoryStore::new();
        let d = date(2026, 10, 24);
        let hours = vec![slot("13:30"), slot("14:00")];
        let r = CapacityConfigResolver::new(&store);

        let alloc = r.hour_allocation(d, &hours).await.unwrap();
        assert_eq!(alloc.get(&slot("13:30")), Some(&50.0));

        save(&store, Event::HourAllocationSaved {
            date: d,
            payload: r#"{"13:30":70,"14:00":30}"#.into(),
        });
        let alloc = r.hour_allocation(d, &hours).await.unwrap();
        assert_eq!(alloc.get(&slot("13:30")), Some(&70.0));

        save(&store, Event::HourConfigurationSaved {
            date: d,
            payload: r#"{"13:30":{"percentage":10},"14:00":{"percentage":90,"isClosed":true}}"#.into(),
        });
        let alloc = r.hour_allocation(d, &hours).await.unwrap();
        assert_eq!(alloc.get(&slot("13:30")), Some(&10.0));
        assert_eq!(alloc.get(&slot("14:00")), Some(&0.0));
    }

    #[tokio::test]
    async fn malformed_configuration_is_treated_as_absent() {
        let store = InMemoryStore::new();
        let d = date(2026, 10, 24);
        save(&store, Event::HourConfigurationSaved { date: d, payload: "garbage".into() });
        save(&store, Event::HourAllocationSaved { date: d, payload: "also garbage".into() });
        let r = CapacityConfigResolver::new(&store);
        assert!(r.hour_configuration(d).await.unwrap().is_none());
        let hours = vec![slot("13:30"), slot("14:00"), slot("14:30"), slot("15:00")];
        let alloc = r.hour_allocation(d, &hours).await.unwrap();
        assert!(alloc.values().all(|p| (*p - 25.0).abs() < f64::EPSILON));
    }

    #[tokio::test]
    async fn store_failures_surface() {
        let r = CapacityConfigResolver::new(&UnreachableStore);
        let d = date(2026, 10, 24);
        let err = r.daily_limit(d, Ceiling::Modification).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Read { table: "modification_limits", detail: "connection refused".into() }
        );
        assert!(r.hour_set(d, HourSetPath::Percentages).await.is_err());
    }

    #[test]
    fn equal_split_of_nothing_is_empty() {
        assert!(equal_split(&[]).is_empty());
    }
}
