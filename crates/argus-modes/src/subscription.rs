//! Subscriber bookkeeping and effective-frequency resolution.
//!
//! Many independent subscribers (behaviors, debug tools, the photo manager)
//! each hold a set of cadence requests. Mutation is always a full replace:
//! re-subscribing with a new set atomically supersedes the old one, and
//! releasing is just replacing with the empty set.

use crate::mode::{ModeTier, VisionMode, VisionModeSet};
use crate::settings::ModeCostTable;
use std::collections::HashMap;
use tracing::debug;

/// Opaque subscriber handle. Callers mint these however they like (component
/// IDs, behavior IDs); the registry only compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

/// One cadence request held by a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrequencyRequest {
    pub mode: VisionMode,
    pub tier: ModeTier,
}

/// Per-mode resolved periods: the shortest period any live subscriber
/// requested, or disabled when nobody is subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EffectiveFrequencies {
    periods: [Option<u32>; VisionMode::COUNT],
}

impl EffectiveFrequencies {
    pub fn period(&self, mode: VisionMode) -> Option<u32> {
        self.periods[mode.index()]
    }

    pub fn is_enabled(&self, mode: VisionMode) -> bool {
        self.periods[mode.index()].is_some()
    }

    pub fn enabled_modes(&self) -> VisionModeSet {
        VisionMode::ALL
            .into_iter()
            .filter(|m| self.is_enabled(*m))
            .collect()
    }

    /// Enabled (mode, period) pairs in mode order.
    pub fn iter(&self) -> impl Iterator<Item = (VisionMode, u32)> + '_ {
        VisionMode::ALL
            .into_iter()
            .filter_map(|m| self.periods[m.index()].map(|p| (m, p)))
    }
}

/// Maps subscriber handles to their current request sets and resolves the
/// winning cadence per mode.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<SubscriberId, Vec<FrequencyRequest>>,
    one_shots: VisionModeSet,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full-replace this subscriber's request set.
    ///
    /// Returns `true` if the registry's aggregate state changed (the caller
    /// uses this to decide whether the schedule needs recomputing).
    /// Submitting the set a subscriber already holds is a no-op.
    pub fn set_subscriptions(
        &mut self,
        subscriber: SubscriberId,
        requests: Vec<FrequencyRequest>,
    ) -> bool {
        if requests.is_empty() {
            return self.release_all(subscriber);
        }

        match self.subscriptions.get(&subscriber) {
            Some(existing) if request_sets_equal(existing, &requests) => false,
            _ => {
                debug!(?subscriber, count = requests.len(), "subscription set replaced");
                self.subscriptions.insert(subscriber, requests);
                true
            },
        }
    }

    /// Drop every request this subscriber holds. Idempotent: a second call
    /// for the same handle returns `false` and changes nothing.
    pub fn release_all(&mut self, subscriber: SubscriberId) -> bool {
        let removed = self.subscriptions.remove(&subscriber).is_some();
        if removed {
            debug!(?subscriber, "subscriptions released");
        }
        removed
    }

    /// Queue a mode to run on the next processed frame regardless of its
    /// schedule. Consumed by [`Self::take_one_shots`].
    pub fn request_one_shot(&mut self, mode: VisionMode) {
        self.one_shots.insert(mode);
    }

    /// Pending one-shot modes, without consuming them.
    pub fn pending_one_shots(&self) -> VisionModeSet {
        self.one_shots
    }

    /// Take and clear the pending one-shot set. Each one-shot fires for
    /// exactly one frame unless re-requested.
    pub fn take_one_shots(&mut self) -> VisionModeSet {
        std::mem::take(&mut self.one_shots)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Collapse all live requests to one winning period per mode: the
    /// highest requested cadence (shortest period) wins; zero subscribers
    /// for a mode disables it.
    pub fn resolve(&self, table: &ModeCostTable) -> EffectiveFrequencies {
        let mut effective = EffectiveFrequencies::default();
        for requests in self.subscriptions.values() {
            for request in requests {
                let period = table.setting(request.mode).period_for(request.tier);
                let slot = &mut effective.periods[request.mode.index()];
                *slot = Some(match *slot {
                    Some(existing) => existing.min(period),
                    None => period,
                });
            }
        }
        effective
    }
}

/// Order-insensitive comparison of two request sets.
fn request_sets_equal(a: &[FrequencyRequest], b: &[FrequencyRequest]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|r| b.contains(r)) && b.iter().all(|r| a.contains(r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::test_table;

    fn req(mode: VisionMode, tier: ModeTier) -> FrequencyRequest {
        FrequencyRequest { mode, tier }
    }

    #[test]
    fn test_highest_tier_wins_and_reverts() {
        let table = test_table();
        let mut registry = SubscriptionRegistry::new();

        let low = SubscriberId(1);
        let high = SubscriberId(2);

        registry.set_subscriptions(low, vec![req(VisionMode::Faces, ModeTier::Low)]);
        registry.set_subscriptions(high, vec![req(VisionMode::Faces, ModeTier::High)]);
        assert_eq!(registry.resolve(&table).period(VisionMode::Faces), Some(1));

        // Releasing the High subscriber reverts to Low's period
        assert!(registry.release_all(high));
        assert_eq!(registry.resolve(&table).period(VisionMode::Faces), Some(4));

        assert!(registry.release_all(low));
        assert_eq!(registry.resolve(&table).period(VisionMode::Faces), None);
    }

    #[test]
    fn test_full_replace_supersedes() {
        let table = test_table();
        let mut registry = SubscriptionRegistry::new();
        let sub = SubscriberId(7);

        registry.set_subscriptions(sub, vec![req(VisionMode::Markers, ModeTier::High)]);
        registry.set_subscriptions(sub, vec![req(VisionMode::Pets, ModeTier::Low)]);

        let effective = registry.resolve(&table);
        assert!(!effective.is_enabled(VisionMode::Markers));
        assert_eq!(effective.period(VisionMode::Pets), Some(8));
    }

    #[test]
    fn test_set_subscriptions_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        let sub = SubscriberId(3);
        let requests = vec![
            req(VisionMode::Motion, ModeTier::Med),
            req(VisionMode::Faces, ModeTier::Low),
        ];

        assert!(registry.set_subscriptions(sub, requests.clone()));
        // Same set, different order: no change
        let reordered = vec![
            req(VisionMode::Faces, ModeTier::Low),
            req(VisionMode::Motion, ModeTier::Med),
        ];
        assert!(!registry.set_subscriptions(sub, reordered));
        assert!(registry.set_subscriptions(sub, vec![req(VisionMode::Faces, ModeTier::Low)]));
    }

    #[test]
    fn test_release_all_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        let sub = SubscriberId(9);
        registry.set_subscriptions(sub, vec![req(VisionMode::Viz, ModeTier::Standard)]);

        assert!(registry.release_all(sub));
        assert!(!registry.release_all(sub));
        // Releasing a handle that never subscribed is also a no-op
        assert!(!registry.release_all(SubscriberId(1234)));
    }

    #[test]
    fn test_empty_set_equals_release() {
        let table = test_table();
        let mut registry = SubscriptionRegistry::new();
        let sub = SubscriberId(4);

        registry.set_subscriptions(sub, vec![req(VisionMode::Markers, ModeTier::Standard)]);
        assert!(registry.set_subscriptions(sub, vec![]));
        assert!(!registry.resolve(&table).is_enabled(VisionMode::Markers));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_one_shots_are_consumed() {
        let mut registry = SubscriptionRegistry::new();
        registry.request_one_shot(VisionMode::SaveImages);
        registry.request_one_shot(VisionMode::SaveImages);

        let fired = registry.take_one_shots();
        assert!(fired.contains(VisionMode::SaveImages));
        assert_eq!(fired.len(), 1);

        // Consumed: not present on subsequent ticks unless re-requested
        assert!(registry.take_one_shots().is_empty());
    }

    #[test]
    fn test_resolve_takes_min_across_same_subscriber() {
        let table = test_table();
        let mut registry = SubscriptionRegistry::new();
        let sub = SubscriberId(5);
        registry.set_subscriptions(
            sub,
            vec![
                req(VisionMode::Motion, ModeTier::Low),
                req(VisionMode::Motion, ModeTier::High),
            ],
        );
        assert_eq!(registry.resolve(&table).period(VisionMode::Motion), Some(1));
    }
}
