//! Cost-balanced mode scheduling.
//!
//! Given the resolved per-mode periods and the relative costs from the mode
//! table, the balancer picks a phase offset for each enabled mode so the
//! aggregate cost of any single tick stays as flat as possible over one full
//! cycle of the schedule. The computation is a pure function of its inputs
//! and is only rerun when the subscription set changes.

use crate::mode::{VisionMode, VisionModeSet};
use crate::settings::ModeCostTable;
use crate::subscription::EffectiveFrequencies;
use tracing::{trace, warn};

/// Upper bound on the planning window, in ticks.
///
/// The true optimization window is the LCM of all active periods. Configured
/// periods are small powers of two in practice, but a pathological table
/// could make the LCM huge; past this bound the balancer plans over a
/// truncated window (per-mode cadence stays exact, only the flattening
/// becomes approximate).
const MAX_PLAN_WINDOW: u32 = 4096;

/// Cadence of one mode: exactly one "on" slot every `period` ticks, at phase
/// `offset` (`0 <= offset < period`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSchedule {
    period: u32,
    offset: u32,
}

impl ModeSchedule {
    pub fn new(period: u32, offset: u32) -> Self {
        debug_assert!(period > 0 && offset < period);
        Self { period, offset }
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn is_active(&self, tick: u64) -> bool {
        tick % u64::from(self.period) == u64::from(self.offset)
    }
}

/// The full set of enabled modes' cadences with their chosen phase offsets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BalancedSchedule {
    entries: [Option<ModeSchedule>; VisionMode::COUNT],
}

impl BalancedSchedule {
    /// Schedule with every mode disabled.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn schedule_for(&self, mode: VisionMode) -> Option<ModeSchedule> {
        self.entries[mode.index()]
    }

    pub fn is_enabled(&self, mode: VisionMode) -> bool {
        self.entries[mode.index()].is_some()
    }

    pub fn enabled_modes(&self) -> VisionModeSet {
        VisionMode::ALL
            .into_iter()
            .filter(|m| self.is_enabled(*m))
            .collect()
    }

    /// Modes whose "on" slot lands on this tick.
    pub fn modes_for_tick(&self, tick: u64) -> VisionModeSet {
        VisionMode::ALL
            .into_iter()
            .filter(|m| {
                self.entries[m.index()]
                    .map(|s| s.is_active(tick))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Total cost of the modes active on `tick` under `table`.
    pub fn tick_cost(&self, tick: u64, table: &ModeCostTable) -> f32 {
        self.modes_for_tick(tick)
            .iter()
            .map(|m| table.relative_cost(m))
            .sum()
    }
}

/// Phase-offset selection over one LCM cycle of the active periods.
pub struct ScheduleBalancer;

impl ScheduleBalancer {
    /// Compute a balanced schedule for the given effective frequencies.
    ///
    /// Modes are placed in descending cost order (ties broken by mode
    /// discriminant order); each mode takes the offset whose "on" ticks see
    /// the lowest already-placed cost, with the smallest such offset winning
    /// ties. Both tie-breaks are stable, so recomputation for the same
    /// subscriber set yields an identical schedule.
    pub fn compute(
        frequencies: &EffectiveFrequencies,
        table: &ModeCostTable,
    ) -> BalancedSchedule {
        let mut active: Vec<(VisionMode, u32, f32)> = frequencies
            .iter()
            .map(|(mode, period)| (mode, period, table.relative_cost(mode)))
            .collect();

        if active.is_empty() {
            return BalancedSchedule::empty();
        }

        // Descending cost, then mode order. Mode order alone is a total
        // order, so the sort is fully deterministic.
        active.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let window = plan_window(active.iter().map(|(_, period, _)| *period));
        let mut load = vec![0.0f32; window as usize];
        let mut schedule = BalancedSchedule::empty();

        for (mode, period, cost) in active {
            let offset = best_offset(&load, period);
            schedule.entries[mode.index()] = Some(ModeSchedule::new(period, offset));

            let mut tick = offset as usize;
            while tick < load.len() {
                load[tick] += cost;
                tick += period as usize;
            }
            trace!(%mode, period, offset, cost, "placed mode");
        }

        schedule
    }
}

/// LCM of the active periods, clamped to [`MAX_PLAN_WINDOW`] (but never
/// below the longest single period, so every offset stays observable).
fn plan_window(periods: impl Iterator<Item = u32>) -> u32 {
    let mut window: u64 = 1;
    let mut longest: u32 = 1;
    let mut clamped = false;

    for period in periods {
        longest = longest.max(period);
        window = lcm(window, u64::from(period));
        if window > u64::from(MAX_PLAN_WINDOW) {
            clamped = true;
        }
    }

    if clamped {
        warn!(
            lcm = window,
            max = MAX_PLAN_WINDOW,
            "active periods' LCM exceeds planning window; balancing over truncated cycle"
        );
    }
    (window.min(u64::from(MAX_PLAN_WINDOW)) as u32).max(longest)
}

/// Offset in `0..period` whose on-ticks carry the least already-placed load.
fn best_offset(load: &[f32], period: u32) -> u32 {
    let mut best = 0u32;
    let mut best_score = f32::INFINITY;

    for offset in 0..period {
        let mut score = 0.0f32;
        let mut tick = offset as usize;
        while tick < load.len() {
            score += load[tick];
            tick += period as usize;
        }
        // Strict less-than keeps the smallest offset on ties
        if score < best_score {
            best_score = score;
            best = offset;
        }
    }
    best
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 { 0 } else { a / gcd(a, b) * b }
}
