//! # Argus Vision Modes
//!
//! Pure types and scheduling logic for the Argus perception pipeline:
//! - [`VisionMode`] / [`VisionModeSet`]: the schedulable algorithm tags
//! - [`ModeCostTable`]: validated per-mode cadence/cost configuration
//! - [`SubscriptionRegistry`]: subscriber handle -> cadence request mapping
//! - [`ScheduleBalancer`]: phase-offset selection that flattens per-tick cost
//!
//! Everything in this crate is a pure function of its inputs; the pipeline
//! crate owns all IO and threading.

pub mod mode;
pub mod schedule;
pub mod settings;
pub mod subscription;

pub use mode::{ModeTier, VisionMode, VisionModeSet};
pub use schedule::{BalancedSchedule, ModeSchedule, ScheduleBalancer};
pub use settings::{ConfigError, ModeCostTable, ModeSetting};
pub use subscription::{
    EffectiveFrequencies, FrequencyRequest, SubscriberId, SubscriptionRegistry,
};
