/// Poll schedules
///
/// Poll nodes carry a `pollTimes` parameter: `{ "item": [ { "mode": "everyMinute" }, ... ] }`.
/// Every entry becomes a six-field cron expression (seconds first), which is what
/// the cron scheduler consumes.

use crate::{errors::ActivationError, workflow::types::Node};
use anyhow::Context;
use serde::{Deserialize, Serialize};

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Built-in schedule for `everyMinute`
pub const EVERY_MINUTE: &str = "0 * * * * *";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollTimes {
    #[serde(default)]
    pub item: Vec<TriggerTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntervalUnit {
    Minutes,
    Hours,
}

/// One configured poll time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum TriggerTime {
    EveryMinute,
    EveryHour {
        #[serde(default)]
        minute: u32,
    },
    EveryDay {
        #[serde(default)]
        hour: u32,
        #[serde(default)]
        minute: u32,
    },
    EveryWeek {
        #[serde(default)]
        hour: u32,
        #[serde(default)]
        minute: u32,
        /// 0 = Sunday
        #[serde(default)]
        weekday: u32,
    },
    EveryMonth {
        #[serde(default)]
        hour: u32,
        #[serde(default)]
        minute: u32,
        #[serde(default = "first_day", rename = "dayOfMonth")]
        day_of_month: u32,
    },
    EveryX {
        value: u32,
        unit: IntervalUnit,
    },
    Custom {
        #[serde(rename = "cronExpression")]
        cron_expression: String,
    },
}

fn first_day() -> u32 {
    1
}

impl TriggerTime {
    pub fn to_cron_expression(&self) -> String {
        match self {
            TriggerTime::EveryMinute => EVERY_MINUTE.to_string(),
            TriggerTime::EveryHour { minute } => format!("0 {minute} * * * *"),
            TriggerTime::EveryDay { hour, minute } => format!("0 {minute} {hour} * * *"),
            TriggerTime::EveryWeek { hour, minute, weekday } => {
                let day = WEEKDAYS[(*weekday % 7) as usize];
                format!("0 {minute} {hour} * * {day}")
            }
            TriggerTime::EveryMonth { hour, minute, day_of_month } => {
                format!("0 {minute} {hour} {day_of_month} * *")
            }
            TriggerTime::EveryX { value, unit: IntervalUnit::Minutes } => format!("0 */{} * * * *", (*value).max(1)),
            TriggerTime::EveryX { value, unit: IntervalUnit::Hours } => format!("0 0 */{} * * *", (*value).max(1)),
            TriggerTime::Custom { cron_expression } => cron_expression.trim().to_string(),
        }
    }
}

/// Read the `pollTimes` parameter of a poll node
pub fn from_node(node: &Node) -> anyhow::Result<Vec<TriggerTime>> {
    let raw = node
        .parameter("pollTimes")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Poll node '{}' has no 'pollTimes' parameter", node.name))?;
    let times: PollTimes = serde_json::from_value(raw)
        .with_context(|| format!("Poll node '{}' has invalid 'pollTimes'", node.name))?;
    Ok(times.item)
}

/// Reject expressions the poller can't or shouldn't schedule
///
/// A `*` in the seconds field means polling more than once a minute.
pub fn validate_poll_expression(expression: &str) -> Result<(), ActivationError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();

    if fields.first().is_some_and(|seconds| seconds.contains('*')) {
        return Err(ActivationError::new(
            "The polling interval is too short. It has to be at least a minute.",
        ));
    }

    if !(6..=7).contains(&fields.len()) {
        return Err(ActivationError::new(format!(
            "Invalid cron expression \"{expression}\": expected 6 fields (seconds first)"
        )));
    }

    Ok(())
}
