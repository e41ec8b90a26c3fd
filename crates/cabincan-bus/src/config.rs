use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Job scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Longest the scheduler sleeps between checks, bounding how late a
    /// newly registered or cancelled job is noticed.
    #[serde(rename = "max_wake_ms", with = "millis")]
    pub max_wake: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_wake: Duration::from_millis(50),
        }
    }
}

impl SchedulerConfig {
    /// Sleep budget given the time until the next job is due.
    pub fn sleep_for(&self, until_due: Option<Duration>) -> Duration {
        until_due.map_or(self.max_wake, |d| d.min(self.max_wake))
    }
}

/// Settings applied to every channel a registry opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub scheduler: SchedulerConfig,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        if ms == 0 {
            return Err(serde::de::Error::custom("max_wake_ms must be greater than zero"));
        }
        Ok(Duration::from_millis(ms))
    }
}
