//! Observable settings.
//!
//! A [`Setting`] is a named, typed value that can be changed from one side
//! (an operator, the CLI, the display refresher) and read or watched from
//! another (the acquisition worker). It is built on `tokio::sync::watch`, so
//! reads never block and every subscriber sees the latest value.
//!
//! # Example
//!
//! ```rust,ignore
//! let waiting = Setting::new("time_lapse_waiting_time", 1.0)
//!     .with_units("s")
//!     .with_min(0.0);
//!
//! let mut rx = waiting.subscribe();
//! waiting.set(2.5)?;
//! rx.changed().await?;
//! assert_eq!(*rx.borrow(), 2.5);
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::watch;

type Validator<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// A thread-safe, observable setting with optional validation.
pub struct Setting<T>
where
    T: Clone + Send + Sync + 'static,
{
    sender: watch::Sender<T>,
    metadata: SettingMetadata,
    validator: Option<Validator<T>>,
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Setting<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setting")
            .field("metadata", &self.metadata)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

/// Descriptive information about a setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingMetadata {
    /// Setting name, as used in configuration files
    pub name: String,
    /// Physical units (e.g. "s", "um")
    pub units: Option<String>,
}

impl<T> Setting<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a setting with an initial value.
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender,
            metadata: SettingMetadata {
                name: name.into(),
                units: None,
            },
            validator: None,
        }
    }

    /// Attach physical units.
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.metadata.units = Some(units.into());
        self
    }

    /// Attach a custom validator, run on every `set`.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Setting name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Setting metadata.
    pub fn metadata(&self) -> &SettingMetadata {
        &self.metadata
    }

    /// Validate and store a new value, notifying subscribers.
    pub fn set(&self, value: T) -> Result<()> {
        if let Some(validator) = &self.validator {
            validator(&value).map_err(|e| anyhow!("{}: {}", self.metadata.name, e))?;
        }
        self.sender.send_replace(value);
        Ok(())
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }
}

impl<T> Setting<T>
where
    T: Clone + Send + Sync + PartialOrd + Debug + 'static,
{
    /// Reject values below `min`.
    pub fn with_min(self, min: T) -> Self {
        self.with_validator(move |value: &T| {
            if value < &min {
                Err(anyhow!("value {:?} is below minimum {:?}", value, min))
            } else {
                Ok(())
            }
        })
    }

    /// Reject values outside `[min, max]`.
    pub fn with_range(self, min: T, max: T) -> Self {
        self.with_validator(move |value: &T| {
            if value < &min || value > &max {
                Err(anyhow!(
                    "value {:?} out of range [{:?}, {:?}]",
                    value,
                    min,
                    max
                ))
            } else {
                Ok(())
            }
        })
    }
}
