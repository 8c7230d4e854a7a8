//! User delivery profile storage.
//!
//! The profile gates delivery decisions (phone number, calling toggle,
//! quiet hours, timezone offset) and holds no business logic of its own;
//! the router in [`crate::delivery`] interprets it. A missing or corrupt
//! profile always reads as the safe default with calling disabled.

use crate::error::Result;
use crate::store::{self, LocalStore, keys};
use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// A daily window during which active delivery is deferred.
///
/// `start > end` means the window wraps midnight (e.g. 22:00–07:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    /// Inclusive window start, local time.
    pub start: NaiveTime,
    /// Exclusive window end, local time.
    pub end: NaiveTime,
}

impl QuietHours {
    /// Whether `time` falls inside the window `[start, end)`.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Per-user preferences consulted at delivery time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserDeliveryProfile {
    /// Profile identifier.
    pub id: String,
    /// E.164 phone number for call delivery, if any.
    pub phone_number: Option<String>,
    /// Whether call delivery is allowed at all.
    pub calling_enabled: bool,
    /// Daily no-delivery window, if configured.
    pub quiet_hours: Option<QuietHours>,
    /// Profile timezone as minutes east of UTC.
    pub utc_offset_minutes: i32,
}

impl Default for UserDeliveryProfile {
    fn default() -> Self {
        Self {
            id: "default".to_owned(),
            phone_number: None,
            calling_enabled: false,
            quiet_hours: None,
            utc_offset_minutes: 0,
        }
    }
}

impl UserDeliveryProfile {
    /// The profile timezone, clamped to UTC on an out-of-range offset.
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// `now` expressed as local wall-clock time for this profile.
    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveTime {
        now.with_timezone(&self.timezone()).time()
    }
}

/// Partial profile update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilePatch {
    /// New phone number.
    pub phone_number: Option<String>,
    /// New calling toggle.
    pub calling_enabled: Option<bool>,
    /// New quiet-hours window.
    pub quiet_hours: Option<QuietHours>,
    /// New timezone offset in minutes east of UTC.
    pub utc_offset_minutes: Option<i32>,
}

/// Store-backed profile access.
pub struct ProfileStore {
    store: Arc<dyn LocalStore>,
}

impl ProfileStore {
    /// Create a profile store over the given local store.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Load the profile, falling back to the calling-disabled default on
    /// any read or parse error.
    pub fn get(&self) -> UserDeliveryProfile {
        match store::get_json(self.store.as_ref(), keys::PROFILE) {
            Ok(Some(profile)) => profile,
            Ok(None) => UserDeliveryProfile::default(),
            Err(e) => {
                warn!("cannot load delivery profile, using safe default: {e}");
                UserDeliveryProfile::default()
            }
        }
    }

    /// Merge a partial update into the stored profile and persist it.
    pub fn update(&self, patch: ProfilePatch) -> Result<UserDeliveryProfile> {
        let mut profile = self.get();
        if let Some(phone) = patch.phone_number {
            profile.phone_number = Some(phone);
        }
        if let Some(enabled) = patch.calling_enabled {
            profile.calling_enabled = enabled;
        }
        if let Some(window) = patch.quiet_hours {
            profile.quiet_hours = Some(window);
        }
        if let Some(offset) = patch.utc_offset_minutes {
            profile.utc_offset_minutes = offset;
        }
        self.replace(&profile)?;
        Ok(profile)
    }

    /// Persist a full profile, replacing the stored one.
    pub fn replace(&self, profile: &UserDeliveryProfile) -> Result<()> {
        store::set_json(self.store.as_ref(), keys::PROFILE, profile)
    }
}
