//! Incident lifecycle state machine
//!
//! ```text
//!            down                        up
//!   NONE ───────────▶ OPEN ─────────────────────▶ RESOLVED
//!                      │ ▲
//!                      └─┘ down (continues, may re-notify)
//! ```
//!
//! This module only decides; storage backends apply the decision inside the
//! same transaction that persists the result, so the at-most-one-OPEN
//! invariant holds under concurrent ingestion.
//!
//! ## Notification throttle
//!
//! A down result notifies only when the monitor's `last_checked_at` is unset
//! or older than [`NOTIFY_COOLDOWN_SECS`]. The throttle reads the monitor's
//! watermark, not the incident's `last_notified_at`.

use chrono::{DateTime, Duration, Utc};

use crate::model::{Incident, IncidentStatus};

/// Cooldown between notifications for the same monitor
pub const NOTIFY_COOLDOWN_SECS: i64 = 60 * 60;

pub fn notify_cooldown() -> Duration {
    Duration::seconds(NOTIFY_COOLDOWN_SECS)
}

/// What to do with the monitor's incidents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Up result while nothing is open
    Unchanged,

    /// First down result: create a new OPEN incident
    Open { summary: String },

    /// Down result while an incident is already open
    Continue { incident_id: i64 },

    /// Up result: resolve every OPEN incident
    Resolve { incident_ids: Vec<i64> },
}

/// Transition plus whether a notification fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub transition: Transition,
    pub notify: bool,
}

/// Summary text for an incident opened by a failure in `region`
pub fn summary_for(region: &str) -> String {
    format!("Downtime detected from {region}")
}

/// Whether a down result arriving at `now` may notify
pub fn should_notify(last_checked_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_checked_at {
        Some(last) => now - last > notify_cooldown(),
        None => true,
    }
}

/// Decide the incident transition for one result
///
/// `open` holds the monitor's currently OPEN incidents (normally zero or one).
/// `last_checked_at` is the monitor's watermark *before* this result advances it.
pub fn decide(
    is_up: bool,
    region: &str,
    open: &[Incident],
    last_checked_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Decision {
    let open_ids: Vec<i64> = open
        .iter()
        .filter(|i| i.status == IncidentStatus::Open)
        .map(|i| i.id)
        .collect();

    if is_up {
        let transition = if open_ids.is_empty() {
            Transition::Unchanged
        } else {
            Transition::Resolve {
                incident_ids: open_ids,
            }
        };
        return Decision {
            transition,
            notify: false,
        };
    }

    let transition = match open_ids.first() {
        Some(&incident_id) => Transition::Continue { incident_id },
        None => Transition::Open {
            summary: summary_for(region),
        },
    };

    Decision {
        transition,
        notify: should_notify(last_checked_at, now),
    }
}
