//! Scheduled message types and recurrence arithmetic.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::ApiKeyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(pub Uuid);

impl ScheduleId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ScheduleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// How the entry was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Once,
    Recurring,
    Delayed,
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleKind::Once => "once",
            ScheduleKind::Recurring => "recurring",
            ScheduleKind::Delayed => "delayed",
        };
        f.write_str(s)
    }
}

impl FromStr for ScheduleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(ScheduleKind::Once),
            "recurring" => Ok(ScheduleKind::Recurring),
            "delayed" => Ok(ScheduleKind::Delayed),
            other => Err(format!("invalid schedule kind: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    None,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    fn step(&self) -> Option<TimeDelta> {
        match self {
            Recurrence::Hourly => TimeDelta::try_hours(1),
            Recurrence::Daily => TimeDelta::try_days(1),
            Recurrence::Weekly => TimeDelta::try_weeks(1),
            Recurrence::None | Recurrence::Monthly => None,
        }
    }

    /// The `n`th occurrence counted from `anchor`, or `None` for one-shot
    /// entries and results outside the representable range.
    ///
    /// Monthly occurrences clamp to the last day of shorter months without
    /// carrying the clamp forward: Jan 31, Feb 28, Mar 31.
    pub fn occurrence(&self, anchor: DateTime<Utc>, n: u32) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::None => None,
            Recurrence::Monthly => anchor.checked_add_months(Months::new(n)),
            fixed => {
                let step = fixed.step()?.checked_mul(i32::try_from(n).ok()?)?;
                anchor.checked_add_signed(step)
            }
        }
    }

    /// The first occurrence after `anchor` that is strictly later than
    /// `after`. Occurrences in between are skipped, not replayed.
    pub fn next_after(&self, anchor: DateTime<Utc>, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut n: u32 = match self {
            Recurrence::None => return None,
            _ if after < anchor => 1,
            Recurrence::Monthly => {
                let months = (i64::from(after.year()) - i64::from(anchor.year())) * 12
                    + i64::from(after.month()) - i64::from(anchor.month());
                u32::try_from(months.max(1)).ok()?
            }
            fixed => {
                let step = fixed.step()?.num_seconds();
                let elapsed = (after - anchor).num_seconds();
                u32::try_from(elapsed / step + 1).ok()?
            }
        };
        loop {
            let next = self.occurrence(anchor, n)?;
            if next > after {
                return Some(next);
            }
            n = n.checked_add(1)?;
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recurrence::None => "none",
            Recurrence::Hourly => "hourly",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
        };
        f.write_str(s)
    }
}

impl FromStr for Recurrence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Recurrence::None),
            "hourly" => Ok(Recurrence::Hourly),
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            "monthly" => Ok(Recurrence::Monthly),
            other => Err(format!("invalid recurrence: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Paused,
    Sent,
    Cancelled,
    Failed,
}

impl ScheduleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScheduleStatus::Sent | ScheduleStatus::Cancelled | ScheduleStatus::Failed
        )
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Paused => "paused",
            ScheduleStatus::Sent => "sent",
            ScheduleStatus::Cancelled => "cancelled",
            ScheduleStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScheduleStatus::Pending),
            "paused" => Ok(ScheduleStatus::Paused),
            "sent" => Ok(ScheduleStatus::Sent),
            "cancelled" => Ok(ScheduleStatus::Cancelled),
            "failed" => Ok(ScheduleStatus::Failed),
            other => Err(format!("invalid schedule status: '{other}'")),
        }
    }
}

/// A deferred or recurring message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub id: ScheduleId,
    pub chat_id: i64,
    pub text: String,
    pub kind: ScheduleKind,
    /// Next time this entry is due.
    pub send_at: DateTime<Utc>,
    /// First requested send time. Recurring occurrences are counted from
    /// here so a clamped month does not shift later ones.
    pub anchor_at: DateTime<Utc>,
    pub recurrence: Recurrence,
    /// `None` means unbounded.
    pub max_occurrences: Option<u32>,
    pub occurrences_sent: u32,
    pub status: ScheduleStatus,
    pub created_by: Option<ApiKeyId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ScheduledMessage {
    /// Whether the next successful send finishes this entry.
    pub fn is_final_occurrence(&self) -> bool {
        self.recurrence == Recurrence::None
            || self
                .max_occurrences
                .is_some_and(|max| self.occurrences_sent + 1 >= max)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Pending && self.send_at <= now
    }
}

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    /// Due entries not sent: claimed by another tick, or cancelled or
    /// paused while waiting for a send slot.
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_recurrence_occurrence() {
        let t = Utc.with_ymd_and_hms(2026, 1, 31, 9, 0, 0).unwrap();
        assert_eq!(Recurrence::None.occurrence(t, 1), None);
        assert_eq!(
            Recurrence::Hourly.occurrence(t, 1).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 31, 10, 0, 0).unwrap()
        );
        assert_eq!(
            Recurrence::Weekly.occurrence(t, 1).unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 7, 9, 0, 0).unwrap()
        );
        // Jan 31 clamps to Feb 28 and comes back to Mar 31.
        assert_eq!(
            Recurrence::Monthly.occurrence(t, 1).unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 28, 9, 0, 0).unwrap()
        );
        assert_eq!(
            Recurrence::Monthly.occurrence(t, 2).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 31, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_after_keeps_month_end() {
        let anchor = Utc.with_ymd_and_hms(2026, 1, 31, 9, 0, 0).unwrap();
        let feb = Recurrence::Monthly.next_after(anchor, anchor).unwrap();
        assert_eq!(feb, Utc.with_ymd_and_hms(2026, 2, 28, 9, 0, 0).unwrap());
        let mar = Recurrence::Monthly.next_after(anchor, feb).unwrap();
        assert_eq!(mar, Utc.with_ymd_and_hms(2026, 3, 31, 9, 0, 0).unwrap());
        let apr = Recurrence::Monthly.next_after(anchor, mar).unwrap();
        assert_eq!(apr, Utc.with_ymd_and_hms(2026, 4, 30, 9, 0, 0).unwrap());

        // Skips everything up to and including `after`.
        let later = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(
            Recurrence::Hourly.next_after(anchor, later).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap()
        );
        assert_eq!(
            Recurrence::Daily.next_after(anchor, anchor - TimeDelta::days(3)).unwrap(),
            anchor + TimeDelta::days(1)
        );
        assert_eq!(Recurrence::None.next_after(anchor, anchor), None);
    }

    #[test]
    fn test_recurrence_out_of_range() {
        let end = DateTime::<Utc>::MAX_UTC;
        for recurrence in [
            Recurrence::Hourly,
            Recurrence::Daily,
            Recurrence::Weekly,
            Recurrence::Monthly,
        ] {
            assert_eq!(recurrence.occurrence(end, 1), None);
            assert_eq!(recurrence.next_after(end, end), None);
        }
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(Recurrence::Hourly.occurrence(start, u32::MAX), None);
    }

    #[test]
    fn test_final_occurrence() {
        let now = Utc::now();
        let mut msg = ScheduledMessage {
            id: ScheduleId::new(),
            chat_id: 1,
            text: "standup".into(),
            kind: ScheduleKind::Recurring,
            send_at: now,
            anchor_at: now,
            recurrence: Recurrence::Daily,
            max_occurrences: Some(3),
            occurrences_sent: 1,
            status: ScheduleStatus::Pending,
            created_by: None,
            created_at: now,
            updated_at: now,
            last_sent_at: None,
            last_error: None,
        };
        assert!(!msg.is_final_occurrence());
        msg.occurrences_sent = 2;
        assert!(msg.is_final_occurrence());
        msg.max_occurrences = None;
        assert!(!msg.is_final_occurrence());
        msg.recurrence = Recurrence::None;
        assert!(msg.is_final_occurrence());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ScheduleStatus::Sent.is_terminal());
        assert!(ScheduleStatus::Failed.is_terminal());
        assert!(!ScheduleStatus::Paused.is_terminal());
    }
}
