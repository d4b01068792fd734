use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{ADDRESS_WRAPPER_PREFIX, ADDRESS_WRAPPER_SUFFIX};
use crate::error::RecordError;
use crate::utils::time;

/// Ledger account identifier (bech32 text on the host side).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Strip the oracle's `Address(wif=...)` decoration. Keys without the
    /// decoration pass through unchanged.
    pub fn from_wrapped(key: &str) -> Self {
        let key = key.trim();
        let key = key.strip_prefix(ADDRESS_WRAPPER_PREFIX).unwrap_or(key);
        let key = key.strip_suffix(ADDRESS_WRAPPER_SUFFIX).unwrap_or(key);
        Self(key.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle of a cached schedule. Anything other than `Pending` counts as
/// processed and is never reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ScheduleStatus {
    Pending,
    Activated { height: u64 },
    Rejected { reason: String },
}

impl ScheduleStatus {
    pub fn is_processed(&self) -> bool {
        !matches!(self, ScheduleStatus::Pending)
    }
}

/// Vesting lock definition for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VestingSchedule {
    pub address: Address,
    /// Base units of the governed denomination.
    pub total_amount: u128,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub parts_count: u32,
    /// Leading installments (within `parts_count`) that release nothing.
    pub cliff_parts: u32,
    /// Share of the balance released at activation, 0..=100.
    pub tge_percent: u8,
    pub activation_block: u64,
    pub status: ScheduleStatus,
}

impl VestingSchedule {
    pub fn processed(&self) -> bool {
        self.status.is_processed()
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        time::end_of(self.start_time, self.duration)
    }

    /// Structural checks that no amount of retrying can fix.
    pub fn check_shape(&self) -> Result<(), String> {
        if self.parts_count == 0 {
            return Err("parts count must be positive".into());
        }
        if self.cliff_parts >= self.parts_count {
            return Err(format!(
                "cliff parts {} must be below parts count {}",
                self.cliff_parts, self.parts_count
            ));
        }
        if self.tge_percent > 100 {
            return Err(format!("tge percent {} exceeds 100", self.tge_percent));
        }
        Ok(())
    }

    /// Content digest over every upstream-supplied field (status excluded).
    pub fn digest(&self) -> [u8; 32] {
        let mut h = blake3::Hasher::new();
        h.update(self.address.as_str().as_bytes());
        h.update(&[0u8]);
        h.update(&self.total_amount.to_le_bytes());
        h.update(&self.start_time.timestamp().to_le_bytes());
        h.update(&self.start_time.timestamp_subsec_nanos().to_le_bytes());
        h.update(&self.duration.as_secs().to_le_bytes());
        h.update(&self.parts_count.to_le_bytes());
        h.update(&self.cliff_parts.to_le_bytes());
        h.update(&[self.tge_percent]);
        h.update(&self.activation_block.to_le_bytes());
        *h.finalize().as_bytes()
    }
}

/// Number field as the oracle actually sends it: integer, float or string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LooseNumber {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
}

impl LooseNumber {
    fn to_u128(&self) -> Result<u128, String> {
        match self {
            LooseNumber::Unsigned(n) => Ok(u128::from(*n)),
            LooseNumber::Signed(n) => u128::try_from(*n).map_err(|_| format!("negative value {n}")),
            LooseNumber::Float(f) => {
                // 2^53: the largest range where every integer is exact in f64.
                if f.is_finite() && *f >= 0.0 && f.fract() == 0.0 && *f <= 9_007_199_254_740_992.0 {
                    Ok(*f as u128)
                } else {
                    Err(format!("non-integral value {f}"))
                }
            }
            LooseNumber::Text(s) => s
                .trim()
                .parse::<u128>()
                .map_err(|_| format!("not an unsigned integer: {s:?}")),
        }
    }

    fn to_bounded<T: TryFrom<u128>>(&self, field: &str) -> Result<T, String> {
        let v = self.to_u128().map_err(|e| format!("{field}: {e}"))?;
        T::try_from(v).map_err(|_| format!("{field}: {v} out of range"))
    }
}

/// One `vestingAddresses` entry before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawScheduleRecord {
    #[serde(default)]
    pub amount: Option<LooseNumber>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub parts: Option<LooseNumber>,
    #[serde(default)]
    pub block: Option<LooseNumber>,
    #[serde(default)]
    pub percent: Option<LooseNumber>,
    #[serde(default)]
    pub cliff: Option<LooseNumber>,
}

impl RawScheduleRecord {
    /// Validate and normalize into a pending schedule for `address`.
    ///
    /// `amount`, `start`, `duration`, `parts` and `block` are required;
    /// `percent` and `cliff` default to zero.
    pub fn into_schedule(self, address: Address) -> Result<VestingSchedule, RecordError> {
        let bad = |reason: String| RecordError::new(address.as_str(), reason);

        if address.is_empty() {
            return Err(bad("empty address".into()));
        }
        let total_amount = self
            .amount
            .ok_or_else(|| bad("missing amount".into()))?
            .to_bounded::<u128>("amount")
            .map_err(bad)?;
        let start = self.start.ok_or_else(|| bad("missing start".into()))?;
        let start_time = time::parse_instant(&start).map_err(|e| bad(format!("start: {e}")))?;
        let duration = self.duration.ok_or_else(|| bad("missing duration".into()))?;
        let duration = time::parse_duration(&duration).map_err(|e| bad(e.to_string()))?;
        let parts_count = self
            .parts
            .ok_or_else(|| bad("missing parts".into()))?
            .to_bounded::<u32>("parts")
            .map_err(bad)?;
        let activation_block = self
            .block
            .ok_or_else(|| bad("missing block".into()))?
            .to_bounded::<u64>("block")
            .map_err(bad)?;
        let tge_percent = opt_bounded::<u8>(self.percent, "percent").map_err(bad)?;
        let cliff_parts = opt_bounded::<u32>(self.cliff, "cliff").map_err(bad)?;

        let schedule = VestingSchedule {
            address: address.clone(),
            total_amount,
            start_time,
            duration,
            parts_count,
            cliff_parts,
            tge_percent,
            activation_block,
            status: ScheduleStatus::Pending,
        };
        schedule.check_shape().map_err(bad)?;
        if schedule.end_time().is_none() {
            return Err(bad("start plus duration is out of range".into()));
        }
        Ok(schedule)
    }
}

fn opt_bounded<T: TryFrom<u128> + Default>(
    v: Option<LooseNumber>,
    field: &str,
) -> Result<T, String> {
    match v {
        Some(n) => n.to_bounded(field),
        None => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> RawScheduleRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn strips_address_decoration() {
        let a = Address::from_wrapped("Address(wif=unigrid1k3xsk7muy8738hteg94de6ynde0v0af9tgptx0)");
        assert_eq!(a.as_str(), "unigrid1k3xsk7muy8738hteg94de6ynde0v0af9tgptx0");
        assert_eq!(Address::from_wrapped("plain1abc").as_str(), "plain1abc");
    }

    #[test]
    fn accepts_loosely_typed_fields() {
        let r = record(
            r#"{"amount":"1000000","start":"2023-08-29T16:53:46Z","duration":"PT3H",
                "parts":5.0,"block":"120","percent":3,"cliff":1}"#,
        );
        let s = r.into_schedule(Address::new("addr1")).unwrap();
        assert_eq!(s.total_amount, 1_000_000);
        assert_eq!(s.duration, Duration::from_secs(3 * 3600));
        assert_eq!(s.parts_count, 5);
        assert_eq!(s.activation_block, 120);
        assert_eq!(s.tge_percent, 3);
        assert_eq!(s.cliff_parts, 1);
        assert_eq!(s.status, ScheduleStatus::Pending);
    }

    #[test]
    fn optional_fields_default_to_zero() {
        let r = record(r#"{"amount":10,"start":"2023-08-29T16:53:46Z","duration":"PT1M","parts":2,"block":9}"#);
        let s = r.into_schedule(Address::new("addr1")).unwrap();
        assert_eq!(s.activation_block, 9);
        assert_eq!((s.tge_percent, s.cliff_parts), (0, 0));
    }

    #[test]
    fn missing_block_is_a_record_error() {
        let r = record(r#"{"amount":10,"start":"2023-08-29T16:53:46Z","duration":"PT1M","parts":2}"#);
        let err = r.into_schedule(Address::new("addr1")).unwrap_err();
        assert_eq!(err.address, "addr1");
        assert!(err.reason.contains("missing block"), "{}", err.reason);

        let r = record(r#"{"amount":10,"start":"2023-08-29T16:53:46Z","duration":"PT1M","parts":2,"block":-1}"#);
        assert!(r.into_schedule(Address::new("addr1")).is_err());
    }

    #[test]
    fn malformed_duration_is_a_record_error() {
        let r = record(r#"{"amount":10,"start":"2023-08-29T16:53:46Z","duration":"3 hours","parts":2}"#);
        let err = r.into_schedule(Address::new("addr1")).unwrap_err();
        assert_eq!(err.address, "addr1");
        assert!(err.reason.contains("duration"), "{}", err.reason);
    }

    #[test]
    fn rejects_bad_shapes() {
        let base = r#""start":"2023-08-29T16:53:46Z","duration":"PT1M","block":1"#;
        for body in [
            format!(r#"{{"amount":10,{base},"parts":0}}"#),
            format!(r#"{{"amount":10,{base},"parts":3,"cliff":3}}"#),
            format!(r#"{{"amount":10,{base},"parts":3,"percent":101}}"#),
            format!(r#"{{"amount":-10,{base},"parts":3}}"#),
            format!(r#"{{"amount":1.5,{base},"parts":3}}"#),
            format!(r#"{{"amount":10,{base}}}"#),
            format!(r#"{{"amount":10,"duration":"PT1M","parts":3,"block":1}}"#),
        ] {
            assert!(record(&body).into_schedule(Address::new("a")).is_err(), "{body}");
        }
    }

    #[test]
    fn digest_ignores_status_but_not_content() {
        let r = record(r#"{"amount":10,"start":"2023-08-29T16:53:46Z","duration":"PT1M","parts":2,"block":1}"#);
        let s = r.into_schedule(Address::new("a")).unwrap();
        let mut activated = s.clone();
        activated.status = ScheduleStatus::Activated { height: 4 };
        assert_eq!(s.digest(), activated.digest());

        let mut changed = s.clone();
        changed.total_amount += 1;
        assert_ne!(s.digest(), changed.digest());
    }

    #[test]
    fn status_serializes_tagged() {
        let json = serde_json::to_string(&ScheduleStatus::Activated { height: 7 }).unwrap();
        assert_eq!(json, r#"{"state":"activated","height":7}"#);
        assert!(!ScheduleStatus::Pending.is_processed());
        assert!(ScheduleStatus::Rejected { reason: "x".into() }.is_processed());
    }
}
