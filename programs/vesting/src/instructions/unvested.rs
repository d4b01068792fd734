use chrono::{DateTime, Utc};

use crate::state::VestingSchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VestingPhase {
    /// `now <= start`: nothing is locked yet.
    NotStarted,
    Vesting,
    /// `now >= start + duration`.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VestingQuote {
    pub phase: VestingPhase,
    pub total: u128,
    pub parts_elapsed: u128,
    pub vested: u128,
    pub unvested: u128,
}

/// Amount still locked under `schedule` at `now`.
pub fn unvested_amount(schedule: &VestingSchedule, now: DateTime<Utc>) -> u128 {
    quote(schedule, now).unvested
}

/// Installment-granular position of `schedule` at `now`.
///
/// A zero part count is treated as a single installment so a malformed
/// schedule locks its whole amount instead of dividing by zero.
pub fn quote(schedule: &VestingSchedule, now: DateTime<Utc>) -> VestingQuote {
    let total = schedule.total_amount;
    let parts = u128::from(schedule.parts_count.max(1));

    let elapsed = match (now - schedule.start_time).to_std() {
        Ok(e) if !e.is_zero() => e,
        _ => {
            return VestingQuote {
                phase: VestingPhase::NotStarted,
                total,
                parts_elapsed: 0,
                vested: 0,
                unvested: 0,
            }
        }
    };

    let complete = match schedule.end_time() {
        Some(end) => now >= end,
        None => false,
    };
    if complete {
        return VestingQuote {
            phase: VestingPhase::Complete,
            total,
            parts_elapsed: parts,
            vested: total,
            unvested: 0,
        };
    }

    let part_nanos = schedule.duration.as_nanos() / parts;
    let parts_elapsed = if part_nanos == 0 {
        parts
    } else {
        (elapsed.as_nanos() / part_nanos).min(parts)
    };
    // parts_elapsed <= parts, so this never exceeds total.
    let vested = (total / parts) * parts_elapsed;

    VestingQuote {
        phase: VestingPhase::Vesting,
        total,
        parts_elapsed,
        vested,
        unvested: total - vested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Address, ScheduleStatus};
    use chrono::Duration as ChronoDuration;
    use proptest::prelude::*;
    use std::time::Duration;

    fn schedule(amount: u128, secs: u64, parts: u32) -> VestingSchedule {
        VestingSchedule {
            address: Address::new("addr1"),
            total_amount: amount,
            start_time: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            duration: Duration::from_secs(secs),
            parts_count: parts,
            cliff_parts: 0,
            tge_percent: 0,
            activation_block: 0,
            status: ScheduleStatus::Pending,
        }
    }

    #[test]
    fn four_of_ten_parts_elapsed() {
        let s = schedule(1000, 600, 10);
        let now = s.start_time + ChronoDuration::minutes(4);
        assert_eq!(unvested_amount(&s, now), 600);
        let q = quote(&s, now);
        assert_eq!((q.phase, q.parts_elapsed, q.vested), (VestingPhase::Vesting, 4, 400));
    }

    #[test]
    fn zero_before_start_and_at_start() {
        let s = schedule(1000, 600, 10);
        assert_eq!(unvested_amount(&s, s.start_time - ChronoDuration::minutes(1)), 0);
        assert_eq!(unvested_amount(&s, s.start_time), 0);
        assert_eq!(quote(&s, s.start_time).phase, VestingPhase::NotStarted);
    }

    #[test]
    fn zero_at_and_after_end() {
        let s = schedule(1000, 600, 10);
        let end = s.start_time + ChronoDuration::minutes(10);
        assert_eq!(unvested_amount(&s, end), 0);
        assert_eq!(unvested_amount(&s, end + ChronoDuration::milliseconds(1)), 0);
        assert_eq!(unvested_amount(&s, end - ChronoDuration::milliseconds(1)), 100);
    }

    #[test]
    fn fully_locked_right_after_start() {
        let s = schedule(1000, 600, 10);
        assert_eq!(unvested_amount(&s, s.start_time + ChronoDuration::nanoseconds(1)), 1000);
    }

    #[test]
    fn instant_schedule_is_never_locked() {
        let s = schedule(1000, 0, 10);
        assert_eq!(unvested_amount(&s, s.start_time + ChronoDuration::nanoseconds(1)), 0);
    }

    #[test]
    fn truncated_part_amount_keeps_remainder_locked() {
        // 1001 / 10 = 100 per part; the 1-unit remainder unlocks only at the end.
        let s = schedule(1001, 600, 10);
        let now = s.start_time + ChronoDuration::seconds(599);
        assert_eq!(unvested_amount(&s, now), 101);
    }

    #[test]
    fn zero_parts_locks_everything_until_end() {
        let s = schedule(1000, 600, 0);
        assert_eq!(unvested_amount(&s, s.start_time + ChronoDuration::seconds(599)), 1000);
    }

    proptest! {
        #[test]
        fn non_increasing_after_start(
            amount in 0u128..1_000_000_000_000u128,
            secs in 1u64..10_000_000,
            parts in 1u32..500,
            a in 1i64..20_000_000,
            b in 1i64..20_000_000,
        ) {
            prop_assume!(secs >= u64::from(parts));
            let s = schedule(amount, secs, parts);
            let (early, late) = if a <= b { (a, b) } else { (b, a) };
            let u1 = unvested_amount(&s, s.start_time + ChronoDuration::seconds(early));
            let u2 = unvested_amount(&s, s.start_time + ChronoDuration::seconds(late));
            prop_assert!(u1 >= u2);
            prop_assert!(u1 <= amount);
            let after_end = s.start_time + ChronoDuration::seconds(secs as i64 + late);
            prop_assert_eq!(unvested_amount(&s, after_end), 0);
        }
    }
}
