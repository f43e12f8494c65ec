//! The clock driver: a task that toggles a single-bit signal forever.

use crate::common::SignalId;
use crate::components::task::{Process, Step};
use crate::context::Context;
use crate::error::{SimError, SimResult};
use crate::trigger::{after, Wake};

/// Drives `signal` with a fixed period.
///
/// The high half is `period / 2` ticks and the low half takes the rest, so
/// odd periods are allowed. The clock stops only when its task is cancelled.
#[derive(Debug, Clone)]
pub struct Clock {
    signal: SignalId,
    high: u64,
    low: u64,
    level: bool,
}

impl Clock {
    /// Creates a clock for `signal` with a period of `period` ticks.
    pub fn new(signal: SignalId, period: u64, start_high: bool) -> SimResult<Self> {
        if period < 2 {
            return Err(SimError::InvalidClockPeriod { period });
        }
        let high = period / 2;
        Ok(Self {
            signal,
            high,
            low: period - high,
            level: start_high,
        })
    }

    pub fn period(&self) -> u64 {
        self.high + self.low
    }

    pub fn signal(&self) -> SignalId {
        self.signal
    }
}

impl Process for Clock {
    fn resume(&mut self, cx: &mut Context<'_>, wake: Wake) -> anyhow::Result<Step> {
        if wake != Wake::Start {
            self.level = !self.level;
        }
        cx.write(self.signal, self.level)?;
        let half = if self.level { self.high } else { self.low };
        Ok(Step::Wait(after(half)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn signal() -> SignalId {
        let mut ids: SlotMap<SignalId, ()> = SlotMap::with_key();
        ids.insert(())
    }

    #[test]
    fn test_period_split() {
        let clock = Clock::new(signal(), 1000, true).unwrap();
        assert_eq!((clock.high, clock.low), (500, 500));
        let odd = Clock::new(signal(), 5, false).unwrap();
        assert_eq!((odd.high, odd.low), (2, 3));
        assert_eq!(odd.period(), 5);
    }

    #[test]
    fn test_too_short_period() {
        assert!(matches!(
            Clock::new(signal(), 1, true),
            Err(SimError::InvalidClockPeriod { period: 1 })
        ));
    }
}
