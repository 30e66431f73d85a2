//! Energy and power scalars.
//!
//! Energy is tracked internally at microjoule precision because that is the
//! native resolution of every platform energy counter this crate reads
//! (powercap, MSR `RAPL_ENERGY_*`, BMC telemetry). Joules and watts are
//! derived only at the interfaces (`kepler-server`'s renderer, debug logs).

use std::ops::{Add, AddAssign};
use std::time::Duration;

/// Energy in microjoules, saturating on subtraction.
///
/// Saturating semantics exist so a single bad reading (clock glitch,
/// spurious backwards counter step) can never produce a negative delta that
/// would otherwise propagate as an invalid `Joules`/`Watts` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct MicroJoules(pub u64);

impl MicroJoules {
    pub const ZERO: MicroJoules = MicroJoules(0);

    pub fn saturating_sub(self, rhs: MicroJoules) -> MicroJoules {
        MicroJoules(self.0.saturating_sub(rhs.0))
    }

    pub fn saturating_add(self, rhs: MicroJoules) -> MicroJoules {
        MicroJoules(self.0.saturating_add(rhs.0))
    }

    /// Scale by a ratio in `[0, 1]`, rounding down. Used to split a zone's
    /// delta into active/idle and to distribute active energy across
    /// workloads by weight.
    pub fn scale(self, ratio: f64) -> MicroJoules {
        let ratio = ratio.clamp(0.0, 1.0);
        MicroJoules((self.0 as f64 * ratio) as u64)
    }

    pub fn as_joules(self) -> Joules {
        Joules(self.0 as f64 / 1_000_000.0)
    }

    /// Average power over `interval`. Returns `Watts(0.0)` for a zero or
    /// negative interval rather than dividing by zero.
    pub fn as_watts(self, interval: Duration) -> Watts {
        let secs = interval.as_secs_f64();
        if secs <= 0.0 {
            Watts(0.0)
        } else {
            Watts(self.as_joules().0 / secs)
        }
    }
}

impl Add for MicroJoules {
    type Output = MicroJoules;
    fn add(self, rhs: MicroJoules) -> MicroJoules {
        self.saturating_add(rhs)
    }
}

impl AddAssign for MicroJoules {
    fn add_assign(&mut self, rhs: MicroJoules) {
        *self = *self + rhs;
    }
}

/// Energy in joules, derived from [`MicroJoules`] only at interfaces.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Joules(pub f64);

/// Power in watts. Never stored as source of truth — always recomputed from
/// an energy delta and the interval it was measured over.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Watts(pub f64);
