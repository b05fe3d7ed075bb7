//! Timelock schedules for both escrow legs
//!
//! Durations are offsets in seconds from the escrow's deployment time, which
//! the chain sets. The packed form matches the escrow factory's `TimelocksLib`:
//! stage `i` occupies bits `[32*i, 32*i + 32)` and `deployedAt` the top 32 bits.

use super::Leg;
use crate::error::{ResolverError, ResolverResult};

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

const DEPLOYED_AT_OFFSET: usize = 224;
const STAGE_MASK: u64 = 0xffff_ffff;

/// Timelock stages in packing order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SrcWithdrawal = 0,
    SrcPublicWithdrawal = 1,
    SrcCancellation = 2,
    SrcPublicCancellation = 3,
    DstWithdrawal = 4,
    DstPublicWithdrawal = 5,
    DstCancellation = 6,
}

impl Stage {
    fn shift(self) -> usize {
        self as usize * 32
    }
}

/// Raw per-leg duration parameters, as read from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Durations {
    pub withdrawal: u32,
    pub public_withdrawal: u32,
    pub cancellation: u32,
    #[serde(default)]
    pub public_cancellation: Option<u32>,
}

/// What an escrow permits at a given moment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Window {
    /// Finality lock: nothing is allowed yet
    Locked,
    PrivateWithdrawal,
    PublicWithdrawal,
    PrivateCancellation,
    PublicCancellation,
}

impl Window {
    pub fn allows_withdrawal(self) -> bool {
        matches!(self, Window::PrivateWithdrawal | Window::PublicWithdrawal)
    }

    pub fn allows_cancellation(self) -> bool {
        matches!(self, Window::PrivateCancellation | Window::PublicCancellation)
    }
}

/// Validated schedule for one leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLockSchedule {
    leg: Leg,
    withdrawal: u32,
    public_withdrawal: u32,
    cancellation: u32,
    public_cancellation: Option<u32>,
}

impl TimeLockSchedule {
    /// Validate durations for a leg, rejecting any ordering that could let
    /// cancellation race withdrawal.
    pub fn build(leg: Leg, durations: &Durations) -> ResolverResult<Self> {
        let invalid = |reason: String| ResolverError::InvalidSchedule { leg, reason };

        if durations.withdrawal >= durations.public_withdrawal {
            return Err(invalid(format!(
                "withdrawal ({}) must precede public withdrawal ({})",
                durations.withdrawal, durations.public_withdrawal
            )));
        }

        match leg {
            Leg::Source => {
                if durations.cancellation <= durations.public_withdrawal {
                    return Err(invalid(format!(
                        "cancellation ({}) must come after public withdrawal ({})",
                        durations.cancellation, durations.public_withdrawal
                    )));
                }
                let public_cancellation = durations.public_cancellation.ok_or_else(|| {
                    invalid("source leg requires a public cancellation offset".to_string())
                })?;
                if public_cancellation <= durations.cancellation {
                    return Err(invalid(format!(
                        "public cancellation ({}) must come after cancellation ({})",
                        public_cancellation, durations.cancellation
                    )));
                }
            }
            Leg::Destination => {
                if durations.cancellation < durations.public_withdrawal {
                    return Err(invalid(format!(
                        "cancellation ({}) cannot precede public withdrawal ({})",
                        durations.cancellation, durations.public_withdrawal
                    )));
                }
                if let Some(public_cancellation) = durations.public_cancellation {
                    if public_cancellation <= durations.cancellation {
                        return Err(invalid(format!(
                            "public cancellation ({}) must come after cancellation ({})",
                            public_cancellation, durations.cancellation
                        )));
                    }
                }
            }
        }

        Ok(Self {
            leg,
            withdrawal: durations.withdrawal,
            public_withdrawal: durations.public_withdrawal,
            cancellation: durations.cancellation,
            public_cancellation: durations.public_cancellation,
        })
    }

    pub fn leg(&self) -> Leg {
        self.leg
    }

    pub fn withdrawal(&self) -> u32 {
        self.withdrawal
    }

    pub fn public_withdrawal(&self) -> u32 {
        self.public_withdrawal
    }

    pub fn cancellation(&self) -> u32 {
        self.cancellation
    }

    pub fn public_cancellation(&self) -> Option<u32> {
        self.public_cancellation
    }

    pub fn durations(&self) -> Durations {
        Durations {
            withdrawal: self.withdrawal,
            public_withdrawal: self.public_withdrawal,
            cancellation: self.cancellation,
            public_cancellation: self.public_cancellation,
        }
    }

    /// Window in force `elapsed` seconds after deployment
    pub fn window_at(&self, elapsed: u64) -> Window {
        if let Some(public_cancellation) = self.public_cancellation {
            if elapsed >= public_cancellation as u64 {
                return Window::PublicCancellation;
            }
        }
        if elapsed >= self.cancellation as u64 {
            Window::PrivateCancellation
        } else if elapsed >= self.public_withdrawal as u64 {
            Window::PublicWithdrawal
        } else if elapsed >= self.withdrawal as u64 {
            Window::PrivateWithdrawal
        } else {
            Window::Locked
        }
    }

    pub fn withdrawal_opens_at(&self, deployed_at: u64) -> u64 {
        deployed_at + self.withdrawal as u64
    }

    pub fn cancellation_starts_at(&self, deployed_at: u64) -> u64 {
        deployed_at + self.cancellation as u64
    }
}

/// Both legs' schedules, carried inside every escrow's immutables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLocks {
    src: TimeLockSchedule,
    dst: TimeLockSchedule,
    deployed_at: Option<u32>,
}

impl TimeLocks {
    pub fn new(src: TimeLockSchedule, dst: TimeLockSchedule) -> ResolverResult<Self> {
        if src.leg != Leg::Source || dst.leg != Leg::Destination {
            return Err(ResolverError::InvalidSchedule {
                leg: src.leg,
                reason: "schedules passed for the wrong legs".to_string(),
            });
        }
        // The resolver must be able to reclaim the destination deposit before
        // the maker can reclaim the source funds.
        if dst.cancellation > src.cancellation {
            return Err(ResolverError::InvalidSchedule {
                leg: Leg::Destination,
                reason: format!(
                    "destination cancellation ({}) after source cancellation ({})",
                    dst.cancellation, src.cancellation
                ),
            });
        }
        Ok(Self {
            src,
            dst,
            deployed_at: None,
        })
    }

    /// Build and validate both legs from raw durations
    pub fn build(src: &Durations, dst: &Durations) -> ResolverResult<Self> {
        let src = TimeLockSchedule::build(Leg::Source, src)?;
        let dst = TimeLockSchedule::build(Leg::Destination, dst)?;
        Self::new(src, dst)
    }

    pub fn src(&self) -> &TimeLockSchedule {
        &self.src
    }

    pub fn dst(&self) -> &TimeLockSchedule {
        &self.dst
    }

    pub fn for_leg(&self, leg: Leg) -> &TimeLockSchedule {
        match leg {
            Leg::Source => &self.src,
            Leg::Destination => &self.dst,
        }
    }

    pub fn deployed_at(&self) -> Option<u32> {
        self.deployed_at
    }

    /// Copy with the chain-assigned deployment timestamp filled in
    pub fn with_deployed_at(&self, deployed_at: u32) -> Self {
        Self {
            deployed_at: Some(deployed_at),
            ..*self
        }
    }

    /// Pack into the factory's 256-bit word
    pub fn pack(&self) -> U256 {
        let stages = [
            (Stage::SrcWithdrawal, self.src.withdrawal),
            (Stage::SrcPublicWithdrawal, self.src.public_withdrawal),
            (Stage::SrcCancellation, self.src.cancellation),
            (
                Stage::SrcPublicCancellation,
                self.src.public_cancellation.unwrap_or_default(),
            ),
            (Stage::DstWithdrawal, self.dst.withdrawal),
            (Stage::DstPublicWithdrawal, self.dst.public_withdrawal),
            (Stage::DstCancellation, self.dst.cancellation),
        ];

        let mut packed = stages.iter().fold(U256::ZERO, |acc, (stage, value)| {
            acc | (U256::from(*value) << stage.shift())
        });
        if let Some(deployed_at) = self.deployed_at {
            packed |= U256::from(deployed_at) << DEPLOYED_AT_OFFSET;
        }
        packed
    }

    /// Unpack a factory word, re-validating the ordering
    pub fn unpack(packed: U256) -> ResolverResult<Self> {
        let stage = |s: Stage| -> u32 { ((packed >> s.shift()) & U256::from(STAGE_MASK)).to::<u32>() };
        let deployed_at = ((packed >> DEPLOYED_AT_OFFSET) & U256::from(STAGE_MASK)).to::<u32>();

        let src = Durations {
            withdrawal: stage(Stage::SrcWithdrawal),
            public_withdrawal: stage(Stage::SrcPublicWithdrawal),
            cancellation: stage(Stage::SrcCancellation),
            public_cancellation: Some(stage(Stage::SrcPublicCancellation)),
        };
        let dst = Durations {
            withdrawal: stage(Stage::DstWithdrawal),
            public_withdrawal: stage(Stage::DstPublicWithdrawal),
            cancellation: stage(Stage::DstCancellation),
            public_cancellation: None,
        };

        let timelocks = Self::build(&src, &dst)?;
        Ok(if deployed_at == 0 {
            timelocks
        } else {
            timelocks.with_deployed_at(deployed_at)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src_durations() -> Durations {
        Durations {
            withdrawal: 20,
            public_withdrawal: 480,
            cancellation: 600,
            public_cancellation: Some(1200),
        }
    }

    fn dst_durations() -> Durations {
        Durations {
            withdrawal: 10,
            public_withdrawal: 100,
            cancellation: 500,
            public_cancellation: None,
        }
    }

    #[test]
    fn test_valid_source_schedule_preserves_values() {
        let schedule = TimeLockSchedule::build(Leg::Source, &src_durations()).unwrap();
        assert_eq!(schedule.withdrawal(), 20);
        assert_eq!(schedule.public_withdrawal(), 480);
        assert_eq!(schedule.cancellation(), 600);
        assert_eq!(schedule.public_cancellation(), Some(1200));
        assert_eq!(schedule.durations(), src_durations());
    }

    #[test]
    fn test_withdrawal_after_public_withdrawal_rejected() {
        let durations = Durations {
            withdrawal: 500,
            ..src_durations()
        };
        let err = TimeLockSchedule::build(Leg::Source, &durations).unwrap_err();
        assert!(matches!(err, ResolverError::InvalidSchedule { leg: Leg::Source, .. }));
    }

    #[test]
    fn test_source_cancellation_must_follow_public_withdrawal() {
        let durations = Durations {
            cancellation: 480,
            ..src_durations()
        };
        assert!(TimeLockSchedule::build(Leg::Source, &durations).is_err());

        // Destination leg tolerates the boundary
        let durations = Durations {
            withdrawal: 10,
            public_withdrawal: 100,
            cancellation: 100,
            public_cancellation: None,
        };
        assert!(TimeLockSchedule::build(Leg::Destination, &durations).is_ok());
    }

    #[test]
    fn test_source_requires_public_cancellation() {
        let durations = Durations {
            public_cancellation: None,
            ..src_durations()
        };
        assert!(TimeLockSchedule::build(Leg::Source, &durations).is_err());
    }

    #[test]
    fn test_cross_leg_ordering() {
        let dst = Durations {
            cancellation: 700,
            ..dst_durations()
        };
        let err = TimeLocks::build(&src_durations(), &dst).unwrap_err();
        assert!(matches!(
            err,
            ResolverError::InvalidSchedule {
                leg: Leg::Destination,
                ..
            }
        ));
    }

    #[test]
    fn test_windows() {
        let schedule = TimeLockSchedule::build(Leg::Source, &src_durations()).unwrap();
        assert_eq!(schedule.window_at(0), Window::Locked);
        assert_eq!(schedule.window_at(19), Window::Locked);
        assert_eq!(schedule.window_at(20), Window::PrivateWithdrawal);
        assert_eq!(schedule.window_at(480), Window::PublicWithdrawal);
        assert_eq!(schedule.window_at(601), Window::PrivateCancellation);
        assert_eq!(schedule.window_at(1200), Window::PublicCancellation);
        assert!(!schedule.window_at(601).allows_withdrawal());
        assert!(schedule.window_at(601).allows_cancellation());
    }

    #[test]
    fn test_pack_layout() {
        let timelocks = TimeLocks::build(&src_durations(), &dst_durations())
            .unwrap()
            .with_deployed_at(1_700_000_000);
        let packed = timelocks.pack();

        assert_eq!(packed & U256::from(STAGE_MASK), U256::from(20u32));
        assert_eq!(
            (packed >> 64usize) & U256::from(STAGE_MASK),
            U256::from(600u32)
        );
        assert_eq!(packed >> 224usize, U256::from(1_700_000_000u32));

        let unpacked = TimeLocks::unpack(packed).unwrap();
        assert_eq!(unpacked, timelocks);
    }
}
