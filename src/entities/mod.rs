// Entity Models
//
// A RawCandidate is what a source adapter saw; an EntityRecord is what the
// pipeline believes. Candidates are ephemeral, records are the canonical
// aggregate that the merger owns during a run and the repository owns after.

pub mod candidate;
pub mod record;

pub use candidate::RawCandidate;
pub use record::{
    AnnualFee, CategoryReward, EntityRecord, LimitPeriod, RewardCurrency, RewardRate, RewardUnit,
    SignupBonus, SpendCategory, SpendLimit, GENERIC_PROGRAM, UNKNOWN_ISSUER,
};
