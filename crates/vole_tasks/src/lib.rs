pub mod habituation;
pub mod passive;
pub mod trialp;

pub use habituation::{HabituationOutcome, HabituationTask};
pub use passive::{run_passive, PassiveOptions, PassiveOutcome};
pub use trialp::{ActiveTrial, TrialParams};
