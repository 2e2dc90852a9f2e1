pub mod error;
pub mod paths;
pub mod settings;
pub mod sm;
pub mod trial;

pub use error::CoreError;
pub use paths::SessionPaths;
pub use settings::{RigConfig, TaskSettings, UserSettings};
pub use sm::{Condition, OutputAction, State, StateMachine, Target};
pub use trial::{TrialEvents, TrialRecord};
