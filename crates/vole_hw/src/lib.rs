pub mod ambient;
pub mod controller;
pub mod display;
pub mod encoder;
pub mod messages;
pub mod sim;
pub mod sound;

pub use ambient::AmbientReading;
pub use controller::Controller;
pub use display::{NullDisplay, StimInfo, StimulusDisplay, UdpDisplay};
pub use encoder::RotaryEncoder;
pub use messages::MessageSet;
pub use sim::SimController;
pub use sound::{CueBuffer, SoftCode};
