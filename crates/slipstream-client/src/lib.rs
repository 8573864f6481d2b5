//! Client-side synchronization for Slipstream.
//!
//! No rendering or transport lives here: the host feeds key events and
//! received frames in, calls [`session::RaceSession::update`] once per render
//! frame, sends whatever it returns and draws the poses it exposes.

pub mod abilities;
pub mod clock;
pub mod config;
pub mod correction;
pub mod input;
pub mod interpolation;
pub mod net_client;
pub mod prediction;
pub mod sequencer;
pub mod session;

pub use config::ClientConfig;
pub use session::RaceSession;
