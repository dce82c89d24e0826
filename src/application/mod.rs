//! Process wiring: settings in, a bound server out

pub mod app;

pub use app::{Application, StartupInfo};
