//! Hand-gesture mouse and keyboard control from webcam hand landmarks.
//!
//! Each frame flows capture → landmarks → features → gesture decoding →
//! input injection inside a [`session::Session`]. The session ends with a
//! [`session::SessionOutcome`] for the supervisor to act on.

pub mod action;
pub mod capture;
pub mod config;
pub mod debounce;
pub mod features;
pub mod gesture;
pub mod input;
pub mod landmarks;
pub mod levels;
pub mod liveness;
pub mod session;
pub mod trace;
