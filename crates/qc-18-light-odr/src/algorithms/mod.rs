//! # Algorithms Module
//!
//! Pure scoring and scheduling math used by the application services.

pub mod backoff;
pub mod decay;
pub mod selection;

pub use backoff::{adaptive_timeout, dial_backoff, response_quality};
pub use decay::{DecayAccumulator, DecaySet};
pub use selection::{select_best, Candidate};
