//! This module contains the data models for the dispatch engine.

pub mod alert;
pub mod group;
pub mod labels;

pub use alert::Alert;
pub use group::{AlertGroup, FlushContext};
pub use labels::{Fingerprint, LabelSet};
