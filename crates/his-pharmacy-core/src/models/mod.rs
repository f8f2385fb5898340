//! Domain models for the pharmacy and billing core.

mod billing;
mod clinical;
mod inventory;
mod prescription;

pub use billing::*;
pub use clinical::*;
pub use inventory::*;
pub use prescription::*;
