//! Export of bill statements and pending charges.

mod billing;

pub use billing::*;
