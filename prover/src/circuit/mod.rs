//! Relations, checked in the clear.
//!
//! These are the statements a succinct backend would arithmetize. The
//! reference backend runs them directly before issuing a proof.

pub mod batch;
pub mod confidential;

pub use batch::check_batch;
pub use confidential::check_confidential;
