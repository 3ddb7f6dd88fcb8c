//! Kestrel operator
//!
//! Sequences deposits and transfers into batches, proves each batch's state
//! transition and settles it against the settlement contract's root.

pub mod config;
pub mod sequencer;
