pub mod prover;
pub mod settler;

pub use prover::{ProveRequest, ProverService, build_public_inputs, build_witness};
pub use settler::{Settler, SettlerConfig};
