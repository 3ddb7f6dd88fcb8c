pub mod batch;
pub mod tx_router;

pub use batch::{BatchConfig, BatchManager, BatchManagerStats, SealedBatch, SubmitError};
pub use tx_router::{
    AppliedTransition, ApplyError, BatchExecution, RejectedTx, TransitionValidator, WorkingState,
};
