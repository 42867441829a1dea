//! Event-triggered handlers of the pipeline.
//!
//! Each handler performs one parse-validate-call sequence and owns its own
//! failure policy: ingestion fails its whole batch (so the queue redelivers
//! and eventually dead-letters), while the confirmation, rejection, and
//! update handlers catch per record and continue.

pub mod confirmation;
pub mod ingest;
pub mod rejection;
pub mod update;

pub use confirmation::ConfirmationHandler;
pub use ingest::IngestHandler;
pub use rejection::RejectionHandler;
pub use update::UpdateHandler;
