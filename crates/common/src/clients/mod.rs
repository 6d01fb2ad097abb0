//! HTTP and object-storage clients for downstream systems

mod edi;
mod piq;
mod storage;

pub use edi::EdiClient;
pub use piq::{signed_filename, ContainerJob, InvoiceContainerRequest, PiqClient, SignedUpload};
pub use storage::ArtifactStore;
