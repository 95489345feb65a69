//! `stockledger-core`: identifiers, versions and the domain error shared by
//! every other crate. No IO lives here.

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{MovementId, ProductId, TransferId, WarehouseId};
pub use version::ExpectedVersion;
