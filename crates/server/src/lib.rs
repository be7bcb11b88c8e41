pub mod ledger;
pub mod registry;
pub mod server;

pub use ledger::{CompletedResult, Ledger, Lookup};
pub use registry::{Connection, Registry};
pub use server::{AwaitOutcome, RelayServer};
