pub mod aggregator;
pub mod config;
pub mod deadline;
pub mod draft;
pub mod error;
pub mod model;
pub mod notify;
pub mod service;
pub mod status;
pub mod store;
pub mod utils;

pub use error::{EngineError, ErrorKind};
pub use service::{HelpService, RequestCreate, TransitionRequest};
pub use status::{EventStatus, TransactionStatus};
pub use store::{SledStore, Store, UnitOfWork};
