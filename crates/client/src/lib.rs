// fieldsync-client: keeps a local copy of a collaboratively edited document
// in sync with the server of record.
//
// The `CollabStore` is the only writer of document state. A `CollabSession`
// owns the store and a `ConnectionManager` on one task and feeds both from
// bounded channels.

pub mod awareness;
pub mod comments;
pub mod config;
pub mod connection;
pub mod error;
pub mod session;
pub mod store;
pub mod throttle;
pub mod transport;

pub use config::ClientConfig;
pub use connection::{
    ConnectionManager, ConnectionState, Connector, HttpConnector, TransportPreference,
};
pub use error::{ConnectionError, ErrorCategory, SessionError, StoreError};
pub use session::{CollabSession, SessionSnapshot};
pub use store::{CollabStore, EditIntent, StoreSnapshot};
