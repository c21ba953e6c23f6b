pub mod buffer;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod multipart;
pub mod request;
pub mod response;
pub mod scan;
pub mod security;
pub mod server;

pub use buffer::ByteWindow;
pub use config::IngestConfig;
pub use connection::{
    create_connection_slots, release_connection, ConnectionId, ConnectionState, ConnectionTable,
    Upload,
};
pub use error::IngestError;
pub use multipart::Boundary;
pub use request::{parse_query, parse_request_line, Method, QueryParam, RequestDescriptor};
pub use server::{start_server, ServeConfig};
