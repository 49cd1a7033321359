pub mod metaapi;

pub use metaapi::{MetaApiClient, MetaApiConfig};
