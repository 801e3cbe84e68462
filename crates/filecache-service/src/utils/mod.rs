pub mod http;
pub mod mime;
