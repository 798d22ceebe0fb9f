// ABOUTME: Service adapters bundled with the binary.

pub mod http;

pub use http::HttpAdapter;
