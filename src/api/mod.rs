pub mod hls;
pub mod rest;
pub mod websocket;

pub use rest::router;
