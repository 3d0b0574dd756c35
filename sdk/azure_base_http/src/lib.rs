#![doc = include_str!("../README.md")]

pub mod client;
pub mod policy;
pub mod request;
pub mod response;

pub use client::{Client, ClientBuilder, StreamEvent, StreamHandle};
pub use request::{Body, Method, Request};
pub use response::{Response, ResponseBody};
