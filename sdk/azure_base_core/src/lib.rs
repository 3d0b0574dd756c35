#![doc = include_str!("../README.md")]

pub mod cloud;
pub mod credentials;
pub mod error;
pub mod token;

pub use error::{Error, HttpError, Result};
