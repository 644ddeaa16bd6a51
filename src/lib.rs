#![forbid(unsafe_code)]

//! Voice interaction session controller: record speech, send it to a remote
//! inference service, and speak the response back.

pub mod adapters;
pub mod app;
pub mod domain;
pub mod infrastructure;
pub mod ports;

pub use app::{Ack, AppController, ConfigOverrides, SessionController, SessionSettings, TokenCache};
pub use domain::{DomainError, ErrorKind, Phase, SessionEvent};
