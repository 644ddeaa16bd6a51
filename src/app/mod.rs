pub mod controller;
pub mod session;
pub mod token_cache;

pub use controller::{AppController, ConfigOverrides};
pub use session::{Ack, SessionController, SessionSettings};
pub use token_cache::TokenCache;
