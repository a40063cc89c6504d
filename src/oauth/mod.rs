//! Authorization-code flow with a loopback callback, plus token refresh.

pub mod authorize;
pub mod callback_server;
pub mod refresh;
pub mod token_exchange;
