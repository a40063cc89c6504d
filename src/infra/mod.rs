pub mod http;
pub(crate) mod secure_file;
pub mod settings;
pub mod state_store;
pub mod token_store;
