pub mod authorization_state;
pub mod token_bundle;
