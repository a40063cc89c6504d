pub mod client;
pub mod comments;
pub mod pages;
