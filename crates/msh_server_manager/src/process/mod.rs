pub mod manager;
pub mod provider;
pub mod tree;
