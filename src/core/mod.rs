pub mod bus;
pub mod entity;
pub mod network;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod topic;
