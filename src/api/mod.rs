pub mod etcdstore;
pub mod store;
pub mod types;
