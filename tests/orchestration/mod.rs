pub mod distributed_lock;
pub mod graph_resolver;
pub mod retention;
