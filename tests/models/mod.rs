//! Store tests using SQLx native testing for automatic database isolation.

pub mod attribute;
pub mod process_graph;
pub mod process_log;
