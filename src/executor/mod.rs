pub mod coordinator;
pub mod dispatcher;
