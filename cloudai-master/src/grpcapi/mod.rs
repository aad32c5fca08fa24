pub mod master_control;
pub mod worker_client;
