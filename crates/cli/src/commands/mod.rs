pub mod history;
pub mod watch;
