pub mod library;
pub mod quick_access;
pub mod recent;
pub mod watch;
