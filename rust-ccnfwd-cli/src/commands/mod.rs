pub mod bench;
pub mod replay;
pub mod show_config;
