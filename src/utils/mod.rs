pub mod config_store;
pub mod line_ending_handler;
pub mod path_utils;
pub mod utf8_stream;
