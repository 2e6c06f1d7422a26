#[cfg(test)]
#[macro_use]
mod test_macros;

pub mod channels;
pub mod config;
pub mod epg;
pub mod error;
pub mod file_util;
pub mod models;
pub mod si;
pub mod tracing_ext;
pub mod tuned_file;
pub mod videodir;
