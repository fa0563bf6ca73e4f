pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod server;

pub use error::PythiaError;
