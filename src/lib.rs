pub mod des;
pub mod error;
pub mod leakage;
pub mod pcc;
pub mod simulate;
pub mod ta;
pub mod tools;

pub use error::{Error, Result};
