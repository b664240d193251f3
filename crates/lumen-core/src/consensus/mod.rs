pub mod checkpoint;
pub mod validator;

pub use checkpoint::*;
pub use validator::*;
