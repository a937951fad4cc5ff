pub mod replay;
pub mod speeds;
pub mod validate;
