pub mod phone;
pub mod signature;
pub mod time;
