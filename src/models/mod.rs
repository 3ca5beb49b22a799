pub mod error;
pub mod health;
pub mod room;
pub mod rooms_api;

pub use error::*;
pub use health::*;
pub use room::*;
pub use rooms_api::*;
