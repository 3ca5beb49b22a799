pub mod hub;
pub mod protocol;
pub mod session;
pub mod snapshot;

pub use hub::Hub;
pub use session::Session;
pub use snapshot::StateFolder;
