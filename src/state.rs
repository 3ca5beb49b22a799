use crate::config::Config;
use crate::ids::IdGenerator;
use crate::store::RoomStore;
use crate::ws::Hub;
use std::sync::Arc;

/// Shared handles threaded through the router.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub store: Arc<dyn RoomStore>,
    pub hub: Arc<Hub>,
    pub ids: Arc<IdGenerator>,
}
