use std::sync::Arc;

use crate::{auth::Directory, bus::EventBus, config::Config};

#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<EventBus>,
    pub directory: Arc<dyn Directory>,
    pub config: Arc<Config>,
}
