use std::sync::Arc;

use application::RelayHub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RelayHub>,
}

impl AppState {
    pub fn new(hub: Arc<RelayHub>) -> Self {
        Self { hub }
    }
}
