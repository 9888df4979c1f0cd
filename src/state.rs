use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::services::catalog::AmenityCatalog;
use crate::services::notifications::NotificationProvider;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub catalog: Box<dyn AmenityCatalog>,
    pub notifier: Box<dyn NotificationProvider>,
    /// Ticked after every booking/pass mutation; feed subscribers reload
    /// their snapshot on each tick.
    pub feed_tx: broadcast::Sender<()>,
}
