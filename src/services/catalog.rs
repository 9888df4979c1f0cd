use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use crate::db::queries;
use crate::models::{AmenityInfo, Booking};

#[async_trait]
pub trait AmenityCatalog: Send + Sync {
    async fn lookup(&self, amenity_id: &str) -> anyhow::Result<Option<AmenityInfo>>;
}

pub struct DbCatalog {
    db: Arc<Mutex<Connection>>,
}

impl DbCatalog {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AmenityCatalog for DbCatalog {
    async fn lookup(&self, amenity_id: &str) -> anyhow::Result<Option<AmenityInfo>> {
        let db = self.db.lock().unwrap();
        queries::get_amenity(&db, amenity_id)
    }
}

/// Catalog lookups may fail or miss; the pass still needs a readable
/// descriptor, so fall back to the booking's denormalized fields and
/// generic defaults rather than an "unknown" placeholder.
pub fn resolve_descriptor(found: Option<AmenityInfo>, booking: &Booking) -> AmenityInfo {
    match found {
        Some(amenity) => amenity,
        None => {
            let name = if booking.amenity_name.trim().is_empty() {
                "Community amenity".to_string()
            } else {
                booking.amenity_name.clone()
            };
            let amenity_type = if booking.amenity_type.trim().is_empty() {
                "facility".to_string()
            } else {
                booking.amenity_type.clone()
            };
            AmenityInfo {
                id: booking.amenity_id.clone(),
                community_id: booking.community_id.clone(),
                description: format!("Reserved {name} session"),
                location: "Community grounds".to_string(),
                name,
                amenity_type,
            }
        }
    }
}
