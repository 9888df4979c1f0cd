use serde::{Deserialize, Serialize};

/// Descriptor record from the amenity catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmenityInfo {
    pub id: String,
    pub community_id: String,
    pub name: String,
    pub amenity_type: String,
    pub location: String,
    pub description: String,
}
