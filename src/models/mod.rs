pub mod amenity;
pub mod booking;
pub mod pass;
pub mod requester;

pub use amenity::AmenityInfo;
pub use booking::{Booking, BookingStatus, DisplayStatus};
pub use pass::{
    AccessPass, BookingDetails, DayBookingContext, PassData, PassPayload, PassStatus,
    DEFAULT_GRACE_MINUTES, PASS_TYPE, PASS_VERSION,
};
pub use requester::{Requester, Role};
