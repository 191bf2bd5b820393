//! Visit booking domain: time slots, overlap detection and who may move a
//! booking through its lifecycle.

pub mod booking;
pub mod slot;

pub use booking::{
    Booking, BookingCancelled, BookingCommand, BookingConfirmed, BookingEvent, BookingRequested,
    BookingStatus, CancelActor, ensure_no_overlap,
};
pub use slot::TimeSlot;
