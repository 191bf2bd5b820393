//! Payment domain: recorded funds transfers and their conversion into credits.

pub mod method;
pub mod payment;
pub mod reference;

pub use method::PaymentMethod;
pub use payment::{
    Payment, PaymentConfirmed, PaymentEvent, PaymentRecorded, PaymentStatus, credits_for,
};
pub use reference::PaymentReference;
