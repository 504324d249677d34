pub mod event;
pub mod payment;
pub mod promo;
pub mod reservation;
pub mod ticket;
pub mod user;
pub mod waitlist;

pub use event::{Event, EventStatus};
pub use payment::{Payment, PaymentOutcome, PaymentStatus};
pub use promo::{DiscountQuote, DiscountType, PromoCode};
pub use reservation::{Reservation, ReservationState};
pub use ticket::{Ticket, TicketStatus};
pub use user::User;
pub use waitlist::{WaitlistEntry, WaitlistState};
