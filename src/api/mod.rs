pub mod parcels;
pub mod payments;
pub mod tracking;
pub mod users;
