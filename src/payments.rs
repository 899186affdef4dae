//! Donation payments through the Pesapal gateway.

pub mod pesapal;
pub mod signature;

pub use pesapal::{DonationData, PaymentRequest, PaymentStatus, PesapalClient, IPN_ACKNOWLEDGEMENT};
