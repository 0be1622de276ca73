pub mod lockouts;
pub mod metrics;
pub mod revocations;
pub mod services;
pub mod translations;
