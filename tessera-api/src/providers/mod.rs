pub mod stripe;
pub mod windcave;

pub use stripe::StripeAdapter;
pub use windcave::WindcaveAdapter;
