pub mod id;
pub mod token;

pub use id::prefixed_ulid;
pub use token::random_token;
