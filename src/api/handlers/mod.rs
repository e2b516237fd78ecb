pub mod admin;
pub mod health;
pub mod visitor;

pub use self::admin::{AdminToken, ADMIN_TOKEN_HEADER};
pub use self::health::health;
