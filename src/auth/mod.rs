//! Authentication primitives: password hashing, bearer tokens, principals.
pub mod jwt;
pub mod password;
pub mod principal;

pub use jwt::{Claims, IssuedToken, JwtError, JwtService};
pub use password::{PasswordError, Policy};
pub use principal::Principal;
