pub mod store;

pub use store::{Message, Role, Session, SessionStore};
