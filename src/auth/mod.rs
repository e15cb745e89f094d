pub mod channel;
pub mod wegman_carter;

pub use channel::{AuthenticatedChannel, Frame, MemoryLink, Transport};
pub use wegman_carter::{generate_auth_tag, verify_auth_tag, AuthKey, ToeplitzAuthenticator, DEFAULT_TAG_BITS};
