//! Identity and session lifecycle.
//!
//! [`SessionService`] is the entry point; the remaining modules are the
//! building blocks it composes and are public for callers that need one piece
//! on its own.

pub mod access_token;
pub mod credentials;
pub mod error;
pub mod linker;
pub mod memory;
pub mod model;
pub mod password;
pub mod postgres;
pub mod principal;
pub mod refresh_token;
pub mod session;
pub mod store;
pub mod unique_name;
mod utils;
pub mod version;

pub use access_token::AccessTokenCodec;
pub use credentials::CredentialVerifier;
pub use error::{AuthError, Constraint, StoreError};
pub use linker::{IdentityLinker, ProviderIdentity};
pub use memory::MemoryStore;
pub use model::{DecodedAccessClaims, NewUser, ProfileUpdate, ProviderAccountLink, RefreshToken, User};
pub use password::{Argon2Hasher, PasswordHasher};
pub use postgres::PgStore;
pub use principal::{Identity, Principal, RequestIdentity, TokenRejection};
pub use refresh_token::{IssuedRefreshToken, RefreshTokenStore};
pub use session::{LoginOutcome, RefreshOutcome, Registration, SessionConfig, SessionService};
pub use store::{Clock, FixedClock, Stores, SystemClock};
pub use version::TokenVersionGuard;
