pub mod address;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use address::{Address, AddressKind};
pub use crypto::{verify, verify_hash, KeyPair, PrivateKey, PublicKey, SignatureAlgorithm};
pub use error::{NodeError, OfferFault};
pub use hash::{hexbytes, Hash256};
pub use types::*;

pub type Result<T> = std::result::Result<T, NodeError>;
