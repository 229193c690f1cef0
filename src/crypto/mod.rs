//! Crypto Module - Ed25519 Geräte-Identität
//!
//! Dieses Modul verwaltet die kryptographische Identität des Geräts:
//! - Generierung eines Ed25519 Schlüsselpaars beim ersten Start
//! - Persistente Speicherung des Private Keys im Datenverzeichnis
//! - Versiegeln (Timestamp + Signatur) ausgehender Signaling-Frames
//!

mod keypair;

pub use keypair::{verify_sealed, KeyPair, KeyPairError};
