//! Media Module - Abstraktion über den Echtzeit-Media-Stack
//!
//! Die Call-Engine kennt keine konkrete Media-Bibliothek. Sie spricht nur
//! mit dem `MediaTransport`-Trait:
//! - Lokales Audio/Video anfordern und freigeben
//! - Remote-Streams anhängen und lösen
//! - Tracks stummschalten, Kamera wechseln, neu aushandeln
//! - Link-Verlust melden

mod transport;

pub use transport::{
    LocalMediaHandle, MediaError, MediaEvent, MediaTransport, RemoteDescriptor, RemoteMediaHandle,
};
