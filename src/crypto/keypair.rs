//! Ed25519 Key Pair Management
//!
//! Generiert, speichert und lädt das Schlüsselpaar des Geräts und
//! versiegelt damit jeden Frame an den Signaling-Server.
//!
//! ## Verwendung
//! ```rust,ignore
//! let keypair = KeyPair::load_or_create(&data_dir)?;
//! let frame = keypair.seal(&payload, Utc::now().timestamp_millis())?;
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum KeyPairError {
    #[error("Key file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode key material: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Signature missing or invalid")]
    InvalidSignature,
}

// ============================================================================
// KEYPAIR
// ============================================================================

/// Ed25519 Schlüsselpaar des Geräts
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Lädt den Key aus `<data_dir>/keys/private.key` oder legt ihn an
    pub fn load_or_create(data_dir: &Path) -> Result<Self, KeyPairError> {
        let key_path = Self::key_path(data_dir);

        if key_path.exists() {
            tracing::info!("Loading existing keypair from {:?}", key_path);
            Self::load_from_file(&key_path)
        } else {
            tracing::info!("Creating new keypair at {:?}", key_path);
            let keypair = Self::generate();
            keypair.save_to_file(&key_path)?;
            Ok(keypair)
        }
    }

    /// Generiert ein neues zufälliges Schlüsselpaar
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        Self {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    fn key_path(data_dir: &Path) -> PathBuf {
        data_dir.join("keys").join("private.key")
    }

    fn load_from_file(path: &Path) -> Result<Self, KeyPairError> {
        let encoded = fs::read_to_string(path)?;
        let bytes = BASE64.decode(encoded.trim())?;
        let key_bytes = to_array::<32>(bytes)?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_bytes),
        })
    }

    fn save_to_file(&self, path: &Path) -> Result<(), KeyPairError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, BASE64.encode(self.signing_key.to_bytes()))?;

        // Nur Owner darf lesen/schreiben
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Public Key als Base64 (wird bei der Registrierung übertragen)
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.verifying_key().to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Ergänzt `timestamp` und `signature` und liefert den fertigen Frame
    ///
    /// Signiert wird der JSON-String aller Felder außer `signature`, mit
    /// alphabetisch sortierten Keys auf jeder Ebene.
    pub fn seal<T: Serialize>(&self, payload: &T, timestamp_ms: i64) -> Result<String, KeyPairError> {
        let mut frame = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            _ => return Err(KeyPairError::NotAnObject),
        };
        frame.insert("timestamp".to_string(), Value::from(timestamp_ms));

        let signable = serde_json::to_string(&canonical(&Value::Object(frame.clone())))?;
        let signature = self.signing_key.sign(signable.as_bytes());
        frame.insert(
            "signature".to_string(),
            Value::String(BASE64.encode(signature.to_bytes())),
        );

        Ok(serde_json::to_string(&Value::Object(frame))?)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_base64())
            .finish()
    }
}

/// Prüft einen mit [`KeyPair::seal`] erzeugten Frame
pub fn verify_sealed(public_key_base64: &str, frame: &str) -> Result<(), KeyPairError> {
    let key_bytes = to_array::<32>(BASE64.decode(public_key_base64)?)?;
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| KeyPairError::InvalidSignature)?;

    let value: Value = serde_json::from_str(frame)?;
    let signature_b64 = value
        .get("signature")
        .and_then(Value::as_str)
        .ok_or(KeyPairError::InvalidSignature)?;
    let signature = Signature::from_bytes(&to_array::<64>(BASE64.decode(signature_b64)?)?);

    let signable = serde_json::to_string(&canonical(&value))?;
    verifying_key
        .verify(signable.as_bytes(), &signature)
        .map_err(|_| KeyPairError::InvalidSignature)
}

/// Sortiert Objekt-Keys rekursiv und lässt `signature` weg
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().filter(|k| *k != "signature").collect();
            keys.sort();

            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonical(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

fn to_array<const N: usize>(bytes: Vec<u8>) -> Result<[u8; N], KeyPairError> {
    let actual = bytes.len();
    bytes.try_into().map_err(|_| KeyPairError::InvalidKeyLength {
        expected: N,
        actual,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_length() {
        let keypair = KeyPair::generate();
        // 32 bytes = 44 Zeichen Base64
        assert_eq!(keypair.public_key_base64().len(), 44);
    }

    #[test]
    fn test_seal_and_verify() {
        let keypair = KeyPair::generate();
        let payload = serde_json::json!({
            "type": "relay",
            "fromPeerId": "alice",
            "toPeerIds": ["bob"],
            "payload": { "type": "call_end", "sessionId": "s-1" }
        });

        let frame = keypair.seal(&payload, 1_700_000_000_000).unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["timestamp"], 1_700_000_000_000_i64);
        assert!(parsed["signature"].is_string());

        verify_sealed(&keypair.public_key_base64(), &frame).unwrap();
    }

    #[test]
    fn test_tampered_frame_fails() {
        let keypair = KeyPair::generate();
        let frame = keypair
            .seal(&serde_json::json!({ "type": "keepalive", "peerId": "alice" }), 1)
            .unwrap();
        let tampered = frame.replace("alice", "mallory");

        assert!(matches!(
            verify_sealed(&keypair.public_key_base64(), &tampered),
            Err(KeyPairError::InvalidSignature)
        ));
    }

    #[test]
    fn test_seal_rejects_non_object() {
        let keypair = KeyPair::generate();
        assert!(matches!(
            keypair.seal(&vec![1, 2, 3], 1),
            Err(KeyPairError::NotAnObject)
        ));
    }

    #[test]
    fn test_load_or_create_persists_key() {
        let dir = tempfile::tempdir().unwrap();

        let first = KeyPair::load_or_create(dir.path()).unwrap();
        let second = KeyPair::load_or_create(dir.path()).unwrap();
        assert_eq!(first.public_key_base64(), second.public_key_base64());
        assert!(dir.path().join("keys").join("private.key").exists());
    }
}
