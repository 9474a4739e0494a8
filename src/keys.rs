use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("entropy source unavailable: {0}")]
    Entropy(#[from] rand::Error),
    #[error("key generation failed: {0}")]
    Unavailable(String),
}

/// Base64 encoded key pair, the format wireguard configs expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypair {
    pub private_key: String,
    pub public_key: String,
}

pub trait KeyProvider {
    fn keypair(&self) -> Result<Keypair, KeyError>;
    fn preshared_key(&self) -> Result<String, KeyError>;
}

impl<T: KeyProvider + ?Sized> KeyProvider for &T {
    fn keypair(&self) -> Result<Keypair, KeyError> {
        (**self).keypair()
    }

    fn preshared_key(&self) -> Result<String, KeyError> {
        (**self).preshared_key()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct X25519Keys;

fn random_bytes() -> Result<[u8; 32], KeyError> {
    let mut bytes = [0u8; 32];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(bytes)
}

impl KeyProvider for X25519Keys {
    fn keypair(&self) -> Result<Keypair, KeyError> {
        let private = StaticSecret::from(random_bytes()?);
        let public = PublicKey::from(&private);

        Ok(Keypair {
            private_key: STANDARD.encode(private.to_bytes()),
            public_key: STANDARD.encode(public.to_bytes()),
        })
    }

    fn preshared_key(&self) -> Result<String, KeyError> {
        Ok(STANDARD.encode(random_bytes()?))
    }
}
