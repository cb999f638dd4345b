use rand::{CryptoRng, RngCore, SeedableRng as _};
use rand_chacha::ChaCha20Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use crate::{Error, Result};

/// Byte stream carrying one SSH connection.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// Object-safe combination of [`CryptoRng`] and [`RngCore`].
pub trait CryptoRngCore: CryptoRng + RngCore {
    fn as_rngcore(&mut self) -> &mut dyn RngCore;
}

impl<T: CryptoRng + RngCore> CryptoRngCore for T {
    fn as_rngcore(&mut self) -> &mut dyn RngCore {
        self
    }
}

/// Per-connection generator, seeded from the OS.
pub(crate) fn new_connection_rng() -> Result<ChaCha20Rng> {
    ChaCha20Rng::from_rng(rand::rngs::OsRng)
        .map_err(|_| Error::Random("could not seed the connection random generator"))
}

/// Derives an independent generator from `rng`.
pub(crate) fn fork_rng(rng: &mut dyn CryptoRngCore) -> Result<ChaCha20Rng> {
    ChaCha20Rng::from_rng(rng.as_rngcore())
        .map_err(|_| Error::Random("could not seed a random generator"))
}
