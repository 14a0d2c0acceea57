use rand::rngs::OsRng;
use rand::{CryptoRng, Rng, RngCore};

use crate::error::AppError;
use crate::models::delivery::OrderCode;

pub const ORDER_CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const MAX_GENERATION_ATTEMPTS: u32 = 100;

/// Draws order codes from a cryptographically strong source.
///
/// The `is_taken` check passed to [`OrderCodeGenerator::generate`] is only a
/// fast path; the store's unique index decides whether a code is free.
pub struct OrderCodeGenerator<R = OsRng> {
    rng: R,
    max_attempts: u32,
}

impl OrderCodeGenerator<OsRng> {
    pub fn new() -> Self {
        Self::with_rng(OsRng)
    }
}

impl Default for OrderCodeGenerator<OsRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore + CryptoRng> OrderCodeGenerator<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            max_attempts: MAX_GENERATION_ATTEMPTS,
        }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Returns a free code and the number of candidates drawn to find it.
    pub fn generate<F>(&mut self, mut is_taken: F) -> Result<(OrderCode, u32), AppError>
    where
        F: FnMut(&OrderCode) -> bool,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = self.candidate()?;
            if !is_taken(&candidate) {
                return Ok((candidate, attempt));
            }
        }

        Err(AppError::GenerationExhausted {
            attempts: self.max_attempts,
        })
    }

    fn candidate(&mut self) -> Result<OrderCode, AppError> {
        let symbols: String = (0..OrderCode::LEN)
            .map(|_| ORDER_CODE_ALPHABET[self.rng.gen_range(0..ORDER_CODE_ALPHABET.len())] as char)
            .collect();

        OrderCode::parse(&symbols)
    }
}
