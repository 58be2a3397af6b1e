//! Random password generation

use rand::Rng;

use crate::secret::SecretString;

/// Length of every generated password unless a caller asks otherwise
pub const DEFAULT_PASSWORD_LENGTH: usize = 30;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate an alphanumeric password of `length` characters
///
/// Characters are drawn uniformly from `[A-Za-z0-9]` using the thread-local
/// CSPRNG. Alphanumeric output is safe in SQL literals, JSON documents, and
/// the quoted assignments of the runtime config file.
#[must_use]
pub fn generate_password(length: usize) -> SecretString {
    let mut rng = rand::rng();
    let password: String = (0..length)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    SecretString::new(password)
}
