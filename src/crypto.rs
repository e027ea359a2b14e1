//! Random material and one-way hashing used for tokens and passwords.

use rand::Rng;

/// Alphabet bearer tokens are drawn from.
pub const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a plaintext bearer token.
pub const TOKEN_LEN: usize = 64;

/// Uniformly random string of `len` characters taken from `charset`.
pub fn random_string(len: usize, charset: &[u8]) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| charset[rng.random_range(0..charset.len())] as char)
        .collect()
}

pub fn random_seed() -> i64 {
    rand::rng().random()
}

/// Fresh plaintext bearer token. Only its [`hash_hex`] is ever persisted.
pub fn new_token() -> String {
    random_string(TOKEN_LEN, TOKEN_CHARSET)
}

pub fn hash_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Salted password hash: `hash(password ∥ decimal(salt))`.
pub fn password_hash(password: &str, salt: i64) -> String {
    hash_hex(&format!("{password}{salt}"))
}
