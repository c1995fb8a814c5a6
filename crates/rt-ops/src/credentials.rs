use rand::Rng;
use rand::distr::Alphanumeric;
use rand::seq::SliceRandom;

const ROOT_PASSWORD_LEN: usize = 24;
const SECRET_LEN: usize = 32;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()";

/// Fresh root password for a new instance, with at least one character of
/// every class.
pub fn generate_root_password() -> String {
    let mut rng = rand::rng();
    let classes = [LOWER, UPPER, DIGITS, SYMBOLS];
    let all = classes.concat();

    let mut chars: Vec<u8> = classes
        .iter()
        .map(|class| class[rng.random_range(..class.len())])
        .collect();
    while chars.len() < ROOT_PASSWORD_LEN {
        chars.push(all[rng.random_range(..all.len())]);
    }
    chars.shuffle(&mut rng);
    chars.into_iter().map(char::from).collect()
}

/// Alphanumeric shared secret or API token.
pub fn generate_secret() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}
