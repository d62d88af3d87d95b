use std::path::Path;

use rand::Rng;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

const HEX_CHARS: &[u8] = b"abcdef0123456789";

pub async fn read_file_to_string(path: &Path) -> Result<String, std::io::Error> {
    let mut file = File::open(path).await?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).await?;
    Ok(contents)
}

/// Short lowercase hex token, used as a device uid.
pub fn random_uid<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| HEX_CHARS[rng.gen_range(0..HEX_CHARS.len())] as char)
        .collect()
}

pub fn client_id(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &id[..8])
}

/// Rounds to `places` decimals and renders with exactly that many digits.
pub fn to_fixed(value: f64, places: usize) -> String {
    format!("{:.*}", places, value)
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
