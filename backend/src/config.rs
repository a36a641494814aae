use std::{env, path::Path};

/// Loads `.env` files into the process environment.
pub fn init() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}

/// Reads an environment variable, falling back when it is unset, empty, or
/// does not parse. Misconfiguration is never silently mapped to `Default`.
pub fn get_env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    match env::var(key) {
        Ok(s) if !s.trim().is_empty() => s.parse().unwrap_or(fallback),
        _ => fallback,
    }
}
