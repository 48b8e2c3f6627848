pub mod config;

use std::path::Path;

/// Load `.env.local` and then `.env` from `dir`. Variables already present
/// in the environment win, then `.env.local`, then `.env`. Missing files are
/// ignored.
pub fn load_env_files(dir: &Path) {
    dotenvy::from_path(dir.join(".env.local")).ok();
    dotenvy::from_path(dir.join(".env")).ok();
}
