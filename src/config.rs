use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Ledgerline";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default `tracing` filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    "info,ledgerline=debug".to_string()
}

/// Get the application data directory
/// ~/Ledgerline/ on all platforms (user-visible, per design requirement)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Ledgerline")
}

/// Get the runs database path
pub fn runs_db_path() -> PathBuf {
    app_data_dir().join("runs.db")
}

/// Get the output directory for generated statements and certificates
pub fn output_dir() -> PathBuf {
    app_data_dir().join("output")
}
