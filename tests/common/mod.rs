use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Iteration count that keeps key derivation fast in tests.
#[allow(dead_code)]
pub const TEST_KDF_ITERATIONS: u32 = 16;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Config with a fast KDF, a test app and a data directory inside `dir`.
#[allow(dead_code)]
pub fn daemon_config(dir: &TempDir, api_base: &str) -> PathBuf {
    let config_path = dir.path().join("config.yaml");
    let contents = format!(
        "data_dir: {data}\n\
         twitch:\n  client_id: cid\n  client_secret: csecret\n  broadcaster_id: '141981764'\n  api_base: {api_base}\n  access_token: initial-access\n  refresh_token: initial-refresh\n\
         credentials:\n  encryption_secret: test-secret\n  kdf_iterations: {iters}\n",
        data = dir.path().join("data").display(),
        iters = TEST_KDF_ITERATIONS,
    );
    fs::write(&config_path, contents).expect("failed to write config file");
    config_path
}
