use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_CONCURRENT_BUILDS: usize = 4;
const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 300;

/// Runtime configuration, resolved once at startup and handed to the app
/// explicitly so tests can construct their own isolated instances.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Root under which per-request sketch directories are created.
    pub temp_root: PathBuf,
    /// Name or path of the arduino-cli binary.
    pub cli_path: PathBuf,
    /// Directory served for unmatched GET routes.
    pub static_dir: PathBuf,
    pub max_concurrent_builds: usize,
    pub build_timeout: Duration,
    /// When true, successful compiles embed the exported artifact as base64.
    pub export_binaries: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            temp_root: env::temp_dir().join("sketch-runner"),
            cli_path: PathBuf::from("arduino-cli"),
            static_dir: PathBuf::from("public"),
            max_concurrent_builds: DEFAULT_MAX_CONCURRENT_BUILDS,
            build_timeout: Duration::from_secs(DEFAULT_BUILD_TIMEOUT_SECS),
            export_binaries: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            port: env_parse("PORT", defaults.port),
            temp_root: env::var_os("SKETCH_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_root),
            cli_path: env::var_os("ARDUINO_CLI")
                .map(PathBuf::from)
                .unwrap_or(defaults.cli_path),
            static_dir: env::var_os("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            max_concurrent_builds: env_parse(
                "MAX_CONCURRENT_BUILDS",
                defaults.max_concurrent_builds,
            ),
            build_timeout: Duration::from_secs(env_parse(
                "BUILD_TIMEOUT_SECS",
                DEFAULT_BUILD_TIMEOUT_SECS,
            )),
            export_binaries: env_parse("EXPORT_BINARIES", defaults.export_binaries),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
