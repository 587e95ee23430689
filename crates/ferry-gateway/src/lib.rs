use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::Deserialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod channels;
pub mod chunk;
pub mod config;
pub mod runtime;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_ROTATE_SIZE_MB: u64 = 100;
const DEFAULT_LOG_STDOUT: bool = false;

pub fn init_conf_dir(conf_dir: Option<PathBuf>) {
    config::init_conf_dir(conf_dir);
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FerryTomlLogFile {
    #[serde(default)]
    log: FerryTomlLog,
    #[serde(default)]
    env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FerryTomlLog {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    rotate_size_mb: Option<u64>,
    #[serde(default)]
    stdout: Option<bool>,
}

#[derive(Debug, Clone)]
struct RuntimeLogConfig {
    file_path: PathBuf,
    level: String,
    rotate_size_bytes: u64,
    stdout: bool,
}

#[derive(Debug)]
struct SizeRotatingFileWriter {
    file_path: PathBuf,
    rotated_path: PathBuf,
    max_size_bytes: u64,
}

impl SizeRotatingFileWriter {
    fn new(file_path: PathBuf, max_size_bytes: u64) -> Result<Self, String> {
        let parent = file_path
            .parent()
            .ok_or_else(|| format!("invalid log file path {}", file_path.display()))?;
        fs::create_dir_all(parent).map_err(|error| {
            format!("create log directory {} failed: {error}", parent.display())
        })?;

        let mut rotated_name = file_path
            .file_name()
            .map(|value| value.to_os_string())
            .unwrap_or_else(|| std::ffi::OsString::from("gateway.log"));
        rotated_name.push(".1");
        let rotated_path = file_path.with_file_name(rotated_name);

        Ok(Self {
            file_path,
            rotated_path,
            max_size_bytes,
        })
    }

    fn maybe_rotate(&self, incoming_len: usize) -> io::Result<()> {
        if self.max_size_bytes == 0 {
            return Ok(());
        }
        let current_size = fs::metadata(&self.file_path)
            .map(|metadata| metadata.len())
            .unwrap_or(0);
        if current_size.saturating_add(incoming_len as u64) <= self.max_size_bytes {
            return Ok(());
        }
        if self.rotated_path.exists() {
            let _ = fs::remove_file(&self.rotated_path);
        }
        if self.file_path.exists() {
            fs::rename(&self.file_path, &self.rotated_path)?;
        }
        Ok(())
    }
}

impl Write for SizeRotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.maybe_rotate(buf.len())?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn init_tracing() {
    static TRACE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    let config = load_runtime_log_config("gateway.log");
    let file_writer =
        match SizeRotatingFileWriter::new(config.file_path.clone(), config.rotate_size_bytes) {
            Ok(writer) => writer,
            Err(error) => {
                eprintln!("warning: failed to initialize gateway tracing writer: {error}");
                return;
            }
        };
    let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
    let _ = TRACE_GUARD.set(guard);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking);
    let stdout_layer = tracing_subscriber::fmt::layer().with_ansi(false);
    let init_result = if config.stdout {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stdout_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .try_init()
    };
    if let Err(error) = init_result {
        eprintln!(
            "warning: failed to initialize gateway tracing subscriber for {}: {error}",
            config.file_path.display()
        );
    }
}

fn load_runtime_log_config(file_name: &str) -> RuntimeLogConfig {
    let path = config::default_ferry_config_path();
    let parsed = if path.exists() {
        fs::read_to_string(&path)
            .ok()
            .and_then(|content| toml::from_str::<FerryTomlLogFile>(&content).ok())
            .unwrap_or_default()
    } else {
        FerryTomlLogFile::default()
    };
    build_runtime_log_config(&parsed.log, &parsed.env, file_name)
}

fn build_runtime_log_config(
    log: &FerryTomlLog,
    env_map: &HashMap<String, String>,
    file_name: &str,
) -> RuntimeLogConfig {
    let path = log
        .path
        .as_deref()
        .and_then(|value| config::resolve_config_value(value, env_map))
        .map(|value| expand_home_path(value.trim()))
        .unwrap_or_else(default_log_dir);
    let file_path = path.join(file_name);
    let level = log
        .level
        .as_deref()
        .and_then(|value| config::resolve_config_value(value, env_map))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let rotate_size_mb = log
        .rotate_size_mb
        .unwrap_or(DEFAULT_LOG_ROTATE_SIZE_MB)
        .max(1);

    RuntimeLogConfig {
        file_path,
        level,
        rotate_size_bytes: rotate_size_mb * 1024 * 1024,
        stdout: log.stdout.unwrap_or(DEFAULT_LOG_STDOUT),
    }
}

fn expand_home_path(path: &str) -> PathBuf {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return default_log_dir();
    }
    if trimmed == "~" {
        return std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
    }
    if let Some(suffix) = trimmed.strip_prefix("~/") {
        return std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(suffix);
    }
    PathBuf::from(trimmed)
}

fn default_log_dir() -> PathBuf {
    config::current_conf_dir().join("logs")
}

pub async fn run_gateway_serve() -> Result<(), String> {
    let config_path = config::default_ferry_config_path();
    let config = config::load_gateway_config(&config_path)?;
    runtime::serve_gateway(config).await
}

/// Loads and validates the configuration without starting any channel.
pub fn run_gateway_check() -> Result<(), String> {
    let config_path = config::default_ferry_config_path();
    let config = config::load_gateway_config(&config_path)?;
    for line in runtime::startup_log_lines(&config) {
        println!("{line}");
    }
    println!("[gateway] configuration ok: {}", config_path.display());
    Ok(())
}

#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> Result<(), String> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|error| format!("register SIGTERM handler failed: {error}"))?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> Result<(), String> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|error| format!("wait for ctrl+c failed: {error}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn build_runtime_log_config_reads_log_settings() {
        let log = FerryTomlLog {
            path: Some("/tmp/ferry-logs".to_string()),
            level: Some("$LOG_LEVEL".to_string()),
            rotate_size_mb: Some(8),
            stdout: Some(true),
        };
        let env_map = HashMap::from([("LOG_LEVEL".to_string(), "debug".to_string())]);
        let resolved = build_runtime_log_config(&log, &env_map, "gateway.log");

        assert_eq!(
            resolved.file_path,
            PathBuf::from("/tmp/ferry-logs/gateway.log")
        );
        assert_eq!(resolved.level, "debug");
        assert_eq!(resolved.rotate_size_bytes, 8 * 1024 * 1024);
        assert!(resolved.stdout);
    }

    #[test]
    fn build_runtime_log_config_uses_defaults_when_unset() {
        let resolved =
            build_runtime_log_config(&FerryTomlLog::default(), &HashMap::new(), "gateway.log");
        assert!(resolved
            .file_path
            .ends_with(Path::new("logs/gateway.log")));
        assert_eq!(resolved.level, "info");
        assert_eq!(resolved.rotate_size_bytes, 100 * 1024 * 1024);
        assert!(!resolved.stdout);
    }

    #[test]
    fn size_rotating_writer_rotates_once_the_limit_is_reached() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let log_path = dir.path().join("gateway.log");
        let mut writer = SizeRotatingFileWriter::new(log_path.clone(), 16)
            .expect("writer should initialize");

        writer.write_all(b"0123456789").expect("first write");
        writer.write_all(b"0123456789").expect("second write");

        let rotated = dir.path().join("gateway.log.1");
        assert!(rotated.exists(), "first batch should rotate away");
        let current = fs::read_to_string(&log_path).expect("current log should exist");
        assert_eq!(current, "0123456789");
    }
}
