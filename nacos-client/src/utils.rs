use std::collections::BTreeMap;
use std::net::{IpAddr, UdpSocket};
use std::time::Duration;
use tokio::sync::watch;

/// File name of the running executable.
pub(crate) fn current_process_name() -> String {
    std::env::args()
        .next()
        .as_ref()
        .map(std::path::Path::new)
        .and_then(std::path::Path::file_name)
        .and_then(std::ffi::OsStr::to_str)
        .map(String::from)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Address this process advertises to the registry.
///
/// `LOCAL_IP` wins; otherwise the source address of a route towards a public
/// IPv4 address is used (nothing is sent), falling back to loopback.
pub(crate) fn local_ip() -> String {
    if let Ok(ip) = std::env::var("LOCAL_IP")
        && !ip.trim().is_empty()
    {
        return ip.trim().to_string();
    }
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip: &IpAddr| !ip.is_loopback() && !ip.is_unspecified())
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// Hex md5 of `content`; empty content has an empty fingerprint.
pub(crate) fn md5_hex(content: &[u8]) -> String {
    if content.is_empty() {
        return String::new();
    }
    format!("{:x}", md5::compute(content))
}

/// `k1=v1,k2=v2`, keys in sorted order.
pub(crate) fn metadata_to_string(metadata: &BTreeMap<String, String>) -> String {
    metadata
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// `min(retries * step, cap)` seconds.
pub(crate) fn backoff(retries: u64, step_secs: u64, cap_secs: u64) -> Duration {
    Duration::from_secs(retries.saturating_mul(step_secs).min(cap_secs))
}

/// Sleeps for `delay` unless `stop` flips to true first.
/// Returns whether the caller should go on.
pub(crate) async fn sleep_or_stop(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = stop.changed() => {}
    }
    !*stop.borrow()
}

#[cfg(feature = "tracing")]
pub fn init_log() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_level(true)
        .with_ansi(true)
        .with_line_number(true)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new(
            "%Y-%m-%d %H:%M:%S.%3f".to_string(),
        ))
        .compact()
        .init();
}
