//! Virtual path resolver
//!
//! The guest "opens" synthetic paths to get at resources that are not
//! files:
//!
//! | Path                     | Resource                            |
//! |--------------------------|-------------------------------------|
//! | `/dev/urandom`           | random-byte device                  |
//! | `/dev/tcp/<host>:<port>` | stream socket connected to the peer |
//!
//! Both prefixes come from [`WasiConfig`]. Anything else does not exist.

use crate::config::WasiConfig;
use wasi_sock_abi::Errno;

/// What a path names
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VirtualPath {
    Random,
    Socket { host: String, port: u16 },
}

/// Join a preopen name and a guest-relative path
pub(crate) fn join(parent: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if parent.ends_with('/') {
        format!("{}{}", parent, relative)
    } else {
        format!("{}/{}", parent, relative)
    }
}

pub(crate) fn resolve(config: &WasiConfig, full_path: &str) -> Result<VirtualPath, Errno> {
    let random = join(&config.dev_dir, &config.random_device);
    if full_path == random {
        return Ok(VirtualPath::Random);
    }

    let socket_name = full_path
        .strip_prefix(config.tcp_dir.as_str())
        .and_then(|rest| rest.strip_prefix('/'));
    if let Some(name) = socket_name {
        let (host, port) = parse_socket_name(name).ok_or(Errno::Noent)?;
        return Ok(VirtualPath::Socket { host, port });
    }

    Err(Errno::Noent)
}

/// Split `host:port`; the host may be a bracketed IPv6 literal
pub(crate) fn parse_socket_name(name: &str) -> Option<(String, u16)> {
    let (host, port) = name.rsplit_once(':')?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']')?,
        None => host,
    };
    if host.is_empty() || host.contains('/') {
        return None;
    }
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let port = port.parse::<u16>().ok()?;
    Some((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join() {
        assert_eq!(join("/dev", "urandom"), "/dev/urandom");
        assert_eq!(join("/dev/", "urandom"), "/dev/urandom");
        assert_eq!(join("/dev/tcp", "/a:1"), "/dev/tcp/a:1");
    }

    #[test]
    fn test_resolve_random() {
        let config = WasiConfig::default();
        assert_eq!(resolve(&config, "/dev/urandom"), Ok(VirtualPath::Random));
        assert_eq!(resolve(&config, "/dev/random"), Err(Errno::Noent));
    }

    #[test]
    fn test_resolve_socket() {
        let config = WasiConfig::default();
        assert_eq!(
            resolve(&config, "/dev/tcp/example.com:22"),
            Ok(VirtualPath::Socket {
                host: "example.com".into(),
                port: 22
            })
        );
        assert_eq!(
            resolve(&config, "/dev/tcp/dummy:0"),
            Ok(VirtualPath::Socket {
                host: "dummy".into(),
                port: 0
            })
        );
        assert_eq!(resolve(&config, "/dev/tcpx/a:1"), Err(Errno::Noent));
        assert_eq!(resolve(&config, "/dev/tcp"), Err(Errno::Noent));
    }

    #[test]
    fn test_parse_socket_name() {
        assert_eq!(
            parse_socket_name("[::1]:2222"),
            Some(("::1".to_string(), 2222))
        );
        assert_eq!(
            parse_socket_name("10.0.0.1:65535"),
            Some(("10.0.0.1".to_string(), 65535))
        );

        for bad in [
            "", "host", ":22", "host:", "host:65536", "host:-1", "host:+1", "a/b:1", "[::1:22",
        ] {
            assert_eq!(parse_socket_name(bad), None, "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_custom_namespace() {
        let config = WasiConfig {
            dev_dir: "/sys".into(),
            tcp_dir: "/net".into(),
            random_device: "entropy".into(),
            ..Default::default()
        };
        assert_eq!(resolve(&config, "/sys/entropy"), Ok(VirtualPath::Random));
        assert!(matches!(
            resolve(&config, "/net/h:1"),
            Ok(VirtualPath::Socket { .. })
        ));
        assert_eq!(resolve(&config, "/dev/urandom"), Err(Errno::Noent));
    }
}
