use crate::discovery::Announcement;
use crate::transfer::protocol::{ConnectRequest, RequestTransaction};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use uuid::Uuid;

/// How this host presents itself to peers.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalIdentity {
    /// Random per-process id, lets discovery drop our own broadcasts
    pub instance_id: String,
    pub hostname: String,
    pub username: String,
    /// `ip:port` of our transfer server
    pub address: String,
}

impl LocalIdentity {
    pub fn new(hostname: &str, username: &str, address: &str) -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            hostname: hostname.to_string(),
            username: username.to_string(),
            address: address.to_string(),
        }
    }

    /// Detect hostname, login name and LAN address of this machine
    pub fn detect(transfer_port: u16) -> Self {
        let ip = local_ip_address::local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let address = SocketAddr::new(ip, transfer_port).to_string();
        Self::new(&detect_hostname(), &detect_username(), &address)
    }

    pub fn announcement(&self) -> Announcement {
        Announcement {
            instance_id: self.instance_id.clone(),
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            address: self.address.clone(),
        }
    }

    pub fn connect_request(&self) -> ConnectRequest {
        ConnectRequest {
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            address: self.address.clone(),
        }
    }

    pub fn transaction_request(&self, file_name: &str, file_size: u64) -> RequestTransaction {
        RequestTransaction {
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            address: self.address.clone(),
            file_name: file_name.to_string(),
            file_size,
            suggested_save_folder: None,
        }
    }
}

/// First label of the machine's host name
fn detect_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .and_then(|s| s.split('.').next().map(str::to_string))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown-PC".to_string())
}

fn detect_username() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_uses_transfer_port() {
        let identity = LocalIdentity::detect(9100);
        assert!(identity.address.ends_with(":9100"));
        assert!(!identity.hostname.contains('.'));
        assert!(!identity.hostname.is_empty());
    }

    #[test]
    fn test_instances_are_distinct() {
        let a = LocalIdentity::new("alpha", "alice", "127.0.0.1:1");
        let b = LocalIdentity::new("alpha", "alice", "127.0.0.1:1");
        assert_ne!(a.instance_id, b.instance_id);
        assert_eq!(a.announcement().hostname, "alpha");
        assert_eq!(a.transaction_request("r.pdf", 3).file_size, 3);
    }
}
