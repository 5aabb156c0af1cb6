use crate::error::{TransferError, TransferResult};
use crate::transfer::constants::MAX_FILENAME_LENGTH;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};

/// Strip the IPv4-mapped prefix (`::ffff:a.b.c.d`) so one peer has one address.
pub fn unmap_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

fn canonical(addr: SocketAddr) -> String {
    SocketAddr::new(unmap_ip(addr.ip()), addr.port()).to_string()
}

/// Normalize a user- or peer-supplied address to `host:port`.
///
/// Accepts `ip`, `ip:port`, `[ipv6]:port`, bare IPv6, `name` and `name:port`.
pub fn normalize_address(input: &str, default_port: u16) -> TransferResult<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(TransferError::Malformed("empty address".to_string()));
    }

    if let Ok(addr) = trimmed.parse::<SocketAddr>() {
        return Ok(canonical(addr));
    }

    let bare = trimmed.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(canonical(SocketAddr::new(ip, default_port)));
    }

    match trimmed.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            let port: u16 = port
                .parse()
                .map_err(|_| TransferError::Malformed(format!("invalid port in {}", trimmed)))?;
            Ok(format!("{}:{}", host, port))
        }
        Some(_) => Err(TransferError::Malformed(format!(
            "invalid address {}",
            trimmed
        ))),
        None => Ok(format!("{}:{}", trimmed, default_port)),
    }
}

/// Registry key for a peer that contacted us from `remote_ip`.
///
/// The source IP is trusted over the advertised one; only the advertised port
/// is taken from the peer's own claim.
pub fn peer_address(advertised: &str, remote_ip: IpAddr, default_port: u16) -> String {
    let port = normalize_address(advertised, default_port)
        .ok()
        .and_then(|a| a.rsplit_once(':').and_then(|(_, p)| p.parse::<u16>().ok()))
        .unwrap_or(default_port);
    canonical(SocketAddr::new(remote_ip, port))
}

/// IP part of a normalized address, if it is a literal IP.
pub fn address_ip(address: &str) -> Option<IpAddr> {
    address
        .parse::<SocketAddr>()
        .ok()
        .map(|addr| unmap_ip(addr.ip()))
}

/// Sanitize file name to prevent path traversal and ensure safety
pub fn sanitize_file_name(file_name: &str) -> String {
    // Take the last component of either separator style
    let file_name = file_name
        .split(['/', '\\'])
        .next_back()
        .unwrap_or("unknown_file");

    let mut clean_name: String = file_name.chars().filter(|c| !c.is_control()).collect();

    // See: https://learn.microsoft.com/en-us/windows/win32/fileio/naming-a-file
    let reserved_names = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if reserved_names
        .iter()
        .any(|&r| clean_name.eq_ignore_ascii_case(r))
    {
        return "unknown_file".to_string();
    }

    if clean_name == ".." || clean_name == "." || clean_name.trim().is_empty() {
        return "unknown_file".to_string();
    }

    if clean_name.len() > MAX_FILENAME_LENGTH {
        // Keep a short extension if there is one
        let ext = clean_name
            .rfind('.')
            .map(|idx| clean_name[idx..].to_string())
            .filter(|ext| ext.len() < 20);
        let budget = MAX_FILENAME_LENGTH - ext.as_ref().map_or(0, |e| e.len());
        let mut base = match &ext {
            Some(e) => clean_name[..clean_name.len() - e.len()].to_string(),
            None => clean_name.clone(),
        };
        let mut cutoff = budget.min(base.len());
        while !base.is_char_boundary(cutoff) {
            cutoff -= 1;
        }
        base.truncate(cutoff);
        if let Some(e) = ext {
            base.push_str(&e);
        }
        clean_name = base;
    }

    clean_name
}

/// Candidate names for `file_name` in a folder: the name itself, then
/// `stem_1.ext`, `stem_2.ext`, ...
pub fn numbered_file_name(file_name: &str, counter: u32) -> String {
    if counter == 0 {
        return file_name.to_string();
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, counter, ext.to_string_lossy()),
        None => format!("{}_{}", stem, counter),
    }
}

/// Create a new file in `folder` without clobbering an existing one.
///
/// Uses `create_new`, so two concurrent receivers never pick the same name.
pub async fn create_unique_file(folder: &Path, file_name: &str) -> io::Result<(PathBuf, File)> {
    let mut counter = 0u32;
    loop {
        let path = folder.join(numbered_file_name(file_name, counter));
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        match options.open(&path).await {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => counter += 1,
            Err(e) => return Err(e),
        }
    }
}
