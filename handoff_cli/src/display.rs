use handoff_core::AppEvent;
use handoff_core::transaction::Direction;

/// One human-readable block per event
pub fn render(event: &AppEvent) -> String {
    match event {
        AppEvent::Status(message) => format!("* {}", message),
        AppEvent::Error(message) => format!("! {}", message),
        AppEvent::HostsUpdated(hosts) if hosts.is_empty() => "hosts: none".to_string(),
        AppEvent::HostsUpdated(hosts) => {
            let mut out = format!("hosts ({}):", hosts.len());
            for host in hosts {
                out.push_str(&format!(
                    "\n  {:<22} {} ({}){}{}",
                    host.address,
                    host.hostname,
                    if host.username.is_empty() { "?" } else { host.username.as_str() },
                    if host.discovered { "" } else { " [manual]" },
                    if host.busy { " [busy]" } else { "" },
                ));
            }
            out
        }
        AppEvent::TransactionRequested {
            address,
            hostname,
            username,
            file_name,
            transaction_id,
            save_folder,
        } => format!(
            "> {}@{} ({}) wants to send {}\n  accept {} [folder]   (default {})\n  cancel {}",
            username,
            hostname,
            address,
            file_name,
            transaction_id,
            save_folder.display(),
            transaction_id
        ),
        AppEvent::TransactionUpdated {
            transaction_id,
            direction,
            stage,
        } => {
            let arrow = match direction {
                Direction::Outbound => "->",
                Direction::Inbound => "<-",
            };
            format!("  {} {} {}", arrow, transaction_id, stage)
        }
        AppEvent::TransferCompleted {
            transaction_id,
            path,
        } => format!("  done {} ({})", transaction_id, path.display()),
        AppEvent::TransactionFailed {
            transaction_id,
            reason,
        } => format!("! {} failed: {}", transaction_id, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::registry::HostSnapshot;
    use handoff_core::transaction::Stage;

    #[test]
    fn test_host_flags_are_shown() {
        let text = render(&AppEvent::HostsUpdated(vec![HostSnapshot {
            address: "10.0.0.2:56934".to_string(),
            hostname: "nas".to_string(),
            username: String::new(),
            discovered: false,
            busy: true,
        }]));
        assert!(text.starts_with("hosts (1):"));
        assert!(text.contains("nas (?) [manual] [busy]"));
    }

    #[test]
    fn test_stage_update_shows_direction() {
        let text = render(&AppEvent::TransactionUpdated {
            transaction_id: "abc".to_string(),
            direction: Direction::Inbound,
            stage: Stage::Transferring,
        });
        assert_eq!(text, "  <- abc TRANSFERRING");
    }
}
