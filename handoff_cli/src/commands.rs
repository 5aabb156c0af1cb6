//! Parsing of the line-based command language read from stdin.

use anyhow::{Result, bail};
use handoff_core::AppCommand;
use std::path::PathBuf;

pub const HELP: &str = "\
commands:
  send <address> <file>       propose a file to a peer
  accept <id> [folder]        accept an incoming file
  cancel <id>                 cancel a transaction
  add <hostname> <address>    add a host by hand
  remove <address>            forget a host
  help                        show this text
  quit                        exit";

#[derive(Debug)]
pub enum Input {
    Command(AppCommand),
    Help,
    Quit,
    Empty,
}

/// Parse one input line. File paths and folders may contain spaces.
pub fn parse(line: &str) -> Result<Input> {
    let line = line.trim();
    let Some((verb, rest)) = split_word(line) else {
        return Ok(Input::Empty);
    };

    let input = match verb {
        "send" => {
            let (address, file) = two_args(rest, "send <address> <file>")?;
            Input::Command(AppCommand::RequestTransaction {
                address: address.to_string(),
                file_path: PathBuf::from(file),
            })
        }
        "accept" => {
            let Some((transaction_id, folder)) = split_word(rest) else {
                bail!("usage: accept <id> [folder]");
            };
            Input::Command(AppCommand::ConfirmTransaction {
                transaction_id: transaction_id.to_string(),
                save_folder: (!folder.is_empty()).then(|| PathBuf::from(folder)),
            })
        }
        "cancel" => Input::Command(AppCommand::CancelTransaction {
            transaction_id: one_arg(rest, "cancel <id>")?.to_string(),
        }),
        "add" => {
            let (hostname, address) = two_args(rest, "add <hostname> <address>")?;
            Input::Command(AppCommand::AddManualHost {
                hostname: hostname.to_string(),
                address: address.to_string(),
            })
        }
        "remove" => Input::Command(AppCommand::RemoveHost {
            address: one_arg(rest, "remove <address>")?.to_string(),
        }),
        "help" | "?" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => bail!("unknown command '{}', try 'help'", other),
    };
    Ok(input)
}

/// First word and the trimmed remainder
fn split_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => Some((word, rest.trim())),
        None => Some((s, "")),
    }
}

fn one_arg<'a>(rest: &'a str, usage: &str) -> Result<&'a str> {
    match split_word(rest) {
        Some((arg, "")) => Ok(arg),
        _ => bail!("usage: {}", usage),
    }
}

fn two_args<'a>(rest: &'a str, usage: &str) -> Result<(&'a str, &'a str)> {
    match split_word(rest) {
        Some((first, second)) if !second.is_empty() => Ok((first, second)),
        _ => bail!("usage: {}", usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_keeps_spaces_in_path() {
        match parse("send 192.168.1.5 /home/me/My Report.pdf").unwrap() {
            Input::Command(AppCommand::RequestTransaction { address, file_path }) => {
                assert_eq!(address, "192.168.1.5");
                assert_eq!(file_path, PathBuf::from("/home/me/My Report.pdf"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_accept_folder_is_optional() {
        match parse("accept abc").unwrap() {
            Input::Command(AppCommand::ConfirmTransaction {
                transaction_id,
                save_folder,
            }) => {
                assert_eq!(transaction_id, "abc");
                assert!(save_folder.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }

        match parse("  accept abc   /tmp/in box ").unwrap() {
            Input::Command(AppCommand::ConfirmTransaction { save_folder, .. }) => {
                assert_eq!(save_folder, Some(PathBuf::from("/tmp/in box")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_usage_errors() {
        assert!(parse("send 192.168.1.5").is_err());
        assert!(parse("cancel").is_err());
        assert!(parse("cancel a b").is_err());
        assert!(parse("add onlyname").is_err());
        assert!(parse("frobnicate").is_err());
    }

    #[test]
    fn test_blank_and_control_lines() {
        assert!(matches!(parse("   ").unwrap(), Input::Empty));
        assert!(matches!(parse("quit").unwrap(), Input::Quit));
        assert!(matches!(parse("help").unwrap(), Input::Help));
        assert!(matches!(
            parse("remove 10.0.0.2:56934").unwrap(),
            Input::Command(AppCommand::RemoveHost { .. })
        ));
    }
}
