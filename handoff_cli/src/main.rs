use clap::Parser;
use handoff_core::config::{self, AppConfig};
use handoff_core::{AppCommand, AppEvent, run_backend};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod args;
mod commands;
mod display;

use args::Args;
use commands::Input;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // .env may carry RUST_LOG and HANDOFF_CONFIG_DIR, so it goes first
    config::load_env();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = args.apply(AppConfig::load());
    if args.save_config {
        config.save()?;
        tracing::info!("Settings saved to {:?}", config::get_config_dir());
    }

    // Channels (bounded with capacity 1000 for backpressure)
    let (cmd_tx, cmd_rx) = mpsc::channel::<AppCommand>(1000);
    let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(1000);

    let mut backend = tokio::spawn(run_backend(config, cmd_rx, event_tx));

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("{}", display::render(&event));
        }
    });

    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // Some(..) if the backend ended on its own
    let finished = loop {
        tokio::select! {
            res = &mut backend => break Some(res),
            _ = tokio::signal::ctrl_c() => break None,
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break None;
                };
                match commands::parse(&line) {
                    Ok(Input::Command(cmd)) => {
                        if cmd_tx.send(cmd).await.is_err() {
                            break None;
                        }
                    }
                    Ok(Input::Help) => println!("{}", commands::HELP),
                    Ok(Input::Quit) => break None,
                    Ok(Input::Empty) => {}
                    Err(e) => eprintln!("{}", e),
                }
            }
        }
    };

    // Closing the command channel stops the backend
    drop(cmd_tx);
    let result = match finished {
        Some(res) => res,
        None => backend.await,
    };
    result??;
    Ok(())
}
