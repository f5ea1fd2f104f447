use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use client_core::{CommandChannel, CommandQueue, HaltHandle, RoverEvent, WebSocketConnector};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::MissedTickBehavior,
};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{info, warn};

mod commands;
mod settings;

use commands::{execute, InputState, Outcome};
use settings::load_settings;

#[derive(Parser, Debug)]
#[command(about = "Drive a rover from the terminal")]
struct Args {
    /// Settings file (TOML); missing is fine.
    #[arg(long, default_value = "teleop.toml")]
    config: PathBuf,
    #[arg(long)]
    rover_url: Option<String>,
    #[arg(long)]
    subprotocol: Option<String>,
    #[arg(long)]
    tick_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config)?;
    if let Some(url) = args.rover_url {
        settings.rover_url = url;
    }
    if let Some(subprotocol) = args.subprotocol {
        settings.subprotocol = subprotocol;
    }
    if let Some(tick_ms) = args.tick_ms {
        settings.tick_ms = tick_ms;
    }
    settings.validate()?;

    let channel = CommandChannel::new(
        Arc::new(WebSocketConnector),
        settings.rover_url.clone(),
        settings.subprotocol.clone(),
    );
    let mut queue = CommandQueue::new(channel, settings.queue_options());
    let mut events = BroadcastStream::new(queue.subscribe());
    queue.start();
    info!(url = %settings.rover_url, tick_ms = settings.tick_ms, "teleop: started");
    println!("{}", commands::HELP);

    let mut ticker = tokio::time::interval(settings.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut input = InputState::default();
    let mut halting: Option<HaltHandle> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                queue.tick();
                if let Some(handle) = halting.as_mut() {
                    if let Some(outcome) = handle.try_outcome() {
                        match outcome {
                            Ok(()) => println!("halted"),
                            Err(err) => println!("halt failed: {err}"),
                        }
                        halting = None;
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match commands::parse(&line) {
                    Ok(Some(command)) => match execute(&mut queue, &mut input, command) {
                        Outcome::Done(message) => println!("{message}"),
                        Outcome::Halting(handle) => halting = Some(handle),
                        Outcome::Quit => break,
                    },
                    Ok(None) => {}
                    Err(err) => println!("{err}"),
                }
            }
            Some(event) = events.next() => match event {
                Ok(event) => report(&event, &input),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "teleop: event stream lagged");
                }
            },
        }
    }

    shutdown(&mut queue, settings.tick_period()).await;
    Ok(())
}

fn report(event: &RoverEvent, input: &InputState) {
    match event {
        RoverEvent::Connection(state) => println!("link: {state:?}"),
        RoverEvent::Error(message) => println!("error: {message}"),
        RoverEvent::Settings { payload, .. } => println!("settings: {payload}"),
        RoverEvent::Telemetry {
            payload,
            received_at,
        } => {
            if input.watch_telemetry {
                println!("[{}] {payload}", received_at.format("%H:%M:%S%.3f"));
            }
        }
    }
}

/// Stops the rover before exiting. The halt handle always settles because
/// it carries its own deadline.
async fn shutdown(queue: &mut CommandQueue, period: Duration) {
    let mut handle = queue.halt();
    let mut ticker = tokio::time::interval(period);
    let outcome = loop {
        ticker.tick().await;
        queue.tick();
        if let Some(outcome) = handle.try_outcome() {
            break outcome;
        }
    };
    match outcome {
        Ok(()) => info!("teleop: rover halted, exiting"),
        Err(err) => warn!(error = %err, "teleop: exiting without a confirmed halt"),
    }
    queue.stop();
    queue.channel_mut().stop();
}
