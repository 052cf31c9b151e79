//! Monitor a mixing server from the command line
//!
//! ```text
//! cargo run --example monitor -- 192.168.1.20 9000 0,1,4
//! ```
//!
//! With the `audio-cpal` feature the mix plays on the default output
//! device; otherwise audio is rendered into in-memory rings and only the
//! meter levels are printed.

use std::sync::Arc;

use stagelink::audio::dsp::linear_to_db;
use stagelink::{ClientEvent, FileStore, LinkConfig, MonitorClient, RenderMode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stagelink=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().map_or(Ok(9000), |p| p.parse())?;
    let channels: Vec<u32> = args
        .next()
        .unwrap_or_else(|| "0,1".to_string())
        .split(',')
        .map(str::parse)
        .collect::<Result<_, _>>()?;

    let config = LinkConfig::builder()
        .render_mode(RenderMode::MixedStereo)
        .build();
    let store = FileStore::new(std::env::temp_dir().join("stagelink-monitor.json")).await?;
    let builder = MonitorClient::builder()
        .config(config)
        .store(Box::new(store));

    #[cfg(feature = "audio-cpal")]
    let builder = {
        let output = Arc::new(stagelink::audio::CpalOutput::new(None, 48_000, 0.8));
        output.start()?;
        builder.backend(output)
    };
    #[cfg(not(feature = "audio-cpal"))]
    let builder = builder.backend(Arc::new(stagelink::RingBufferBackend::new()));

    let client = builder.build().await?;
    println!("Client id: {}", client.client_id());

    let mut events = client.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::ConnectionStatus { message, .. } => println!("Link: {message}"),
                ClientEvent::Connected { server, reconnected } => {
                    let how = if reconnected { "Reconnected" } else { "Connected" };
                    println!("{how} to {server}");
                }
                ClientEvent::ServerInfo(info) => {
                    println!(
                        "Server mixes {} channels at {} Hz",
                        info.max_channels, info.sample_rate
                    );
                }
                ClientEvent::Reconnecting { attempt, delay } => {
                    println!("Reconnecting (attempt {attempt}) in {delay:?}");
                }
                ClientEvent::SubscriptionConfirmed { channels } => {
                    println!("Subscribed to {channels:?}");
                }
                ClientEvent::AudioMeter { levels } => {
                    let line: Vec<String> = levels
                        .iter()
                        .map(|(ch, peak)| format!("{ch}:{:>6.1}dB", linear_to_db(*peak)))
                        .collect();
                    println!("{}", line.join("  "));
                }
                ClientEvent::StreamActive => println!("Audio flowing"),
                ClientEvent::StreamIdle => println!("Audio idle"),
                ClientEvent::Error { message, recoverable } => {
                    eprintln!("Error: {message} (recoverable: {recoverable})");
                }
                _ => {}
            }
        }
    });

    client.connect(&host, port).await?;
    client.subscribe(&channels).await?;
    println!("Monitoring. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    client.shutdown().await;
    Ok(())
}
