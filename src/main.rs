use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use frontdesk_voice::audio::AlsaBackend;
use frontdesk_voice::{Config, SessionController, VoiceMode, WsEndpoint};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::from_env();
    if config.api_key.is_none() {
        eprintln!("Warning: FRONTDESK_API_KEY is not set; start will be refused.");
    }

    let endpoint = Arc::new(WsEndpoint::new(config.endpoint_url.clone()));
    let backend = Arc::new(AlsaBackend);
    let (controller, handle) = SessionController::new(config, endpoint, backend);
    tokio::spawn(controller.run());

    println!("Watson's front-desk voice demo.");
    println!("Commands: start | stop | mode reception | mode emergency | status | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!("Shutting down...");
                handle.stop().await;
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "start" => handle.start().await,
                    "stop" => handle.stop().await,
                    "mode reception" => handle.switch_mode(VoiceMode::Reception).await,
                    "mode emergency" => handle.switch_mode(VoiceMode::Emergency).await,
                    "status" => {
                        let status = handle.status();
                        println!(
                            "state={:?} mode={} volume={:.2} last_error={}",
                            status.state,
                            status.mode,
                            status.volume,
                            status
                                .last_error
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| "none".to_string()),
                        );
                    }
                    "quit" | "exit" => {
                        handle.stop().await;
                        break;
                    }
                    other => println!("Unknown command: {}", other),
                }
            }
        }
    }
    Ok(())
}
