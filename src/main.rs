//! Console driver for the robot link.
//! Stands in for the UI collaborator: drives the link manager from stdin
//! commands and prints link events and status changes as JSON lines.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use domino_link::{BluestRadio, DriveStep, LinkConfig, LinkManager};
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

const USAGE: &str = "commands:
  scan                 discover the robot and connect
  cancel               cancel a scan in progress
  drive <deg>          steer (-90..90) and start moving
  stop                 stop moving
  dispense on|off      toggle dispensing
  path <d,a> [d,a ..]  send a drive path, e.g. path 100,0 50,90 75,180
  status               print the last status snapshot
  disconnect           drop the session and forget the robot
  quit";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => LinkConfig::load(Path::new(&path)).await?,
        None => LinkConfig::default(),
    };

    let radio = Arc::new(BluestRadio::new().await?);
    let link = LinkManager::new(radio, config);

    let mut events = link.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!("link event: {}", json),
                Err(e) => error!("Failed to serialize link event: {}", e),
            }
        }
    });

    let mut status = link.subscribe_status();
    tokio::spawn(async move {
        while let Ok(snapshot) = status.recv().await {
            match serde_json::to_string(&snapshot) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to serialize status: {}", e),
            }
        }
    });

    println!("{}", USAGE);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("scan") => {
                let link = link.clone();
                tokio::spawn(async move {
                    if let Err(e) = link.start_scan().await {
                        error!("Connect failed: {}", e);
                    }
                });
            }
            Some("cancel") => link.cancel_scan(),
            Some("drive") => {
                let Some(degrees) = words.next().and_then(|w| w.parse::<i8>().ok()) else {
                    println!("usage: drive <-90..90>");
                    continue;
                };
                {
                    let snapshot = link.status.snapshot();
                    let mut manual = link.manual.lock().await;
                    manual.update_from_status(&snapshot);
                    manual.moving = true;
                    manual.direction = degrees.clamp(-90, 90);
                }
                link.send_manual(true).await?;
            }
            Some("stop") => {
                {
                    let snapshot = link.status.snapshot();
                    let mut manual = link.manual.lock().await;
                    manual.update_from_status(&snapshot);
                    manual.moving = false;
                }
                link.send_manual(true).await?;
            }
            Some("dispense") => {
                let enabled = match words.next() {
                    Some("on") => true,
                    Some("off") => false,
                    _ => {
                        println!("usage: dispense on|off");
                        continue;
                    }
                };
                {
                    let snapshot = link.status.snapshot();
                    let mut manual = link.manual.lock().await;
                    manual.update_from_status(&snapshot);
                    manual.dispensing = enabled;
                }
                link.send_manual(true).await?;
            }
            Some("path") => {
                let mut path = Vec::new();
                let mut ok = true;
                for word in words {
                    match parse_step(word) {
                        Some(step) => path.push(step),
                        None => {
                            println!("bad step '{}', expected <distance>,<angle>", word);
                            ok = false;
                            break;
                        }
                    }
                }
                if !ok {
                    continue;
                }
                link.draw.lock().await.set_path(path);
                link.send_draw().await?;
            }
            Some("status") => match serde_json::to_string(&link.status.snapshot()) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to serialize status: {}", e),
            },
            Some("disconnect") => link.disconnect().await?,
            Some("quit") | Some("exit") => break,
            Some(_) => println!("{}", USAGE),
            None => {}
        }
    }

    link.disconnect().await?;
    Ok(())
}

fn parse_step(word: &str) -> Option<DriveStep> {
    let (distance, angle) = word.split_once(',')?;
    let distance = distance.parse::<u16>().ok()?;
    let angle = angle.parse::<u16>().ok()?;
    (angle < 360).then(|| DriveStep::new(distance, angle))
}
