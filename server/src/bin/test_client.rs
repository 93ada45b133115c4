use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use shared::{ClientMessage, Direction, JoinGame, MovePaddle, ServerMessage, UserConnect};
use std::time::Duration;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Joins the queue, plays a few paddle moves and prints what the server sends.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server WebSocket URL
    #[clap(short, long, default_value = "ws://127.0.0.1:8080")]
    url: String,
    /// Player id announced to the server
    #[clap(short, long, default_value = "1")]
    id: u64,
    /// Display name
    #[clap(short, long, default_value = "tester")]
    name: String,
    /// Number of paddle moves to send once the match starts
    #[clap(short, long, default_value = "20")]
    moves: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.url);
    let (ws, _) = connect_async(args.url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();

    let hello = ClientMessage::UserConnect(UserConnect {
        user_id: args.id,
        username: args.name.clone(),
        game_mode: None,
        options: Default::default(),
        team1_players: None,
        team2_players: None,
    });
    sink.send(Message::Text(hello.to_json()?)).await?;

    let join = ClientMessage::JoinGame(JoinGame::new(args.id, args.name.clone()));
    sink.send(Message::Text(join.to_json()?)).await?;
    println!("Joined the queue as {} (#{})", args.name, args.id);

    let mut sent_moves = 0;
    let mut snapshots = 0u64;

    while let Some(frame) = stream.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let message = match ServerMessage::from_json(&text) {
            Ok(message) => message,
            Err(e) => {
                println!("Failed to decode server message: {}", e);
                continue;
            }
        };

        match message {
            ServerMessage::GameState(snapshot) => {
                snapshots += 1;
                // Print a sample instead of every frame
                if snapshots % 30 == 1 {
                    println!(
                        "[{:?}] ball=({:.0}, {:.0}) score {}-{}",
                        snapshot.game_state,
                        snapshot.ball.x,
                        snapshot.ball.y,
                        snapshot.scores.player1,
                        snapshot.scores.player2
                    );
                }
                if sent_moves < args.moves && snapshots % 10 == 0 {
                    let direction = if sent_moves % 2 == 0 {
                        Direction::Up
                    } else {
                        Direction::Down
                    };
                    let command = ClientMessage::MovePaddle(MovePaddle {
                        direction,
                        player_id: Some(args.id),
                        side: None,
                        paddle_index: None,
                    });
                    sink.send(Message::Text(command.to_json()?)).await?;
                    sent_moves += 1;
                }
            }
            ServerMessage::GameEnd {
                winner,
                scores,
                reason,
                ..
            } => {
                println!(
                    "Game over: winner #{} ({}-{}) {:?}",
                    winner, scores.player1, scores.player2, reason
                );
                break;
            }
            other => println!("Received: {:?}", other),
        }
    }

    sink.send(Message::Text(ClientMessage::Disconnect.to_json()?))
        .await
        .ok();
    sleep(Duration::from_millis(100)).await;
    println!("Test client finished");
    Ok(())
}
