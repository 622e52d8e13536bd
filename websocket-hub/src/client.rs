use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::{cli::ClientArgs, message::ClientPayload};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let mut socket = establish_connection(&args).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&mut socket, &mut stdin, &mut input, args.structured).await?;
    shutdown_connection(&mut socket).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<Socket> {
    let (socket, _response) = connect_async(args.server.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);
    Ok(socket)
}

async fn run_client_loop(
    socket: &mut Socket,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
    structured: bool,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            server_message = socket.next() => {
                if !handle_server_message(server_message).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, socket, structured).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_message(
    message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
) -> Result<bool> {
    match message {
        Some(Ok(Message::Text(text))) => {
            write_stdout(&text).await?;
            Ok(true)
        }
        Some(Ok(Message::Close(_))) | None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
        Some(Ok(_)) => Ok(true),
        Some(Err(err)) => Err(err).context("failed to read from hub"),
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    socket: &mut Socket,
    structured: bool,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving hub").await?;
        return Ok(false);
    }

    let payload = if structured {
        ClientPayload::structured(text)
    } else {
        ClientPayload::text(text)
    };
    let encoded = serde_json::to_string(&payload)?;
    socket.send(Message::text(encoded)).await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(socket: &mut Socket) {
    if let Err(error) = socket.close(None).await {
        warn!(?error, "failed to close websocket cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
