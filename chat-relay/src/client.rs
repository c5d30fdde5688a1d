use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ClientArgs,
    codec::{DEFAULT_LINE_LIMIT, Framing, MessageReader},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (reader, mut writer) = establish_connection(&args).await?;
    write_stdout(&format!("*** connected to {}", args.server_addr())).await?;

    // Inbound messages get their own task so a half-read frame is never
    // abandoned when stdin wins a select.
    let mut inbound = tokio::spawn(print_inbound(reader));
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&mut inbound, &mut writer, &mut stdin, &mut input, args.name.as_deref()).await?;
    shutdown_connection(&mut writer).await;
    inbound.abort();

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
    let addr = args.server_addr();
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    info!("connected to {}", addr);
    Ok(stream.into_split())
}

async fn run_client_loop(
    inbound: &mut JoinHandle<Result<()>>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
    name: Option<&str>,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            finished = &mut *inbound => {
                finished.context("inbound task failed")??;
                write_stdout("*** relay closed the connection").await?;
                break;
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, writer, name).await? {
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

async fn print_inbound(reader: OwnedReadHalf) -> Result<()> {
    let mut inbox = MessageReader::new(reader, Framing::Lines, DEFAULT_LINE_LIMIT);
    while let Some(message) = inbox.next_message().await? {
        write_stdout(&String::from_utf8_lossy(&message)).await?;
    }
    Ok(())
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
    name: Option<&str>,
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
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    let message = Bytes::from(compose(name, text));
    writer.write_all(&Framing::Lines.encode(&message)).await?;
    writer.flush().await?;
    debug!(bytes = message.len(), "message sent");
    Ok(true)
}

/// Formats an outgoing line the way other participants will see it.
pub fn compose(name: Option<&str>, text: &str) -> String {
    match name {
        Some(name) => format!("{name}: {text}"),
        None => text.to_string(),
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
