use std::{
    error::Error,
    io::{self, Write},
};

use clap::{Parser, Subcommand};
use sdms::{
    ClientCommand, PromptError,
    protocol::{self, ClientError, FacilityClient},
};

#[derive(Parser)]
#[command(version, about = "SDMS facility client", long_about = None)]
struct Cli {
    /// Server host
    #[arg(long, default_value = "localhost")]
    host: String,
    /// Server port
    #[arg(short, long, default_value_t = 5800)]
    port: u16,
    /// Reply timeout in seconds
    #[arg(short, long, default_value_t = 30)]
    timeout: u32,
    #[command(subcommand)]
    command: Option<Request>,
}

#[derive(Subcommand)]
enum Request {
    /// Check the server is reachable
    Ping,
    /// Print the server's service status
    Status,
    /// Send text and print the echo
    Text { message: String },
}

impl From<Request> for ClientCommand {
    fn from(value: Request) -> Self {
        match value {
            Request::Ping => ClientCommand::Ping,
            Request::Status => ClientCommand::Status,
            Request::Text { message } => ClientCommand::Text(message),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let timeout_ms = cli.timeout.saturating_mul(1000);
    let mut client = FacilityClient::connect(&cli.host, cli.port, timeout_ms, protocol::registry()?)?;

    if let Some(request) = cli.command {
        let out = execute(&mut client, request.into())?;
        println!("{out}");
        return Ok(());
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        let cmd = match sdms::prompt(stdin.lock(), &mut stdout) {
            Ok(ClientCommand::Exit) | Err(PromptError::Closed) => break,
            Ok(cmd) => cmd,
            Err(PromptError::Command(e)) => {
                eprintln!("error: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        match execute(&mut client, cmd) {
            Ok(out) => println!("{out}"),
            Err(e) => eprintln!("request failed: {e}"),
        }
    }
    stdout.flush()?;

    Ok(())
}

fn execute(client: &mut FacilityClient, cmd: ClientCommand) -> Result<String, ClientError> {
    match cmd {
        ClientCommand::Ping => client.ping().map(|_| "pong".to_string()),
        ClientCommand::Status => client.status().map(|status| status.to_string()),
        ClientCommand::Text(text) => client.text(&text),
        ClientCommand::Exit => Ok(String::new()),
    }
}
