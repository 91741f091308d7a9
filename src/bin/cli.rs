use clap::Parser;
use pipedis::config::{DEFAULT_HOST, DEFAULT_PORT};
use pipedis::{Client, ClientConfig, ClientOptions, Cmd, Error};
use tracing::debug;

/// Run one command against a Redis server and print the reply.
#[derive(Parser, Debug)]
struct Args {
    /// Server hostname
    #[arg(long, env = "PIPEDIS_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(short, long, env = "PIPEDIS_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Database number
    #[arg(short = 'n', long)]
    db: Option<i64>,

    /// The command and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let args = Args::parse();

    let config = ClientConfig::from(ClientOptions {
        host: Some(args.host),
        port: Some(args.port),
        // One-shot invocation: fail fast instead of waiting for the server to come back.
        max_reconnection_attempts: Some(0),
        ..Default::default()
    });
    let client = Client::connect(config).await?;

    if let Some(db) = args.db {
        client.send(Cmd::new("select").arg(db)).await?;
    }

    let (name, rest) = args
        .command
        .split_first()
        .ok_or("missing command name")?;
    let reply = client.send(Cmd::new(name).args(rest)).await;

    client.close();

    match reply {
        Ok(value) => {
            println!("{}", value);
            Ok(())
        }
        Err(err) => {
            println!("(error) {}", err);
            Err(err.into())
        }
    }
}
