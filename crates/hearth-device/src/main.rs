//! Interactive device client.
//!
//! Connects to the server, runs the handshake (the one-time code is typed
//! in when it arrives out-of-band), then accepts commands:
//!
//! ```text
//! CREATE <domain>
//! ADD <user> <domain> <password>
//! RD <domain>
//! ET <float>
//! EI <file>
//! RT <domain>
//! RI <user>:<device>
//! MYDOMAINS
//! EXIT
//! ```

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

use hearth_shared::types::UserId;

use hearth_device::auth::{authenticate, OtpPrompt};
use hearth_device::commands::DeviceSession;
use hearth_device::error::DeviceError;
use hearth_device::keystore::{load_or_generate_identity, KeyParamsStore};

#[derive(Parser, Debug)]
#[command(name = "hearth-device", about = "hearth device client")]
struct Args {
    /// Server address.
    #[arg(long, default_value = "127.0.0.1:7878", env = "HEARTH_SERVER")]
    server: String,

    /// User id to authenticate as.
    #[arg(long)]
    user: String,

    /// Device id of this client.
    #[arg(long)]
    device: String,

    /// Identity keyfile; generated on first run.
    #[arg(long, default_value = "device_key.json")]
    keyfile: PathBuf,

    /// Derivation-parameter cache for domain keys.
    #[arg(long, default_value = "domain_key_params")]
    params_file: PathBuf,

    /// Executable to attest. Defaults to the running binary.
    #[arg(long)]
    exec: Option<PathBuf>,
}

/// Reads the one-time code and the retry decision from stdin.
struct StdinPrompt;

impl OtpPrompt for StdinPrompt {
    fn code(&mut self) -> String {
        prompt_line("Enter the code sent to you: ")
    }

    fn retry(&mut self) -> bool {
        let answer = prompt_line("Code rejected. Try again? (Y/N): ");
        !answer.trim().eq_ignore_ascii_case("n")
    }
}

fn prompt_line(message: &str) -> String {
    print!("{message}");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);
    line.trim().to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let user_id = UserId(args.user.clone());

    let identity = load_or_generate_identity(&args.keyfile)?;
    let exec_path = match &args.exec {
        Some(path) => path.clone(),
        None => std::env::current_exe()?,
    };
    let executable = std::fs::read(&exec_path)?;

    let mut stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {}", args.server);

    authenticate(
        &mut stream,
        &identity,
        &user_id,
        &args.device,
        &executable,
        &mut StdinPrompt,
    )
    .await?;
    println!("Authenticated as {}:{}", args.user, args.device);

    let mut session = DeviceSession::new(
        stream,
        identity,
        KeyParamsStore::new(&args.params_file),
    );

    loop {
        let line = prompt_line("> ");
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default().to_uppercase();

        let outcome = match command.as_str() {
            "CREATE" => match parts.next() {
                Some(domain) => session.create_domain(domain).await,
                None => usage("CREATE <domain>"),
            },
            "ADD" => match (parts.next(), parts.next(), parts.next()) {
                (Some(user), Some(domain), Some(password)) => {
                    session.add_user(&UserId::from(user), domain, password).await
                }
                _ => usage("ADD <user> <domain> <password>"),
            },
            "RD" => match parts.next() {
                Some(domain) => session.register_device(domain).await,
                None => usage("RD <domain>"),
            },
            "ET" => match parts.next().and_then(|v| v.parse::<f32>().ok()) {
                Some(value) => session.push_temperature(value).await,
                None => usage("ET <float>"),
            },
            "EI" => match parts.next() {
                Some(file) => match std::fs::read(file) {
                    Ok(bytes) => session.push_image(&bytes).await,
                    Err(e) => {
                        println!("Cannot read {file}: {e}");
                        Ok(())
                    }
                },
                None => usage("EI <file>"),
            },
            "RT" => match parts.next() {
                Some(domain) => match session.get_temperatures(domain).await {
                    Ok(readings) => {
                        for (device, value) in readings {
                            println!("{device} - {value}");
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                None => usage("RT <domain>"),
            },
            "RI" => match parts.next().and_then(|s| s.split_once(':')) {
                Some((user, device)) if !device.is_empty() => {
                    match session.get_image(user, device).await {
                        Ok(bytes) => {
                            let file = format!("{user}_{device}.jpg");
                            std::fs::write(&file, &bytes)?;
                            println!("Image saved to {file} ({} bytes)", bytes.len());
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
                _ => usage("RI <user>:<device>"),
            },
            "MYDOMAINS" => match session.my_domains().await {
                Ok(entries) => {
                    for entry in entries {
                        println!("{}", entry.domain);
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            },
            "EXIT" => {
                session.bye().await?;
                println!("Bye");
                return Ok(());
            }
            other => {
                println!("Unknown command: {other}");
                Ok(())
            }
        };

        match outcome {
            Ok(()) => println!("Response: OK"),
            Err(DeviceError::Rejected(code)) => println!("Response: {code}"),
            Err(e) => return Err(e.into()),
        }
    }
}

fn usage(expected: &str) -> Result<(), DeviceError> {
    println!("Usage: {expected}");
    Ok(())
}
