//! vaultsync-crypt - reference encrypt/decrypt utility
//!
//! Reads plaintext from standard input and writes the encrypted
//! stream to standard output; `-d` flips the direction. Uses a
//! build-time key, so this is a format reference and test vehicle,
//! not a secure tool.

use clap::Parser;
use std::io::{self, Cursor, Read};
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;
use vaultsync::config::EncryptionConfig;
use vaultsync::crypto::stream::{StreamDecrypter, StreamEncrypter};
use vaultsync::crypto::KEY_SIZE;
use vaultsync::Result;

/// Build-time key; matches what the integration fixtures were
/// generated with.
const BUILD_KEY: &[u8; KEY_SIZE] = b"01234567890ABCDE01234567890ABCDE";

#[derive(Parser)]
#[command(name = "vaultsync-crypt")]
#[command(version = "0.1.0")]
#[command(about = "Encrypt stdin to stdout (or decrypt with -d)")]
struct Cli {
    /// Decrypt instead of encrypting
    #[arg(short = 'd', long)]
    decrypt: bool,

    /// Enable verbose logging (to stderr)
    #[arg(short, long)]
    verbose: bool,
}

fn encrypt_stdin() -> Result<()> {
    let config = EncryptionConfig::default();
    let stdout = io::stdout();
    let mut encrypter = StreamEncrypter::new(stdout.lock(), BUILD_KEY, &config)?;

    io::copy(&mut io::stdin().lock(), &mut encrypter)?;
    encrypter.finish()?;
    Ok(())
}

fn decrypt_stdin() -> Result<()> {
    let config = EncryptionConfig::default();

    // The decrypter needs a seekable source; stdin is not one.
    let mut ciphertext = Vec::new();
    io::stdin().lock().read_to_end(&mut ciphertext)?;
    let mut decrypter = StreamDecrypter::new(Cursor::new(ciphertext), BUILD_KEY, &config)?;

    io::copy(&mut decrypter, &mut io::stdout().lock())?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to initialize logging");
    }

    let result = if cli.decrypt {
        decrypt_stdin()
    } else {
        encrypt_stdin()
    };

    if let Err(err) = result {
        error!("{}", err);
        std::process::exit(1);
    }
}
