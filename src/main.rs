//! Command-line front end for a shared certificate directory.
//!
//! Exit codes: 0 success, 2 not found, 5 I/O error, 30 store cannot be
//! opened, 1 anything else. Logs go to stderr (`RUST_LOG` controls the
//! level); command output and merge summaries go to stdout.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use pgp_certd::{
    generate_trust_root, merge, override_with_update, resolve_base_dir, CertificateDirectory,
    Error, Fingerprint, KeyMaterial, KeyMaterialCodec, PgpCodec, SpecialName, SubkeyId,
};

#[derive(Debug, Parser)]
#[command(name = "pgp-certd", version, about = "Manage a shared OpenPGP certificate directory")]
struct Cli {
    /// Store location (defaults to $PGP_CERT_D, then the platform data dir)
    #[arg(short, long, global = true, value_name = "DIRECTORY")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the certificate or key stored under a fingerprint or special name
    Get {
        /// ASCII-armor the output
        #[arg(short, long)]
        armor: bool,

        /// Fingerprint or special name (e.g. trust-root)
        identifier: String,
    },

    /// Insert or merge one certificate read from stdin
    Insert,

    /// Insert or merge every certificate of a keyring read from stdin
    Import,

    /// Print every stored certificate and key
    Export {
        /// ASCII-armor the output
        #[arg(short, long)]
        armor: bool,
    },

    /// List the fingerprints of all stored material
    List,

    /// Find certificates containing a key id or fingerprint
    Find {
        /// 16 hex digit key id, or a fingerprint
        identifier: String,
    },

    /// Create or import the trust-root key
    Setup {
        /// Protect the generated trust-root with a password
        #[arg(long, value_name = "PASSWORD", conflicts_with = "import_from_stdin")]
        with_password: Option<String>,

        /// Import the trust-root secret key from stdin instead of generating one
        #[arg(long)]
        import_from_stdin: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.downcast_ref::<Error>().map(Error::exit_code).unwrap_or(1);
            match err.downcast_ref::<Error>() {
                Some(e) if e.is_not_found() => tracing::debug!("{:#}", err),
                _ => eprintln!("Error: {:#}", err),
            }
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let base_dir = resolve_base_dir(cli.store.as_deref())?;
    let dir = CertificateDirectory::open(&base_dir)?
        .with_change_observer(|change| println!("{}", change));
    tracing::debug!(store = %base_dir.display(), command = ?cli.command, "running");

    match cli.command {
        Command::Get { armor, identifier } => {
            let material = if SpecialName::lookup(&identifier).is_some() {
                dir.get_by_special_name(&identifier)?
            } else {
                dir.get(&identifier)?
            };
            write_material(&material, armor)?;
        }

        Command::Insert => {
            let input = read_stdin()?;
            let stored = dir.insert(&input, &merge)?;
            tracing::info!(fingerprint = %stored.fingerprint(), "inserted");
        }

        Command::Import => {
            let input = read_stdin()?;
            let outcomes = dir.import(&input, &merge)?;

            let mut failed = 0;
            for (n, outcome) in outcomes.iter().enumerate() {
                match outcome {
                    Ok(material) => eprintln!("Imported {}", material.fingerprint()),
                    Err(e) => {
                        failed += 1;
                        eprintln!("Skipped item {}: {}", n + 1, e);
                    }
                }
            }
            if failed > 0 {
                return Err(anyhow!("{} of {} items could not be imported", failed, outcomes.len()));
            }
        }

        Command::Export { armor } => {
            for material in dir.items()? {
                write_material(&material?, armor)?;
            }
        }

        Command::List => {
            for fingerprint in dir.fingerprints()? {
                println!("{}", fingerprint?);
            }
        }

        Command::Find { identifier } => {
            let subkey = parse_key_identifier(&identifier)?;
            for fingerprint in dir.find_by_subkey_id(subkey)? {
                println!("{}", fingerprint);
            }
        }

        Command::Setup {
            with_password,
            import_from_stdin,
        } => {
            let trust_root = if import_from_stdin {
                let material = PgpCodec::new().decode(&read_stdin()?)?;
                if !material.is_key() {
                    return Err(Error::BadData("trust-root must be a secret key".to_string()).into());
                }
                material
            } else {
                let password = with_password.map(|p| SecretString::new(p.trim().to_string()));
                generate_trust_root(password.as_ref())?
            };

            let stored = dir.insert_with_special_name(
                SpecialName::TrustRoot.as_str(),
                trust_root.bytes(),
                &override_with_update,
            )?;
            println!("{}", stored.fingerprint());
        }
    }

    Ok(())
}

/// A long key id, or a fingerprint whose key id is derived.
fn parse_key_identifier(identifier: &str) -> pgp_certd::Result<SubkeyId> {
    let identifier = identifier.trim();
    match Fingerprint::parse(identifier) {
        Ok(fingerprint) => Ok(fingerprint.key_id()),
        Err(_) => SubkeyId::parse(identifier),
    }
}

fn read_stdin() -> anyhow::Result<Vec<u8>> {
    let mut input = Vec::new();
    std::io::stdin()
        .lock()
        .read_to_end(&mut input)
        .context("reading stdin")?;
    Ok(input)
}

fn write_material(material: &KeyMaterial, armor: bool) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    if armor {
        out.write_all(PgpCodec::new().armor(material)?.as_bytes())?;
    } else {
        out.write_all(material.bytes())?;
    }
    out.flush()?;
    Ok(())
}
