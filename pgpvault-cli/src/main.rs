mod paths;

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use pgpvault_core::{FileStorage, Storage};
use pgpvault_pgp::{KeyService, ServiceConfig};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use paths::{Operation, Request, Response, Router};

#[derive(Parser, Debug)]
#[command(name = "pgpvault", version, about = "Store and normalize named OpenPGP keys")]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "PGPVAULT_HOME",
        value_name = "DIR",
        help = "Key store directory"
    )]
    home: Option<PathBuf>,

    #[arg(
        long = "allow-insecure-home",
        global = true,
        help = "Accept a relative store directory (testing only)"
    )]
    allow_insecure_home: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored key names.
    #[command(alias = "ls")]
    List,
    /// Print fingerprint, public key and exportable flag of a key.
    Read { name: String },
    /// Generate a key, or import one with --key-file.
    #[command(alias = "gen")]
    Create {
        name: String,
        #[arg(long)]
        real_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        key_bits: Option<u64>,
        #[arg(
            long,
            value_name = "FILE",
            help = "Armored private key to import (`-` for stdin)"
        )]
        key_file: Option<String>,
        #[arg(long)]
        exportable: bool,
    },
    #[command(alias = "rm")]
    Delete { name: String },
    /// Describe the request paths and their fields.
    Paths,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let home = resolve_home(cli.home.clone());
    if cli.allow_insecure_home && !home.is_absolute() {
        eprintln!(
            "warning: store directory {} is relative and --allow-insecure-home was used; only use this for testing",
            home.display()
        );
    }
    tracing::debug!(home = %home.display(), "opening key store");
    let storage: Arc<dyn Storage> =
        Arc::new(FileStorage::new(home).allow_insecure_home(cli.allow_insecure_home));
    let router = Router::new(KeyService::with_config(storage, ServiceConfig::default()));

    let request = match cli.cmd {
        Command::Paths => {
            print!("{}", router.help());
            return Ok(());
        }
        Command::List => Request::new(Operation::List, "keys/"),
        Command::Read { name } => Request::new(Operation::Read, format!("keys/{name}")),
        Command::Delete { name } => Request::new(Operation::Delete, format!("keys/{name}")),
        Command::Create {
            name,
            real_name,
            email,
            comment,
            key_bits,
            key_file,
            exportable,
        } => {
            let mut data = Map::new();
            let identity = [("real_name", real_name), ("email", email), ("comment", comment)];
            for (field, value) in identity {
                if let Some(value) = value {
                    data.insert(field.to_string(), Value::String(value));
                }
            }
            if let Some(bits) = key_bits {
                data.insert("key_bits".to_string(), Value::from(bits));
            }
            if let Some(path) = key_file {
                let armored = String::from_utf8(read_key_input(&path)?)
                    .map_err(|err| anyhow!("key file must be valid UTF-8: {err}"))?;
                data.insert("key".to_string(), Value::String(armored));
                data.insert("generate".to_string(), Value::Bool(false));
            }
            data.insert("exportable".to_string(), Value::Bool(exportable));
            Request::new(Operation::Update, format!("keys/{name}")).with_data(data)
        }
    };

    let operation = request.operation;
    let path = request.path.clone();
    match router.handle(&request)? {
        Response::Data(body) => {
            let mut stdout = io::stdout();
            serde_json::to_writer_pretty(&mut stdout, &body)?;
            writeln!(stdout)?;
        }
        Response::Empty if operation == Operation::Read => {
            return Err(anyhow!("no key at {path}"));
        }
        Response::Empty => {}
        Response::Error(message) => return Err(anyhow!(message)),
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn resolve_home(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| dirs::data_dir().map(|dir| dir.join("pgpvault")))
        .unwrap_or_else(|| PathBuf::from(".pgpvault"))
}

fn max_import_bytes() -> Result<usize> {
    const DEFAULT_LIMIT: usize = 16 * 1024 * 1024;
    match std::env::var("PGPVAULT_MAX_IMPORT_BYTES") {
        Ok(value) => value
            .parse::<usize>()
            .map_err(|err| anyhow!("invalid PGPVAULT_MAX_IMPORT_BYTES value {value:?}: {err}")),
        Err(_) => Ok(DEFAULT_LIMIT),
    }
}

fn read_key_input(path: &str) -> Result<Vec<u8>> {
    let limit = max_import_bytes()?;
    if path == "-" {
        return read_to_end_limited(io::stdin(), limit);
    }
    let metadata = fs::metadata(path).with_context(|| format!("cannot read key file {path}"))?;
    if metadata.len() > limit as u64 {
        return Err(anyhow!(
            "key file exceeds size limit ({limit} bytes); set PGPVAULT_MAX_IMPORT_BYTES to override"
        ));
    }
    let file = fs::File::open(path)?;
    read_to_end_limited(file, limit)
}

fn read_to_end_limited<R: Read>(mut reader: R, limit: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        if buf.len() + read > limit {
            return Err(anyhow!(
                "key input exceeds size limit ({limit} bytes); set PGPVAULT_MAX_IMPORT_BYTES to override"
            ));
        }
        buf.extend_from_slice(&chunk[..read]);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_var<F: FnOnce()>(key: &str, value: Option<&str>, f: F) {
        let _lock = ENV_LOCK.lock().expect("env lock poisoned");
        let prev = std::env::var_os(key);
        // Safety: tests serialize env changes via ENV_LOCK.
        unsafe {
            match value {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
        f();
        // Safety: tests serialize env changes via ENV_LOCK.
        unsafe {
            match prev {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
    }

    #[test]
    fn max_import_bytes_env_override() {
        with_env_var("PGPVAULT_MAX_IMPORT_BYTES", Some("1234"), || {
            assert_eq!(max_import_bytes().expect("limit"), 1234);
        });
        with_env_var("PGPVAULT_MAX_IMPORT_BYTES", None, || {
            assert_eq!(max_import_bytes().expect("limit"), 16 * 1024 * 1024);
        });
    }

    #[test]
    fn max_import_bytes_invalid_env() {
        with_env_var("PGPVAULT_MAX_IMPORT_BYTES", Some("lots"), || {
            let err = max_import_bytes().expect_err("expected error");
            assert!(err.to_string().contains("invalid PGPVAULT_MAX_IMPORT_BYTES"));
        });
    }

    #[test]
    fn read_to_end_limited_enforces_limit() {
        let data = vec![7u8; 10];
        let err = read_to_end_limited(Cursor::new(data.clone()), 5).expect_err("limit");
        assert!(err.to_string().contains("exceeds size limit"));
        assert_eq!(read_to_end_limited(Cursor::new(data), 10).expect("read").len(), 10);
    }

    #[test]
    fn explicit_home_wins() {
        let home = resolve_home(Some(PathBuf::from("/tmp/vault-home")));
        assert_eq!(home, PathBuf::from("/tmp/vault-home"));
    }

    #[test]
    fn cli_parses_create_flags() {
        let cli = Cli::try_parse_from([
            "pgpvault",
            "--home",
            "/tmp/x",
            "create",
            "signing",
            "--real-name",
            "Alice",
            "--key-bits",
            "3072",
            "--exportable",
        ])
        .expect("parse");
        match cli.cmd {
            Command::Create {
                name,
                real_name,
                key_bits,
                exportable,
                key_file,
                ..
            } => {
                assert_eq!(name, "signing");
                assert_eq!(real_name.as_deref(), Some("Alice"));
                assert_eq!(key_bits, Some(3072));
                assert!(exportable);
                assert!(key_file.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
