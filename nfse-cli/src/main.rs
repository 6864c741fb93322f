use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use nfse_core::certificate::CertificateStore;
use nfse_core::config::Config;
use nfse_core::dispatch::{Dispatcher, RemoteResponse};
use nfse_core::document::{DocumentBuilder, Operation};
use nfse_core::rps::batch::BatchTextEncoder;
use nfse_core::rps::ReceiptBatch;
use nfse_core::sign::CanonicalSigner;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nfse")]
#[command(about = "Client for the Sao Paulo NFS-e webservice")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and sign a request, printing the XML that would be sent.
    Render {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        request: PathBuf,
    },
    /// Send a request and print the result as JSON.
    Send {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        request: PathBuf,
    },
    /// Write a receipt batch as a fixed-width text file.
    BatchFile {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        batch: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Print the municipal register (CCM) of a CNPJ.
    LookupCcm {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        cnpj: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render { config, request } => {
            let config = load_config(&config)?;
            let operation: Operation = read_json(&request)?;
            let store = load_store(&config)?;
            let signer = CanonicalSigner::new(&store);
            let signed = DocumentBuilder::new(config.provider())
                .build(&operation, &signer)
                .context("failed to build request")?
                .sign(&signer)
                .context("failed to sign request")?;
            println!("{}", signed.to_xml());
        }
        Commands::Send { config, request } => {
            let config = load_config(&config)?;
            let operation: Operation = read_json(&request)?;
            let mut dispatcher =
                Dispatcher::from_config(&config).context("failed to set up dispatcher")?;
            let summary = match operation {
                Operation::SubmitBatchTest(batch) => {
                    let outcome = dispatcher.submit_batch_test(batch)?;
                    let mut summary = summarize(&outcome.response);
                    summary["document"] = json!(outcome.document);
                    summary
                }
                operation => summarize(&dispatcher.dispatch(&operation)?),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::BatchFile {
            config,
            batch,
            out_dir,
        } => {
            let config = load_config(&config)?;
            let batch: ReceiptBatch = read_json(&batch)?;
            let file = BatchTextEncoder::new(config.provider())
                .encode_batch(&batch)
                .context("failed to encode batch")?;
            let path = file.write_to_dir(&out_dir, Local::now().naive_local())?;
            println!("{}", path.display());
        }
        Commands::LookupCcm { config, cnpj } => {
            let config = load_config(&config)?;
            let mut dispatcher =
                Dispatcher::from_config(&config).context("failed to set up dispatcher")?;
            let ccm = dispatcher.lookup_ccm(cnpj)?;
            println!("{ccm}");
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::from_properties(path)
        .with_context(|| format!("failed to load config '{}'", path.display()))?;
    info!(endpoint = config.endpoint(), provider = config.provider().ccm(), "config loaded");
    Ok(config)
}

fn load_store(config: &Config) -> Result<CertificateStore> {
    CertificateStore::load_from_dir(config.certificate_dir(), config.passphrase()).with_context(
        || {
            format!(
                "failed to load certificate from '{}'",
                config.certificate_dir().display()
            )
        },
    )
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("invalid request '{}'", path.display()))
}

fn summarize(response: &RemoteResponse) -> serde_json::Value {
    for error in response.errors() {
        warn!(
            code = error.code.as_deref().unwrap_or(""),
            description = error.description.as_deref().unwrap_or(""),
            "service reported an error"
        );
    }
    json!({
        "operation": response.operation().name(),
        "success": response.success(),
        "alerts": response.alerts(),
        "errors": response.errors(),
        "xml": response.xml(),
    })
}
