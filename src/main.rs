use blobstore::storage::{DeleteOptions, DownloadOptions};
use blobstore::{
    CallContext, ListOptions, StorageProvider, StorageProviderFactory, UploadOptions, UploadSource,
};
use futures::TryStreamExt;
use std::error::Error;
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

const USAGE: &str = "usage: blobstore <ls PREFIX | get KEY [FILE] | put KEY FILE [CONTENT_TYPE] | rm KEY | stat KEY | check>

The backend is configured from STORAGE_TYPE, ACCOUNT_NAME, ACCOUNT_KEY,
ACCOUNT_SECRET, ACCOUNT_SERVICE_URL, CONTAINER_NAME, ENDPOINT, REGION and SSL.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args[0] == "-h" || args[0] == "--help" {
        eprintln!("{}", USAGE);
        return Ok(());
    }

    let start = Instant::now();
    let provider = StorageProviderFactory::from_env().await?;
    info!("Starting blobstore command={}, provider={:?}", args[0], provider);

    let ctx = CallContext::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight call");
            canceller.cancel();
        }
    });

    run(provider.as_ref(), &args, &ctx).await?;
    info!("Finished command={}, took={}", args[0], start.elapsed().as_millis());
    Ok(())
}

async fn run(
    provider: &dyn StorageProvider,
    args: &[String],
    ctx: &CallContext,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let arg = |i: usize| args.get(i).map(String::as_str);

    match (arg(0), arg(1), arg(2)) {
        (Some("ls"), prefix, None) => {
            let prefix = prefix.unwrap_or("");
            let mut objects = provider.list_opts(prefix, ListOptions::default(), ctx.clone());
            while let Some(meta) = objects.try_next().await? {
                println!(
                    "{}\t{}\t{}",
                    meta.last_modified.to_rfc3339(),
                    meta.size,
                    meta.key
                );
            }
        }
        (Some("get"), Some(key), file) => {
            let download = provider
                .download_opts(key, DownloadOptions::default(), ctx)
                .await?;
            let mut reader = download.into_reader();
            match file {
                Some(file) => {
                    let mut out = tokio::fs::File::create(file).await?;
                    let copied = tokio::io::copy(&mut reader, &mut out).await?;
                    out.flush().await?;
                    info!("Downloaded key={}, file={}, size={}", key, file, copied);
                }
                None => {
                    let mut out = tokio::io::stdout();
                    tokio::io::copy(&mut reader, &mut out).await?;
                    out.flush().await?;
                }
            }
        }
        (Some("put"), Some(key), Some(file)) => {
            let content_type = match arg(3) {
                Some(content_type) => content_type.to_string(),
                None => mime_guess::from_path(Path::new(file))
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string(),
            };
            let source = UploadSource::file(file).await?;
            let receipt = provider
                .upload_opts(key, source, UploadOptions::new(content_type), ctx)
                .await?;
            println!("{}", provider.uri_from_key(&receipt.key));
        }
        (Some("rm"), Some(key), None) => {
            provider
                .delete_opts(key, DeleteOptions::default(), ctx)
                .await?;
        }
        (Some("stat"), Some(key), None) => {
            let meta = provider.head(key, ctx).await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        (Some("check"), None, None) => {
            provider.validate_connection(ctx).await?;
            println!("ok {}", provider.base_path());
        }
        _ => return Err(USAGE.into()),
    }
    Ok(())
}
