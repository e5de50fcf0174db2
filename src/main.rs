use clap::Parser;
use tracing_subscriber::EnvFilter;

use hot_patch::cli::Args;
use hot_patch::{render_summary, HotPatchError, Session};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();

    let config = args.session_config().map_err(HotPatchError::from)?;
    let session = Session::new(config).map_err(HotPatchError::from)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("hot-patch")
        .build()
        .map_err(HotPatchError::Runtime)?;

    let report = runtime.block_on(session.run_until(async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available: only the deadline ends the session.
            std::future::pending::<()>().await;
        }
    }));

    if args.json {
        let json = serde_json::to_string_pretty(&report).map_err(HotPatchError::from)?;
        println!("{json}");
    } else {
        print!("{}", render_summary(&report));
    }

    Ok(())
}
