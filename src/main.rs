// src/main.rs

use shadowdog::{cli, logging, run};

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        // DEBUG switches on the full error chain and stack.
        if std::env::var("DEBUG").is_ok() {
            eprintln!("shadowdog error: {err:?}");
        } else {
            eprintln!("shadowdog error: {err:#}");
        }
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
