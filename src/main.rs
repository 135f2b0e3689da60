use clap::Parser;

use bubble_lib::cli::Cli;

#[tokio::main]
async fn main() {
    bubble_lib::init_tracing();
    let cli = Cli::parse();
    if let Err(e) = bubble_lib::run(cli).await {
        tracing::error!(kind = e.kind(), "{e}");
        eprintln!("{}", serde_json::json!(e.report()));
        std::process::exit(1);
    }
}
