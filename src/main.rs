use clap::Parser;

use geolocator::cli::Cli;
use geolocator::interfaces::cli::run_cli;

#[tokio::main]
async fn main() {
    // .env 只补充环境变量，不存在时忽略
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = run_cli(cli).await {
        eprintln!("{}", e.format_colored());
        std::process::exit(1);
    }
}
