// Vocal Notes command line entry point

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = vocal_notes_lib::run(args).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
