use feed_consumer::{settings::Settings, startup::App};
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() {
    let settings = Settings::new().unwrap();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_directive()));
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_env_filter(filter).finish(),
    )
    .unwrap();

    let app = App::build(settings).await.unwrap();

    if let Err(e) = app.run().await {
        error!("fusion service exited with an error: {e:?}");
        std::process::exit(1);
    }
}
