use std::sync::Arc;

use tokio::sync::Mutex;
use wrongodb::{start_server, WrongoDB};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let db = WrongoDB::open("./wrongodb-data")?;
    let db = Arc::new(Mutex::new(db));
    start_server("127.0.0.1:27017", db).await?;
    Ok(())
}
