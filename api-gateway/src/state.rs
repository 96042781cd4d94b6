use std::time::Duration;

use redis::Client;

#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub scheduler_service_url: String,
    pub redis_client: Client,
    pub jwt_secret: Option<String>,
}

impl AppState {
    pub fn new(scheduler_service_url: String, redis_url: &str, jwt_secret: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        let redis_client = Client::open(redis_url)?;
        Ok(Self {
            client,
            scheduler_service_url,
            redis_client,
            jwt_secret,
        })
    }
}
