use std::sync::Arc;

use onenet_core::{Gateway, Settings};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let gateway = Gateway::new(&settings)?;
        Ok(Self {
            gateway,
            settings: Arc::new(settings),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RequestId(pub String);
